use text_splitter::{MarkdownSplitter, TextSplitter};

use crate::handlers::{chunk_char_budget, extension, ContentParser, ParsedChunk, ParsedFile};
use crate::models::{IngestionError, Result};

/// Plain text and markdown. Markdown splits on structural boundaries so a
/// heading does not get severed from its section.
pub struct TextHandler;

impl TextHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ContentParser for TextHandler {
    fn format(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md", "markdown"]
    }

    fn parse(&self, raw: &[u8], uri: &str, max_chunk_tokens: usize) -> Result<ParsedFile> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| IngestionError::Parse(format!("not utf-8: {}", e)))?;
        let budget = chunk_char_budget(max_chunk_tokens);

        let pieces: Vec<String> = match extension(uri).as_deref() {
            Some("md") | Some("markdown") => {
                MarkdownSplitter::new(budget).chunks(text).map(|s| s.to_string()).collect()
            }
            _ => TextSplitter::new(budget).chunks(text).map(|s| s.to_string()).collect(),
        };

        let mut file = ParsedFile::default();
        file.metadata.insert("format".into(), serde_json::json!(self.format()));
        file.metadata.insert("char_count".into(), serde_json::json!(text.chars().count()));

        for (index, piece) in pieces.into_iter().enumerate() {
            let mut chunk = ParsedChunk { text: piece, ..Default::default() };
            chunk.metadata.insert("chunk_index".into(), serde_json::json!(index));
            file.chunks.push(chunk);
        }

        tracing::debug!(uri = uri, chunk_count = file.chunks.len(), "Parsed text file");
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_is_one_chunk() {
        let handler = TextHandler::new();
        let parsed = handler
            .parse(b"hello world, this is a document", "buckets/t/doc.txt", 25_000)
            .unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].text, "hello world, this is a document");
    }

    #[test]
    fn oversized_file_splits() {
        let handler = TextHandler::new();
        let body = "word ".repeat(200);
        // 25-token budget = 100 chars per chunk
        let parsed = handler.parse(body.as_bytes(), "buckets/t/doc.txt", 25).unwrap();
        assert!(parsed.chunks.len() > 1);
        for chunk in &parsed.chunks {
            assert!(chunk.text.chars().count() <= 100);
        }
    }

    #[test]
    fn rejects_binary_garbage() {
        let handler = TextHandler::new();
        assert!(handler.parse(&[0xff, 0xfe, 0x00], "buckets/t/doc.txt", 100).is_err());
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let handler = TextHandler::new();
        let parsed = handler.parse(b"", "buckets/t/doc.md", 100).unwrap();
        assert!(parsed.chunks.is_empty());
    }
}

use rem_store::InlineEdge;

use crate::handlers::{chunk_char_budget, ContentParser, ParsedChunk, ParsedFile};
use crate::models::{IngestionError, Result};

/// Line-delimited JSON. Records may carry an explicit `links` array
/// (`[{dest, rel_type, weight, entity_type}]`) which becomes inline graph
/// edges on the owning chunk.
pub struct JsonlHandler;

impl JsonlHandler {
    pub fn new() -> Self {
        Self
    }
}

fn links_from_record(record: &serde_json::Value) -> Vec<InlineEdge> {
    let Some(links) = record.get("links").and_then(|l| l.as_array()) else {
        return Vec::new();
    };
    links
        .iter()
        .filter_map(|link| {
            let dest = link.get("dest").and_then(|d| d.as_str())?;
            let rel_type = link.get("rel_type").and_then(|r| r.as_str()).unwrap_or("see_also");
            let weight = link.get("weight").and_then(|w| w.as_f64()).unwrap_or(0.5) as f32;
            let mut edge = InlineEdge::new(dest, rel_type, weight);
            if let Some(et) = link.get("entity_type").and_then(|e| e.as_str()) {
                edge = edge.with_entity_type(et);
            }
            Some(edge)
        })
        .collect()
}

impl ContentParser for JsonlHandler {
    fn format(&self) -> &'static str {
        "jsonl"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jsonl", "ndjson"]
    }

    fn parse(&self, raw: &[u8], uri: &str, max_chunk_tokens: usize) -> Result<ParsedFile> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| IngestionError::Parse(format!("not utf-8: {}", e)))?;
        let budget = chunk_char_budget(max_chunk_tokens);

        let mut file = ParsedFile::default();
        file.metadata.insert("format".into(), serde_json::json!(self.format()));

        let mut current = ParsedChunk::default();
        let mut record_count = 0usize;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: serde_json::Value = serde_json::from_str(line)?;
            let edges = links_from_record(&record);

            if !current.text.is_empty() && current.text.len() + line.len() + 1 > budget {
                file.chunks.push(std::mem::take(&mut current));
            }
            if !current.text.is_empty() {
                current.text.push('\n');
            }
            current.text.push_str(line);
            for edge in edges {
                if !current.graph_paths.contains(&edge) {
                    current.graph_paths.push(edge);
                }
            }
            record_count += 1;
        }
        if !current.text.is_empty() {
            file.chunks.push(current);
        }

        for (index, chunk) in file.chunks.iter_mut().enumerate() {
            chunk.metadata.insert("chunk_index".into(), serde_json::json!(index));
        }
        file.metadata.insert("record_count".into(), serde_json::json!(record_count));

        tracing::debug!(uri = uri, record_count, chunk_count = file.chunks.len(), "Parsed JSONL data");
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_skips_blank_lines() {
        let handler = JsonlHandler::new();
        let raw = b"{\"a\":1}\n\n{\"a\":2}\n";
        let parsed = handler.parse(raw, "buckets/t/data.jsonl", 25_000).unwrap();
        assert_eq!(parsed.metadata["record_count"], serde_json::json!(2));
        assert_eq!(parsed.chunks.len(), 1);
    }

    #[test]
    fn invalid_line_is_a_parse_error() {
        let handler = JsonlHandler::new();
        assert!(handler.parse(b"{not json}\n", "buckets/t/data.jsonl", 100).is_err());
    }

    #[test]
    fn links_become_edges() {
        let handler = JsonlHandler::new();
        let raw = br#"{"title":"a","links":[{"dest":"alice","rel_type":"mentions","weight":0.9,"entity_type":"person"}]}"#;
        let parsed = handler.parse(raw, "buckets/t/notes.jsonl", 25_000).unwrap();
        let edges = &parsed.chunks[0].graph_paths;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dest, "alice");
        assert_eq!(edges[0].rel_type, "mentions");
        assert_eq!(edges[0].entity_type(), Some("person"));
    }
}

pub mod csv;
pub mod jsonl;
pub mod text;
pub mod xml;

pub use csv::CsvHandler;
pub use jsonl::JsonlHandler;
pub use text::TextHandler;
pub use xml::XmlHandler;

use rem_store::InlineEdge;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::Result;

/// One text chunk produced by a parser, with per-chunk metadata and any
/// graph edges the format carried inline.
#[derive(Debug, Clone, Default)]
pub struct ParsedChunk {
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub graph_paths: Vec<InlineEdge>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub chunks: Vec<ParsedChunk>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A format-specific parser. Parsing is CPU-bound and synchronous; the
/// worker dispatches it onto the blocking pool.
pub trait ContentParser: Send + Sync {
    fn format(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn parse(&self, raw: &[u8], uri: &str, max_chunk_tokens: usize) -> Result<ParsedFile>;
}

/// Rough token estimate used to honor downstream rate limits without
/// shipping a tokenizer: ~4 chars per token on prose.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

pub fn chunk_char_budget(max_chunk_tokens: usize) -> usize {
    max_chunk_tokens.saturating_mul(4).max(1)
}

pub fn file_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

pub fn extension(uri: &str) -> Option<String> {
    let name = file_name(uri);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Parsers keyed by file extension. Extensions without a parser are
/// skipped (acked with an audit record), never retried.
pub struct ParserRegistry {
    by_extension: HashMap<String, Arc<dyn ContentParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self { by_extension: HashMap::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextHandler::new()));
        registry.register(Arc::new(CsvHandler::new()));
        registry.register(Arc::new(JsonlHandler::new()));
        registry.register(Arc::new(XmlHandler::new()));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn ContentParser>) {
        for ext in parser.extensions() {
            self.by_extension.insert((*ext).to_string(), parser.clone());
        }
    }

    pub fn for_uri(&self, uri: &str) -> Option<Arc<dyn ContentParser>> {
        let ext = extension(uri)?;
        self.by_extension.get(&ext).cloned()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_extraction() {
        assert_eq!(extension("buckets/t/doc.md").as_deref(), Some("md"));
        assert_eq!(extension("buckets/t/DATA.CSV").as_deref(), Some("csv"));
        assert_eq!(extension("buckets/t/noext"), None);
        assert_eq!(extension("buckets/t/.hidden"), None);
    }

    #[test]
    fn registry_resolves_by_extension() {
        let registry = ParserRegistry::with_defaults();
        assert!(registry.for_uri("buckets/t/a.md").is_some());
        assert!(registry.for_uri("buckets/t/a.csv").is_some());
        assert!(registry.for_uri("buckets/t/a.jsonl").is_some());
        assert!(registry.for_uri("buckets/t/a.xml").is_some());
        assert!(registry.for_uri("buckets/t/a.wav").is_none());
    }

    #[test]
    fn token_estimate_tracks_length() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abcdefgh"), 2);
        assert_eq!(chunk_char_budget(25_000), 100_000);
    }
}

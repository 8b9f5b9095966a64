use csv::ReaderBuilder;
use rem_store::InlineEdge;

use crate::handlers::{chunk_char_budget, ContentParser, ParsedChunk, ParsedFile};
use crate::models::Result;

/// CSV files become row-window chunks: one JSON record per row, rows packed
/// into chunks up to the token budget. A `see_also` column (`;`-separated
/// labels) turns into inline graph edges on the owning chunk.
pub struct CsvHandler;

impl CsvHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ContentParser for CsvHandler {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv"]
    }

    fn parse(&self, raw: &[u8], uri: &str, max_chunk_tokens: usize) -> Result<ParsedFile> {
        let delimiter = if uri.ends_with(".tsv") { b'\t' } else { b',' };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(raw);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let budget = chunk_char_budget(max_chunk_tokens);

        let mut file = ParsedFile::default();
        file.metadata.insert("format".into(), serde_json::json!(self.format()));
        file.metadata.insert("headers".into(), serde_json::json!(headers.clone()));

        let mut current = ParsedChunk::default();
        let mut row_count = 0usize;
        for result in reader.records() {
            let record = result?;
            let mut json_record = serde_json::Map::new();
            let mut see_also: Vec<String> = Vec::new();
            for (i, field) in record.iter().enumerate() {
                let header = match headers.get(i) {
                    Some(h) => h.clone(),
                    None => format!("column_{}", i),
                };
                if header == "see_also" {
                    see_also = field
                        .split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                json_record.insert(header, serde_json::Value::String(field.to_string()));
            }

            let line = serde_json::Value::Object(json_record).to_string();
            if !current.text.is_empty() && current.text.len() + line.len() + 1 > budget {
                file.chunks.push(std::mem::take(&mut current));
            }
            if !current.text.is_empty() {
                current.text.push('\n');
            }
            current.text.push_str(&line);
            for label in see_also {
                let edge = InlineEdge::new(label, "see_also", 0.5).with_entity_type("resource");
                if !current.graph_paths.contains(&edge) {
                    current.graph_paths.push(edge);
                }
            }
            row_count += 1;
        }
        if !current.text.is_empty() {
            file.chunks.push(current);
        }

        for (index, chunk) in file.chunks.iter_mut().enumerate() {
            chunk.metadata.insert("chunk_index".into(), serde_json::json!(index));
        }
        file.metadata.insert("row_count".into(), serde_json::json!(row_count));

        tracing::debug!(uri = uri, row_count, chunk_count = file.chunks.len(), "Parsed CSV data");
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_become_json_lines() {
        let handler = CsvHandler::new();
        let raw = b"name,color\napple,red\npear,green\n";
        let parsed = handler.parse(raw, "buckets/t/fruit.csv", 25_000).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        let lines: Vec<&str> = parsed.chunks[0].text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["name"], "apple");
        assert_eq!(parsed.metadata["row_count"], serde_json::json!(2));
    }

    #[test]
    fn see_also_column_emits_edges() {
        let handler = CsvHandler::new();
        let raw = b"name,see_also\nalpha,beta; gamma\n";
        let parsed = handler.parse(raw, "buckets/t/rel.csv", 25_000).unwrap();
        let edges = &parsed.chunks[0].graph_paths;
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].dest, "beta");
        assert_eq!(edges[0].rel_type, "see_also");
        assert_eq!(edges[1].dest, "gamma");
    }

    #[test]
    fn tiny_budget_splits_rows_across_chunks() {
        let handler = CsvHandler::new();
        let raw = b"name\nfirst-very-long-row-value\nsecond-very-long-row-value\n";
        let parsed = handler.parse(raw, "buckets/t/rows.csv", 10).unwrap();
        assert_eq!(parsed.chunks.len(), 2);
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let handler = CsvHandler::new();
        let raw = b"name\tcolor\napple\tred\n";
        let parsed = handler.parse(raw, "buckets/t/fruit.tsv", 25_000).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(parsed.chunks[0].text.lines().next().unwrap()).unwrap();
        assert_eq!(first["color"], "red");
    }
}

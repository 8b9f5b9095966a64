use quick_xml::events::Event;
use quick_xml::Reader;

use crate::handlers::{chunk_char_budget, ContentParser, ParsedChunk, ParsedFile};
use crate::models::{IngestionError, Result};

/// Record-oriented XML: the first child of the document root is taken as
/// the record element, each record flattens to a JSON line of its leaf
/// text values.
pub struct XmlHandler;

impl XmlHandler {
    pub fn new() -> Self {
        Self
    }

    fn parse_records(&self, xml_content: &str) -> Result<Vec<serde_json::Value>> {
        let mut reader = Reader::from_str(xml_content);
        let mut records = Vec::new();
        let mut buf = Vec::new();

        let mut depth = 0usize;
        let mut record_element: Option<String> = None;
        let mut current_record: Option<serde_json::Map<String, serde_json::Value>> = None;
        let mut current_element = String::new();
        let mut current_text = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name_bytes = e.name().as_ref().to_vec();
                    let name = std::str::from_utf8(&name_bytes)
                        .map_err(|e| IngestionError::XmlParsing(e.to_string()))?
                        .to_string();
                    depth += 1;

                    if depth == 2 && record_element.is_none() {
                        record_element = Some(name.clone());
                    }
                    if depth == 2 && record_element.as_deref() == Some(&name) {
                        current_record = Some(serde_json::Map::new());
                    }
                    current_element = name;
                    current_text.clear();
                }
                Ok(Event::End(ref e)) => {
                    let name_bytes = e.name().as_ref().to_vec();
                    let name = std::str::from_utf8(&name_bytes)
                        .map_err(|e| IngestionError::XmlParsing(e.to_string()))?
                        .to_string();

                    if depth == 2 && record_element.as_deref() == Some(&name) {
                        if let Some(record) = current_record.take() {
                            records.push(serde_json::Value::Object(record));
                        }
                    } else if let Some(ref mut record) = current_record {
                        if !current_text.trim().is_empty() {
                            record.insert(
                                current_element.clone(),
                                serde_json::Value::String(current_text.trim().to_string()),
                            );
                        }
                        current_text.clear();
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Text(e)) => {
                    current_text = e
                        .unescape()
                        .map_err(|e| IngestionError::XmlParsing(e.to_string()))?
                        .to_string();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(IngestionError::XmlParsing(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        Ok(records)
    }
}

impl ContentParser for XmlHandler {
    fn format(&self) -> &'static str {
        "xml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xml"]
    }

    fn parse(&self, raw: &[u8], uri: &str, max_chunk_tokens: usize) -> Result<ParsedFile> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| IngestionError::Parse(format!("not utf-8: {}", e)))?;
        let records = self.parse_records(text)?;
        let budget = chunk_char_budget(max_chunk_tokens);

        let mut file = ParsedFile::default();
        file.metadata.insert("format".into(), serde_json::json!(self.format()));
        file.metadata.insert("record_count".into(), serde_json::json!(records.len()));

        let mut current = ParsedChunk::default();
        for record in &records {
            let line = record.to_string();
            if !current.text.is_empty() && current.text.len() + line.len() + 1 > budget {
                file.chunks.push(std::mem::take(&mut current));
            }
            if !current.text.is_empty() {
                current.text.push('\n');
            }
            current.text.push_str(&line);
        }
        if !current.text.is_empty() {
            file.chunks.push(current);
        }

        for (index, chunk) in file.chunks.iter_mut().enumerate() {
            chunk.metadata.insert("chunk_index".into(), serde_json::json!(index));
        }

        tracing::debug!(
            uri = uri,
            record_count = records.len(),
            chunk_count = file.chunks.len(),
            "Parsed XML data"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_child_is_the_record_element() {
        let handler = XmlHandler::new();
        let raw = b"<catalog><item><name>apple</name><color>red</color></item><item><name>pear</name></item></catalog>";
        let parsed = handler.parse(raw, "buckets/t/fruit.xml", 25_000).unwrap();
        assert_eq!(parsed.metadata["record_count"], serde_json::json!(2));
        let first: serde_json::Value =
            serde_json::from_str(parsed.chunks[0].text.lines().next().unwrap()).unwrap();
        assert_eq!(first["name"], "apple");
        assert_eq!(first["color"], "red");
    }

    #[test]
    fn mismatched_tags_are_an_error() {
        let handler = XmlHandler::new();
        let raw = b"<catalog><item><name>a</wrong></item></catalog>";
        assert!(handler.parse(raw, "buckets/t/x.xml", 100).is_err());
    }
}

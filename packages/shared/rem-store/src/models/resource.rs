use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One outbound graph edge described by destination label rather than id.
/// Stored inline on the owning row as JSON; the graph namespace mirrors it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineEdge {
    pub dest: String,
    pub rel_type: String,
    pub weight: f32,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl InlineEdge {
    pub fn new(dest: impl Into<String>, rel_type: impl Into<String>, weight: f32) -> Self {
        Self {
            dest: dest.into(),
            rel_type: rel_type.into(),
            weight: weight.clamp(0.0, 1.0),
            properties: HashMap::new(),
        }
    }

    pub fn with_entity_type(mut self, entity_type: &str) -> Self {
        self.properties.insert(
            "entity_type".to_string(),
            serde_json::Value::String(entity_type.to_string()),
        );
        self
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.properties.get("entity_type").and_then(|v| v.as_str())
    }
}

/// Union-merge `incoming` into `existing`. An edge is identified by
/// (dest, rel_type); existing edges keep their position and weight, so the
/// merge is idempotent and safe to rerun.
pub fn merge_graph_paths(existing: &mut Vec<InlineEdge>, incoming: Vec<InlineEdge>) -> usize {
    let mut added = 0;
    for edge in incoming {
        let present = existing
            .iter()
            .any(|e| e.dest == edge.dest && e.rel_type == edge.rel_type);
        if !present {
            existing.push(edge);
            added += 1;
        }
    }
    added
}

/// The atomic ingested content unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub category: String,
    pub content: String,
    pub summary: Option<String>,
    pub uri: String,
    pub resource_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub graph_paths: Vec<InlineEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Deterministic chunk id so redelivered events upsert the same row.
    pub fn chunk_id(tenant_id: &str, uri: &str, chunk_index: usize) -> Uuid {
        let input = format!("{}\n{}\n{}", tenant_id, uri, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, input.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_stable() {
        let a = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 0);
        let b = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_ids_differ_by_tenant_and_index() {
        let a = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 0);
        let b = Resource::chunk_id("tenant-b", "buckets/tenant-b/doc.md", 0);
        let c = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut paths = vec![InlineEdge::new("alice", "mentions", 0.8)];
        let incoming = vec![
            InlineEdge::new("alice", "mentions", 0.5),
            InlineEdge::new("bob", "see_also", 0.9),
        ];
        let added = merge_graph_paths(&mut paths, incoming.clone());
        assert_eq!(added, 1);
        assert_eq!(paths.len(), 2);
        // Existing edge keeps its original weight
        assert_eq!(paths[0].weight, 0.8);

        let added_again = merge_graph_paths(&mut paths, incoming);
        assert_eq!(added_again, 0);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn edge_weight_is_clamped() {
        assert_eq!(InlineEdge::new("x", "see_also", 1.7).weight, 1.0);
        assert_eq!(InlineEdge::new("x", "see_also", -0.2).weight, 0.0);
    }
}

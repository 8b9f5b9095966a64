use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One vector for one field of one entity. Exactly one row may exist per
/// (entity_id, field_name, provider); regeneration is keyed off source_hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub entity_table: String,
    pub entity_id: Uuid,
    pub field_name: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub provider: String,
    pub source_hash: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(
        entity_table: &str,
        entity_id: Uuid,
        field_name: &str,
        vector: Vec<f32>,
        provider: &str,
        source_text: &str,
        tenant_id: &str,
    ) -> Self {
        let dimension = vector.len();
        Self {
            entity_table: entity_table.to_string(),
            entity_id,
            field_name: field_name.to_string(),
            vector,
            dimension,
            provider: provider.to_string(),
            source_hash: source_hash(source_text),
            tenant_id: tenant_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Stable hash of the text a vector was generated from, used to skip
/// regeneration when neither provider nor content changed.
pub fn source_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_hash_is_stable() {
        assert_eq!(source_hash("hello"), source_hash("hello"));
        assert_ne!(source_hash("hello"), source_hash("hello "));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}

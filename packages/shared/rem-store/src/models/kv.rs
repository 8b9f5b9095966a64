use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reverse-name mapping: human-readable label -> entity row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KvMapping {
    pub entity_id: String,
    pub entity_type: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl KvMapping {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// Stored value under a reverse-name key. A key may accumulate several
/// mappings when distinct entities share a display name; mappings keep
/// insertion order, oldest first. `rev` is the CAS token for list updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KvRecord {
    pub rev: u64,
    pub mappings: Vec<KvMapping>,
}

impl KvRecord {
    pub fn single(mapping: KvMapping) -> Self {
        Self { rev: 1, mappings: vec![mapping] }
    }

    /// Merge a mapping in without displacing an older entity under the same
    /// id. Returns true when the record changed.
    pub fn merge(&mut self, mapping: KvMapping) -> bool {
        if let Some(existing) = self
            .mappings
            .iter_mut()
            .find(|m| m.entity_id == mapping.entity_id)
        {
            // Same entity: refresh secondary fields only.
            let changed = existing.table_name != mapping.table_name
                || existing.entity_type != mapping.entity_type
                || existing.blob_key != mapping.blob_key
                || existing.expires_at != mapping.expires_at;
            existing.table_name = mapping.table_name;
            existing.entity_type = mapping.entity_type;
            existing.blob_key = mapping.blob_key;
            existing.expires_at = mapping.expires_at;
            return changed;
        }
        self.mappings.push(mapping);
        true
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.mappings.len();
        self.mappings.retain(|m| !m.expired(now));
        before - self.mappings.len()
    }
}

/// Status of a device-authorization handshake stored under
/// `device-auth:{device_code}` / `user-code:{user_code}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceAuthRecord {
    pub device_code: String,
    pub user_code: String,
    pub tenant_id: Option<String>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: &str) -> KvMapping {
        KvMapping {
            entity_id: id.to_string(),
            entity_type: "resource".to_string(),
            table_name: "resources".to_string(),
            blob_key: None,
            expires_at: None,
        }
    }

    #[test]
    fn merge_keeps_older_entity_first() {
        let mut record = KvRecord::single(mapping("old"));
        record.merge(mapping("new"));
        assert_eq!(record.mappings.len(), 2);
        assert_eq!(record.mappings[0].entity_id, "old");
    }

    #[test]
    fn merge_same_entity_updates_in_place() {
        let mut record = KvRecord::single(mapping("a"));
        let mut updated = mapping("a");
        updated.blob_key = Some("blobs/a".to_string());
        assert!(record.merge(updated));
        assert_eq!(record.mappings.len(), 1);
        assert_eq!(record.mappings[0].blob_key.as_deref(), Some("blobs/a"));
    }

    #[test]
    fn prune_drops_expired_mappings() {
        let mut record = KvRecord::single(mapping("a"));
        let mut expiring = mapping("b");
        expiring.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        record.merge(expiring);
        assert_eq!(record.prune_expired(Utc::now()), 1);
        assert_eq!(record.mappings.len(), 1);
    }
}

use chrono::Utc;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::models::{DeviceAuthRecord, KvMapping, KvRecord};
use crate::store::KvStore;

const CAS_RETRY_CAP: usize = 5;
const DEVICE_AUTH_TTL: Duration = Duration::from_secs(600);

/// Key under which a human-readable name maps back to entity rows. The
/// tenant prefix is part of the key itself, so a scan can never cross
/// tenants.
pub fn reverse_key(tenant_id: &str, name: &str, entity_type: &str) -> String {
    format!("{}/{}/{}", tenant_id, name, entity_type)
}

/// Prefix for resolving a name across entity types. The trailing slash
/// bounds the match: "spec" never matches "specification".
pub fn name_prefix(tenant_id: &str, name: &str) -> String {
    format!("{}/{}/", tenant_id, name)
}

fn device_auth_key(device_code: &str) -> String {
    format!("device-auth:{}", device_code)
}

fn user_code_key(user_code: &str) -> String {
    format!("user-code:{}", user_code)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAuthStatus {
    Pending,
    Approved { tenant_id: String },
    Expired,
}

/// Reverse-name index over the KV namespace, plus the device-authorization
/// code namespaces. The only index over human-readable names in the system.
#[derive(Clone)]
pub struct EntityResolver {
    kv: KvStore,
}

impl EntityResolver {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Write (or merge into) the reverse mapping for a name. An existing
    /// record keeps its oldest entity_id in front; concurrent writers are
    /// serialized by the record revision.
    pub async fn register(
        &self,
        tenant_id: &str,
        name: &str,
        mapping: KvMapping,
    ) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        let key = reverse_key(tenant_id, name, &mapping.entity_type);

        for attempt in 0..CAS_RETRY_CAP {
            let existing = self.kv.get_json(&key).await?;
            let (expected_rev, mut record) = match existing {
                None => (0, KvRecord { rev: 0, mappings: Vec::new() }),
                Some(v) => {
                    let rec: KvRecord = serde_json::from_value(v)?;
                    (rec.rev, rec)
                }
            };
            record.prune_expired(Utc::now());
            record.merge(mapping.clone());
            record.rev = expected_rev + 1;

            let value = serde_json::to_value(&record)?;
            if self.kv.compare_and_set(&key, expected_rev, &value, None).await? {
                tracing::debug!(key = %key, rev = record.rev, "Registered reverse mapping");
                return Ok(());
            }
            tracing::debug!(key = %key, attempt, "Reverse mapping revision moved; retrying");
        }
        Err(StoreError::KvConflict(key))
    }

    /// All mappings for a name, across entity types, in stable scan order.
    /// Expired mappings are invisible and opportunistically cleaned up.
    pub async fn resolve(&self, tenant_id: &str, name: &str) -> Result<Vec<KvMapping>> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        let prefix = name_prefix(tenant_id, name);
        let entries = self.kv.scan_prefix(&prefix).await?;
        let now = Utc::now();

        let mut mappings = Vec::new();
        for (key, value) in entries {
            let mut record: KvRecord = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable KV record");
                    continue;
                }
            };
            let pruned = record.prune_expired(now);
            if record.mappings.is_empty() {
                // Nothing live left under this key; drop it.
                let _ = self.kv.delete(&key).await;
                continue;
            }
            if pruned > 0 {
                let expected = record.rev;
                record.rev += 1;
                let _ = self
                    .kv
                    .compare_and_set(&key, expected, &serde_json::to_value(&record)?, None)
                    .await;
            }
            mappings.extend(record.mappings);
        }
        Ok(mappings)
    }

    pub async fn remove(&self, tenant_id: &str, name: &str, entity_type: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        self.kv.delete(&reverse_key(tenant_id, name, entity_type)).await
    }

    // --- device-authorization namespace ---

    pub async fn begin_device_auth(
        &self,
        device_code: &str,
        user_code: &str,
    ) -> Result<DeviceAuthRecord> {
        let record = DeviceAuthRecord {
            device_code: device_code.to_string(),
            user_code: user_code.to_string(),
            tenant_id: None,
            approved: false,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&record)?;
        self.kv
            .put_json(&device_auth_key(device_code), &value, Some(DEVICE_AUTH_TTL))
            .await?;
        self.kv
            .put_json(&user_code_key(user_code), &value, Some(DEVICE_AUTH_TTL))
            .await?;
        Ok(record)
    }

    /// Approve the user-facing code, stamping the tenant onto both sides of
    /// the handshake. Returns false when the code already expired.
    pub async fn approve_user_code(&self, user_code: &str, tenant_id: &str) -> Result<bool> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        let key = user_code_key(user_code);
        let Some(value) = self.kv.get_json(&key).await? else {
            return Ok(false);
        };
        let mut record: DeviceAuthRecord = serde_json::from_value(value)?;
        record.approved = true;
        record.tenant_id = Some(tenant_id.to_string());

        let value = serde_json::to_value(&record)?;
        self.kv.put_json(&key, &value, Some(DEVICE_AUTH_TTL)).await?;
        self.kv
            .put_json(&device_auth_key(&record.device_code), &value, Some(DEVICE_AUTH_TTL))
            .await?;
        Ok(true)
    }

    pub async fn poll_device_auth(&self, device_code: &str) -> Result<DeviceAuthStatus> {
        match self.kv.get_json(&device_auth_key(device_code)).await? {
            None => Ok(DeviceAuthStatus::Expired),
            Some(value) => {
                let record: DeviceAuthRecord = serde_json::from_value(value)?;
                match (record.approved, record.tenant_id) {
                    (true, Some(tenant_id)) => Ok(DeviceAuthStatus::Approved { tenant_id }),
                    _ => Ok(DeviceAuthStatus::Pending),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_keys_carry_tenant_prefix() {
        let key = reverse_key("tenant-a", "doc.md", "resource");
        assert_eq!(key, "tenant-a/doc.md/resource");
        assert_eq!(key.split('/').next(), Some("tenant-a"));
    }

    #[test]
    fn prefix_is_slash_bounded() {
        let prefix = name_prefix("tenant-a", "spec");
        assert!(reverse_key("tenant-a", "spec", "resource").starts_with(&prefix));
        assert!(!reverse_key("tenant-a", "specification", "resource").starts_with(&prefix));
    }
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub email: String,
    pub public_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Tenant {
    pub fn new(email: &str, imei: Option<&str>) -> Self {
        let tenant_id = match imei {
            Some(imei) => tenant_id_from_imei(imei),
            None => random_tenant_id(),
        };
        Self {
            tenant_id,
            email: email.to_string(),
            public_key: None,
            metadata: HashMap::new(),
        }
    }
}

/// Deterministic id for device-bound tenants: the first 16 hex chars of
/// sha256(imei), so re-registering the same device lands on the same tenant.
pub fn tenant_id_from_imei(imei: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(imei.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("tenant-{}", &digest[..16])
}

pub fn random_tenant_id() -> String {
    format!("tenant-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imei_derivation_is_deterministic() {
        let a = tenant_id_from_imei("490154203237518");
        let b = tenant_id_from_imei("490154203237518");
        assert_eq!(a, b);
        assert!(a.starts_with("tenant-"));
        assert_eq!(a.len(), "tenant-".len() + 16);
    }

    #[test]
    fn random_ids_do_not_collide_trivially() {
        assert_ne!(random_tenant_id(), random_tenant_id());
    }
}

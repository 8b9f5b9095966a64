use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SMALL_MAX_BYTES: u64 = 100 * 1024 * 1024;
pub const MEDIUM_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Size band of an ingested file. Each tier owns a durable stream, a
/// durable consumer and a worker pool with its own ack-wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    /// Bands are exclusive-inclusive on the lower bound; a size exactly at
    /// a threshold routes to the higher tier.
    pub fn classify(size: u64) -> Self {
        if size < SMALL_MAX_BYTES {
            SizeTier::Small
        } else if size < MEDIUM_MAX_BYTES {
            SizeTier::Medium
        } else {
            SizeTier::Large
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "small" => Some(SizeTier::Small),
            "medium" => Some(SizeTier::Medium),
            "large" => Some(SizeTier::Large),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            SizeTier::Small => "events.small",
            SizeTier::Medium => "events.medium",
            SizeTier::Large => "events.large",
        }
    }

    pub fn stream_name(&self) -> &'static str {
        match self {
            SizeTier::Small => "EVENTS_SMALL",
            SizeTier::Medium => "EVENTS_MEDIUM",
            SizeTier::Large => "EVENTS_LARGE",
        }
    }

    pub fn consumer_name(&self) -> &'static str {
        match self {
            SizeTier::Small => "small-workers",
            SizeTier::Medium => "medium-workers",
            SizeTier::Large => "large-workers",
        }
    }

    pub fn ack_wait(&self) -> Duration {
        match self {
            SizeTier::Small => Duration::from_secs(30),
            SizeTier::Medium => Duration::from_secs(5 * 60),
            SizeTier::Large => Duration::from_secs(30 * 60),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        match self {
            SizeTier::Small => 32,
            SizeTier::Medium => 8,
            SizeTier::Large => 2,
        }
    }
}

/// Raw event emitted by the object store. `size` is absent on some
/// providers' update notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreEvent {
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
}

impl ObjectStoreEvent {
    /// Tenant scoping lives in the path: `buckets/{tenant_id}/...`.
    /// Anything else is non-tenant traffic, dropped without error.
    pub fn tenant_id(&self) -> Option<&str> {
        let rest = self.path.strip_prefix("buckets/")?;
        let (tenant, object) = rest.split_once('/')?;
        if tenant.is_empty() || object.is_empty() {
            return None;
        }
        Some(tenant)
    }
}

/// What actually travels on the tier subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub tenant_id: String,
    pub uri: String,
    pub size: u64,
    #[serde(default)]
    pub content_type_hint: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
}

/// Payload routed to `events.dead` after the redelivery cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original: serde_json::Value,
    pub error: String,
    pub deliveries: i64,
    pub tier: SizeTier,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Malformed,
    Skipped,
}

/// Diagnostic record for events that were acked without ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub uri: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, uri: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.to_string(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("store error: {0}")]
    Store(#[from] rem_store::StoreError),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("embeddings service error: {0}")]
    Embeddings(String),

    #[error("embeddings service rate limited")]
    RateLimited,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv parsing error: {0}")]
    CsvParsing(#[from] csv::Error),

    #[error("xml parsing error: {0}")]
    XmlParsing(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_bands() {
        assert_eq!(SizeTier::classify(0), SizeTier::Small);
        assert_eq!(SizeTier::classify(SMALL_MAX_BYTES - 1), SizeTier::Small);
        // Exactly at a threshold routes upward
        assert_eq!(SizeTier::classify(SMALL_MAX_BYTES), SizeTier::Medium);
        assert_eq!(SizeTier::classify(MEDIUM_MAX_BYTES - 1), SizeTier::Medium);
        assert_eq!(SizeTier::classify(MEDIUM_MAX_BYTES), SizeTier::Large);
        assert_eq!(SizeTier::classify(u64::MAX), SizeTier::Large);
    }

    #[test]
    fn five_hundred_mib_is_medium() {
        assert_eq!(SizeTier::classify(500 * 1024 * 1024), SizeTier::Medium);
    }

    #[test]
    fn tenant_extraction() {
        let mut event = ObjectStoreEvent {
            path: "buckets/tenant-a/docs/spec.md".into(),
            size: Some(5000),
            timestamp: Utc::now(),
            event_type: "create".into(),
        };
        assert_eq!(event.tenant_id(), Some("tenant-a"));

        event.path = "garbage/noise.bin".into();
        assert_eq!(event.tenant_id(), None);

        event.path = "buckets/".into();
        assert_eq!(event.tenant_id(), None);

        event.path = "buckets/tenant-a/".into();
        assert_eq!(event.tenant_id(), None);
    }

    #[test]
    fn tier_params_tighten_with_size() {
        assert!(SizeTier::Small.max_in_flight() > SizeTier::Large.max_in_flight());
        assert!(SizeTier::Small.ack_wait() < SizeTier::Large.ack_wait());
    }
}

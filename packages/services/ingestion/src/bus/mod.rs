use async_nats::jetstream::{
    self,
    consumer::pull::Config as PullConfig,
    consumer::{AckPolicy, PullConsumer},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType, Stream},
};
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::models::{AuditRecord, BusMessage, DeadLetter, IngestionError, Result, SizeTier};

pub const RAW_STREAM: &str = "EVENTS";
pub const RAW_SUBJECT: &str = "events.raw";
pub const ROUTER_CONSUMER: &str = "ingress-router";
pub const DEAD_STREAM: &str = "EVENTS_DEAD";
pub const DEAD_SUBJECT: &str = "events.dead";
pub const AUDIT_STREAM: &str = "EVENTS_AUDIT";
pub const AUDIT_SUBJECT: &str = "events.audit";

/// Exponential backoff for redeliveries, capped so a LARGE-tier retry does
/// not outlive its ack-wait.
pub fn backoff_delay(deliveries: i64, base_ms: u64) -> Duration {
    let attempt = deliveries.max(1).min(10) as u32;
    let ms = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
    Duration::from_millis(ms.min(60_000))
}

/// Owns the JetStream context and the stream/consumer topology: one raw
/// stream fed by the object store, three tier streams, a dead-letter
/// stream and an audit stream.
#[derive(Clone)]
pub struct BusManager {
    jetstream: jetstream::Context,
    cfg: Config,
}

impl BusManager {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let client = async_nats::connect(&cfg.nats_url)
            .await
            .map_err(|e| IngestionError::Bus(format!("connect {}: {}", cfg.nats_url, e)))?;
        tracing::info!(url = %cfg.nats_url, "Connected to message bus");
        Ok(Self { jetstream: jetstream::new(client), cfg: cfg.clone() })
    }

    /// Idempotent stream provisioning; safe to run from every process at
    /// startup.
    pub async fn ensure_topology(&self) -> Result<()> {
        let max_age = Duration::from_secs(self.cfg.stream_max_age_hours * 3600);

        self.get_or_create_stream(RAW_STREAM, vec![RAW_SUBJECT.to_string()], max_age).await?;
        for tier in [SizeTier::Small, SizeTier::Medium, SizeTier::Large] {
            self.get_or_create_stream(tier.stream_name(), vec![tier.subject().to_string()], max_age)
                .await?;
        }
        self.get_or_create_stream(DEAD_STREAM, vec![DEAD_SUBJECT.to_string()], max_age).await?;
        self.get_or_create_stream(AUDIT_STREAM, vec![AUDIT_SUBJECT.to_string()], max_age).await?;

        tracing::info!("Bus topology ensured");
        Ok(())
    }

    async fn get_or_create_stream(
        &self,
        name: &str,
        subjects: Vec<String>,
        max_age: Duration,
    ) -> Result<Stream> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: name.to_string(),
                subjects,
                max_age,
                storage: StorageType::File,
                retention: RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| IngestionError::Bus(format!("stream {}: {}", name, e)))
    }

    /// Durable consumer for one size tier. A pre-flight check removes a
    /// leftover consumer whose parameters no longer match this build.
    pub async fn tier_consumer(&self, tier: SizeTier) -> Result<PullConsumer> {
        let stream = self
            .jetstream
            .get_stream(tier.stream_name())
            .await
            .map_err(|e| IngestionError::Bus(format!("stream {}: {}", tier.stream_name(), e)))?;

        self.drop_stale_consumer(&stream, tier.consumer_name(), tier.ack_wait(), tier.max_in_flight())
            .await;

        stream
            .get_or_create_consumer(
                tier.consumer_name(),
                PullConfig {
                    durable_name: Some(tier.consumer_name().to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: tier.ack_wait(),
                    max_ack_pending: tier.max_in_flight() as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| IngestionError::Bus(format!("consumer {}: {}", tier.consumer_name(), e)))
    }

    pub async fn router_consumer(&self) -> Result<PullConsumer> {
        let stream = self
            .jetstream
            .get_stream(RAW_STREAM)
            .await
            .map_err(|e| IngestionError::Bus(format!("stream {}: {}", RAW_STREAM, e)))?;

        self.drop_stale_consumer(&stream, ROUTER_CONSUMER, Duration::from_secs(30), 64).await;

        stream
            .get_or_create_consumer(
                ROUTER_CONSUMER,
                PullConfig {
                    durable_name: Some(ROUTER_CONSUMER.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(30),
                    max_ack_pending: 64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| IngestionError::Bus(format!("consumer {}: {}", ROUTER_CONSUMER, e)))
    }

    async fn drop_stale_consumer(
        &self,
        stream: &Stream,
        name: &str,
        ack_wait: Duration,
        max_in_flight: usize,
    ) {
        match stream.consumer_info(name).await {
            Ok(info) => {
                let stale = info.config.ack_wait != ack_wait
                    || info.config.max_ack_pending != max_in_flight as i64;
                if stale {
                    tracing::warn!(consumer = name, "Deleting stale consumer with conflicting parameters");
                    if let Err(e) = stream.delete_consumer(name).await {
                        tracing::warn!(consumer = name, error = %e, "Failed to delete stale consumer");
                    }
                }
            }
            Err(_) => { /* no existing consumer; nothing to clean */ }
        }
    }

    /// Publish and wait for the stream's ack so "published" means durably
    /// stored, not just flushed.
    pub async fn publish_json<T: Serialize>(&self, subject: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.jetstream
            .publish(subject.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| IngestionError::Bus(format!("publish {}: {}", subject, e)))?
            .await
            .map_err(|e| IngestionError::Bus(format!("publish ack {}: {}", subject, e)))?;
        Ok(())
    }

    pub async fn publish_tier(&self, tier: SizeTier, message: &BusMessage) -> Result<()> {
        self.publish_json(tier.subject(), message).await
    }

    pub async fn publish_dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        self.publish_json(DEAD_SUBJECT, letter).await
    }

    /// Audit publishes are best-effort: losing a diagnostic record must not
    /// fail the event that produced it.
    pub async fn publish_audit(&self, record: &AuditRecord) {
        if let Err(e) = self.publish_json(AUDIT_SUBJECT, record).await {
            tracing::warn!(uri = %record.uri, error = %e, "Failed to publish audit record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = 500;
        assert_eq!(backoff_delay(1, base), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(2000));
        assert!(backoff_delay(10, base) <= Duration::from_secs(60));
        // A zeroth delivery behaves like the first
        assert_eq!(backoff_delay(0, base), Duration::from_millis(500));
    }
}

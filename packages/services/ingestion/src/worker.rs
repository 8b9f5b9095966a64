use chrono::Utc;
use futures::StreamExt;
use rem_store::{
    source_hash, Embedding, EntityResolver, GraphNodeRef, KvMapping, RemStore, Resource, TableKind,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

use crate::bus::{backoff_delay, BusManager};
use crate::clients::{EmbeddingsServiceClient, ObjectStoreClient};
use crate::config::Config;
use crate::handlers::{file_name, ParserRegistry};
use crate::models::*;

const EMBED_FIELD: &str = "content";
const NAK_BASE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Stored { resources: usize },
    Skipped,
    Dropped,
}

/// True when the event uri actually sits under the tenant it claims.
/// Redundant with the router's check, but workers are the last line before
/// rows are written.
pub fn uri_matches_tenant(uri: &str, tenant_id: &str) -> bool {
    uri.strip_prefix("buckets/")
        .and_then(|rest| rest.split_once('/'))
        .map(|(tenant, object)| tenant == tenant_id && !object.is_empty())
        .unwrap_or(false)
}

/// One storage worker bound to one tier consumer. Processes deliveries
/// under a per-tier in-flight cap; the ordered write sequence per message
/// is Resource rows, then embeddings, then graph mirror, then the KV
/// reverse mapping, then ack. A crash anywhere leaves the message unacked
/// and the partial writes idempotent to redo.
#[derive(Clone)]
pub struct StorageWorker {
    tier: SizeTier,
    bus: BusManager,
    store: RemStore,
    resolver: EntityResolver,
    embeddings: EmbeddingsServiceClient,
    object_store: ObjectStoreClient,
    registry: Arc<ParserRegistry>,
    cfg: Config,
    cooldown_until: Arc<Mutex<Option<Instant>>>,
}

impl StorageWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tier: SizeTier,
        bus: BusManager,
        store: RemStore,
        resolver: EntityResolver,
        embeddings: EmbeddingsServiceClient,
        object_store: ObjectStoreClient,
        registry: Arc<ParserRegistry>,
        cfg: Config,
    ) -> Self {
        Self {
            tier,
            bus,
            store,
            resolver,
            embeddings,
            object_store,
            registry,
            cfg,
            cooldown_until: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let consumer = self.bus.tier_consumer(self.tier).await?;
        let semaphore = Arc::new(Semaphore::new(self.tier.max_in_flight()));
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| IngestionError::Bus(format!("worker subscribe: {}", e)))?;

        tracing::info!(tier = self.tier.as_str(), "Storage worker started");
        loop {
            self.wait_for_cooldown().await;

            let permit = tokio::select! {
                p = semaphore.clone().acquire_owned() => p.expect("semaphore closed"),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                    continue;
                }
            };

            let delivery = tokio::select! {
                d = messages.next() => d,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                    continue;
                }
            };
            let Some(delivery) = delivery else {
                return Err(IngestionError::Bus("worker stream closed".into()));
            };
            let msg = match delivery {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(tier = self.tier.as_str(), error = %e, "Worker pull error");
                    continue;
                }
            };

            let worker = self.clone();
            tokio::spawn(async move {
                worker.handle_delivery(msg).await;
                drop(permit);
            });
        }

        // Drain: wait for in-flight tasks up to the grace window, then let
        // the bus redeliver whatever did not finish.
        let grace = Duration::from_millis(self.cfg.shutdown_grace_ms);
        let all = self.tier.max_in_flight() as u32;
        if tokio::time::timeout(grace, semaphore.acquire_many(all)).await.is_err() {
            tracing::warn!(tier = self.tier.as_str(), "Drain grace expired; unacked messages will be redelivered");
        }
        tracing::info!(tier = self.tier.as_str(), "Storage worker stopped");
        Ok(())
    }

    async fn wait_for_cooldown(&self) {
        let until = *self.cooldown_until.lock().expect("cooldown mutex poisoned");
        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                tracing::info!(tier = self.tier.as_str(), "Rate-limit cooldown; pausing pull");
                tokio::time::sleep(until - now).await;
            }
            *self.cooldown_until.lock().expect("cooldown mutex poisoned") = None;
        }
    }

    fn start_cooldown(&self) {
        let until = Instant::now() + Duration::from_millis(self.cfg.rate_limit_cooldown_ms);
        *self.cooldown_until.lock().expect("cooldown mutex poisoned") = Some(until);
    }

    async fn handle_delivery(&self, msg: async_nats::jetstream::Message) {
        let deliveries = msg.info().map(|i| i.delivered).unwrap_or(1);

        // Past the redelivery cap: route to the dead-letter sink and ack.
        if deliveries > self.cfg.max_delivery_attempts {
            let original: serde_json::Value =
                serde_json::from_slice(&msg.payload).unwrap_or(serde_json::Value::Null);
            let letter = DeadLetter {
                original,
                error: "redelivery cap exceeded".into(),
                deliveries,
                tier: self.tier,
                timestamp: Utc::now(),
            };
            if let Err(e) = self.bus.publish_dead_letter(&letter).await {
                tracing::error!(error = %e, "Failed to dead-letter; leaving message unacked");
                return;
            }
            let _ = msg.ack().await;
            tracing::warn!(tier = self.tier.as_str(), deliveries, "Message dead-lettered");
            return;
        }

        let message: BusMessage = match serde_json::from_slice(&msg.payload) {
            Ok(m) => m,
            Err(e) => {
                self.bus
                    .publish_audit(&AuditRecord::new(
                        AuditKind::Malformed,
                        &String::from_utf8_lossy(&msg.payload),
                        e.to_string(),
                    ))
                    .await;
                let _ = msg.ack().await;
                return;
            }
        };

        match self.process_message(&message).await {
            Ok(outcome) => {
                if let Err(e) = msg.ack().await {
                    tracing::warn!(uri = %message.uri, error = %e, "Ack failed; message will be redelivered");
                } else {
                    tracing::info!(
                        tenant_id = %message.tenant_id,
                        uri = %message.uri,
                        trace_id = %message.trace_id,
                        outcome = ?outcome,
                        "Processed event"
                    );
                }
            }
            Err(IngestionError::RateLimited) => {
                self.start_cooldown();
                let delay = Duration::from_millis(self.cfg.rate_limit_cooldown_ms);
                let _ = msg
                    .ack_with(async_nats::jetstream::AckKind::Nak(Some(delay)))
                    .await;
                tracing::warn!(uri = %message.uri, "Embedding service rate limited; cooling down");
            }
            Err(e) => {
                let delay = backoff_delay(deliveries, NAK_BASE_MS);
                let _ = msg
                    .ack_with(async_nats::jetstream::AckKind::Nak(Some(delay)))
                    .await;
                tracing::error!(
                    tenant_id = %message.tenant_id,
                    uri = %message.uri,
                    deliveries,
                    error = %e,
                    "Processing failed; message left for redelivery"
                );
            }
        }
    }

    pub async fn process_message(&self, message: &BusMessage) -> Result<ProcessOutcome> {
        if !uri_matches_tenant(&message.uri, &message.tenant_id) {
            tracing::debug!(uri = %message.uri, "Event outside tenant scope; dropping");
            return Ok(ProcessOutcome::Dropped);
        }

        let Some(parser) = self.registry.for_uri(&message.uri) else {
            self.bus
                .publish_audit(&AuditRecord::new(
                    AuditKind::Skipped,
                    &message.uri,
                    "no parser registered for extension",
                ))
                .await;
            return Ok(ProcessOutcome::Skipped);
        };

        let raw = self.object_store.fetch(&message.uri).await?;

        // Parsing is CPU-bound; keep it off the scheduler threads.
        let uri = message.uri.clone();
        let max_tokens = self.cfg.max_chunk_tokens;
        let parser_for_blocking = parser.clone();
        let parsed = tokio::task::spawn_blocking(move || parser_for_blocking.parse(&raw, &uri, max_tokens))
            .await
            .map_err(|e| IngestionError::Parse(format!("parser task: {}", e)))?;

        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => {
                // Corrupt input does not improve with retries.
                self.bus
                    .publish_audit(&AuditRecord::new(AuditKind::Malformed, &message.uri, e.to_string()))
                    .await;
                return Ok(ProcessOutcome::Skipped);
            }
        };

        if parsed.chunks.is_empty() {
            return Ok(ProcessOutcome::Stored { resources: 0 });
        }

        let name = file_name(&message.uri).to_string();
        let chunk_total = parsed.chunks.len();
        for (index, chunk) in parsed.chunks.into_iter().enumerate() {
            let id = Resource::chunk_id(&message.tenant_id, &message.uri, index);
            let now = Utc::now();

            let mut metadata = parsed.metadata.clone();
            metadata.extend(chunk.metadata.clone());
            metadata.insert("source_size".into(), serde_json::json!(message.size));
            metadata.insert("trace_id".into(), serde_json::json!(message.trace_id));
            if let Some(hint) = &message.content_type_hint {
                metadata.insert("content_type".into(), serde_json::json!(hint));
            }
            if chunk_total > 1 {
                metadata.insert("chunk_total".into(), serde_json::json!(chunk_total));
            }

            let resource = Resource {
                id,
                tenant_id: message.tenant_id.clone(),
                name: name.clone(),
                category: parser.format().to_string(),
                content: chunk.text,
                summary: None,
                uri: message.uri.clone(),
                resource_timestamp: message.timestamp,
                metadata,
                graph_paths: chunk.graph_paths.clone(),
                created_at: now,
                updated_at: now,
            };

            self.store.upsert_resource(&resource).await?;
            self.ensure_embedding(&resource).await?;
            self.mirror_edges(&resource).await?;
            self.resolver
                .register(
                    &message.tenant_id,
                    &name,
                    KvMapping {
                        entity_id: id.to_string(),
                        entity_type: TableKind::Resources.entity_type().to_string(),
                        table_name: TableKind::Resources.table_name().to_string(),
                        blob_key: Some(message.uri.clone()),
                        expires_at: None,
                    },
                )
                .await?;
        }

        Ok(ProcessOutcome::Stored { resources: chunk_total })
    }

    /// Generate and store the content embedding unless an identical one is
    /// already there (same provider, same source hash).
    async fn ensure_embedding(&self, resource: &Resource) -> Result<()> {
        let hash = source_hash(&resource.content);
        let current = self
            .store
            .embedding_is_current(
                &resource.tenant_id,
                TableKind::Resources.table_name(),
                resource.id,
                EMBED_FIELD,
                &self.cfg.embedding_provider,
                &hash,
            )
            .await?;
        if current {
            tracing::debug!(resource_id = %resource.id, "Embedding up to date; skipping");
            return Ok(());
        }

        let vectors = self.embeddings.embed(&[resource.content.clone()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| IngestionError::Embeddings("empty embed response".into()))?;

        let embedding = Embedding::new(
            TableKind::Resources.table_name(),
            resource.id,
            EMBED_FIELD,
            vector,
            &self.cfg.embedding_provider,
            &resource.content,
            &resource.tenant_id,
        );
        self.store.upsert_embedding(&embedding).await?;
        Ok(())
    }

    /// Mirror this row's inline edges into the graph namespace. MERGE
    /// semantics make redelivery and concurrent workers converge.
    async fn mirror_edges(&self, resource: &Resource) -> Result<()> {
        if resource.graph_paths.is_empty() {
            return Ok(());
        }
        let src = GraphNodeRef::new(TableKind::Resources.node_label(), &resource.name);
        self.store.graph.merge_node(&resource.tenant_id, &src).await?;
        for edge in &resource.graph_paths {
            let dst_label = edge.entity_type().unwrap_or("Entity");
            let dst = GraphNodeRef::new(dst_label, &edge.dest);
            self.store
                .graph
                .merge_edge(&resource.tenant_id, &src, &dst, &edge.rel_type, edge.weight as f64)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_scope_check() {
        assert!(uri_matches_tenant("buckets/tenant-a/doc.md", "tenant-a"));
        assert!(!uri_matches_tenant("buckets/tenant-b/doc.md", "tenant-a"));
        assert!(!uri_matches_tenant("other/tenant-a/doc.md", "tenant-a"));
        assert!(!uri_matches_tenant("buckets/tenant-a/", "tenant-a"));
    }

    #[test]
    fn chunk_ids_survive_redelivery() {
        // Same event twice must target the same rows.
        let first = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 0);
        let second = Resource::chunk_id("tenant-a", "buckets/tenant-a/doc.md", 0);
        assert_eq!(first, second);
    }
}

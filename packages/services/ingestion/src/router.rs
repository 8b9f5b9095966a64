use futures::StreamExt;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::BusManager;
use crate::models::*;

/// What the router decided for one raw event. Split out from the consume
/// loop so classification is testable without a bus.
#[derive(Debug)]
pub enum RoutePlan {
    Publish {
        tier: SizeTier,
        message: BusMessage,
        size_missing: bool,
    },
    Drop {
        reason: &'static str,
    },
}

pub fn plan_route(event: &ObjectStoreEvent) -> RoutePlan {
    match event.event_type.as_str() {
        "create" | "update" => {}
        _ => return RoutePlan::Drop { reason: "event type not ingested" },
    }

    let Some(tenant_id) = event.tenant_id() else {
        return RoutePlan::Drop { reason: "path outside tenant buckets" };
    };

    let (size, size_missing) = match event.size {
        Some(s) => (s, false),
        None => (0, true),
    };
    let tier = SizeTier::classify(size);

    RoutePlan::Publish {
        tier,
        message: BusMessage {
            tenant_id: tenant_id.to_string(),
            uri: event.path.clone(),
            size,
            content_type_hint: content_type_hint(&event.path),
            timestamp: event.timestamp,
            trace_id: Uuid::new_v4().to_string(),
        },
        size_missing,
    }
}

fn content_type_hint(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    let hint = match ext {
        "md" => "text/markdown",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "jsonl" => "application/x-ndjson",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => return None,
    };
    Some(hint.to_string())
}

/// Consumes raw object-store events and fans them out onto the size-tier
/// subjects. Non-tenant traffic is acked and dropped; malformed payloads
/// are acked with an audit record; publish failures leave the event
/// unacked for redelivery.
pub struct IngressRouter {
    bus: BusManager,
}

impl IngressRouter {
    pub fn new(bus: BusManager) -> Self {
        Self { bus }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let consumer = self.bus.router_consumer().await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| IngestionError::Bus(format!("router subscribe: {}", e)))?;

        tracing::info!("Ingress router started");
        loop {
            let delivery = tokio::select! {
                d = messages.next() => d,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                    continue;
                }
            };
            let Some(delivery) = delivery else {
                tracing::warn!("Router message stream ended; reconnecting");
                return Err(IngestionError::Bus("router stream closed".into()));
            };
            let msg = match delivery {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Router pull error");
                    continue;
                }
            };

            match self.handle(msg.payload.as_ref()).await {
                Ok(()) => {
                    if let Err(e) = msg.ack().await {
                        tracing::warn!(error = %e, "Router ack failed; event will be redelivered");
                    }
                }
                Err(e) => {
                    // Publish failed: leave unacked so the bus redelivers.
                    tracing::error!(error = %e, "Router publish failed; not acking");
                }
            }
        }
        tracing::info!("Ingress router stopped");
        Ok(())
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let event: ObjectStoreEvent = match serde_json::from_slice(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed object-store event");
                self.bus
                    .publish_audit(&AuditRecord::new(
                        AuditKind::Malformed,
                        &String::from_utf8_lossy(payload),
                        e.to_string(),
                    ))
                    .await;
                return Ok(()); // ack: retrying cannot fix a malformed event
            }
        };

        match plan_route(&event) {
            RoutePlan::Drop { reason } => {
                tracing::debug!(path = %event.path, reason, "Dropping event");
                Ok(())
            }
            RoutePlan::Publish { tier, message, size_missing } => {
                if size_missing {
                    tracing::warn!(path = %event.path, "Event carries no size; assuming SMALL");
                }
                self.bus.publish_tier(tier, &message).await?;
                tracing::info!(
                    tenant_id = %message.tenant_id,
                    uri = %message.uri,
                    size = message.size,
                    tier = tier.as_str(),
                    trace_id = %message.trace_id,
                    "Routed event"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(path: &str, size: Option<u64>, event_type: &str) -> ObjectStoreEvent {
        ObjectStoreEvent {
            path: path.to_string(),
            size,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
        }
    }

    #[test]
    fn routes_by_size_band() {
        match plan_route(&event("buckets/tenant-a/doc.md", Some(5000), "create")) {
            RoutePlan::Publish { tier, message, .. } => {
                assert_eq!(tier, SizeTier::Small);
                assert_eq!(message.tenant_id, "tenant-a");
                assert_eq!(message.uri, "buckets/tenant-a/doc.md");
            }
            other => panic!("expected publish, got {:?}", other),
        }

        match plan_route(&event("buckets/tenant-a/video.raw", Some(500 * 1024 * 1024), "update")) {
            RoutePlan::Publish { tier, .. } => assert_eq!(tier, SizeTier::Medium),
            other => panic!("expected publish, got {:?}", other),
        }
    }

    #[test]
    fn drops_non_tenant_paths() {
        match plan_route(&event("garbage/noise.bin", Some(10), "create")) {
            RoutePlan::Drop { .. } => {}
            other => panic!("expected drop, got {:?}", other),
        }
    }

    #[test]
    fn drops_deletes() {
        match plan_route(&event("buckets/tenant-a/doc.md", Some(10), "delete")) {
            RoutePlan::Drop { .. } => {}
            other => panic!("expected drop, got {:?}", other),
        }
    }

    #[test]
    fn missing_size_is_small_and_flagged() {
        match plan_route(&event("buckets/tenant-a/doc.md", None, "create")) {
            RoutePlan::Publish { tier, message, size_missing } => {
                assert_eq!(tier, SizeTier::Small);
                assert_eq!(message.size, 0);
                assert!(size_missing);
            }
            other => panic!("expected publish, got {:?}", other),
        }
    }

    #[test]
    fn hint_follows_extension() {
        assert_eq!(content_type_hint("a/b/doc.md").as_deref(), Some("text/markdown"));
        assert_eq!(content_type_hint("a/b/data.csv").as_deref(), Some("text/csv"));
        assert_eq!(content_type_hint("a/b/blob.bin"), None);
    }
}

use ingestion_service::handlers::{extension, file_name, ParserRegistry};
use ingestion_service::models::{BusMessage, ObjectStoreEvent, SizeTier};
use rem_store::Resource;

#[test]
fn registry_routes_markdown_to_text_parser() {
    let registry = ParserRegistry::with_defaults();
    let parser = registry.for_uri("buckets/tenant-a/notes/today.md").expect("parser");
    assert_eq!(parser.format(), "text");

    let parsed = parser
        .parse(b"# Today\n\nShipped the ingestion worker.", "buckets/tenant-a/notes/today.md", 25_000)
        .expect("parse");
    assert_eq!(parsed.chunks.len(), 1);
    assert!(parsed.chunks[0].text.contains("ingestion worker"));
}

#[test]
fn unknown_extension_has_no_parser() {
    let registry = ParserRegistry::with_defaults();
    assert!(registry.for_uri("buckets/tenant-a/audio/call.wav").is_none());
}

#[test]
fn chunk_rows_are_stable_across_reprocessing() {
    let registry = ParserRegistry::with_defaults();
    let parser = registry.for_uri("buckets/tenant-a/big.txt").unwrap();
    let body = "lorem ipsum dolor sit amet ".repeat(50);

    let first = parser.parse(body.as_bytes(), "buckets/tenant-a/big.txt", 25).unwrap();
    let second = parser.parse(body.as_bytes(), "buckets/tenant-a/big.txt", 25).unwrap();
    assert_eq!(first.chunks.len(), second.chunks.len());

    for (a, b) in first.chunks.iter().zip(second.chunks.iter()) {
        assert_eq!(a.text, b.text);
    }

    // Row ids are addressed by (tenant, uri, index), so a redelivered event
    // upserts the same rows instead of duplicating them.
    let ids: Vec<_> = (0..first.chunks.len())
        .map(|i| Resource::chunk_id("tenant-a", "buckets/tenant-a/big.txt", i))
        .collect();
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(ids, deduped);
}

#[test]
fn bus_message_wire_format() {
    let raw = serde_json::json!({
        "tenant_id": "tenant-a",
        "uri": "buckets/tenant-a/doc.md",
        "size": 5000,
        "content_type_hint": "text/markdown",
        "timestamp": "2025-06-01T09:00:00Z",
        "trace_id": "3e0aa3f5-8a93-4a5e-8c65-5a1f0e2b9c11"
    });
    let message: BusMessage = serde_json::from_value(raw).expect("decode");
    assert_eq!(message.tenant_id, "tenant-a");
    assert_eq!(message.size, 5000);

    // hint is optional on the wire
    let without_hint = serde_json::json!({
        "tenant_id": "tenant-a",
        "uri": "buckets/tenant-a/doc.bin",
        "size": 1,
        "timestamp": "2025-06-01T09:00:00Z",
        "trace_id": "t"
    });
    let message: BusMessage = serde_json::from_value(without_hint).expect("decode");
    assert!(message.content_type_hint.is_none());
}

#[test]
fn object_store_event_tolerates_missing_size() {
    let raw = serde_json::json!({
        "path": "buckets/tenant-a/doc.md",
        "timestamp": "2025-06-01T09:00:00Z",
        "event_type": "create"
    });
    let event: ObjectStoreEvent = serde_json::from_value(raw).expect("decode");
    assert_eq!(event.size, None);
    assert_eq!(SizeTier::classify(event.size.unwrap_or(0)), SizeTier::Small);
}

#[test]
fn uri_helpers() {
    assert_eq!(file_name("buckets/tenant-a/docs/spec.md"), "spec.md");
    assert_eq!(extension("buckets/tenant-a/docs/spec.md").as_deref(), Some("md"));
}

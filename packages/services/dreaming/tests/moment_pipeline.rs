use chrono::{Duration, TimeZone, Utc};
use dreaming_service::models::{moment_id, MomentDraft};
use rem_store::{merge_graph_paths, InlineEdge, MomentType};
use uuid::Uuid;

fn sample_extraction_output() -> serde_json::Value {
    serde_json::json!({
        "moments": [
            {
                "name": "architecture review",
                "summary": "Walked through the ingestion tiers and agreed on ack ordering.",
                "moment_type": "meeting",
                "starts_at": "2025-06-01T09:00:00Z",
                "ends_at": "2025-06-01T09:45:00Z",
                "emotion_tags": ["engaged"],
                "topic_tags": ["architecture", "ingestion"],
                "present_persons": {
                    "fp-a1": { "id": "spk-1", "label": "Alice" }
                },
                "speakers": [
                    { "text": "let's start with the router", "speaker_id": "spk-1", "timestamp": "2025-06-01T09:01:00Z" },
                    { "text": "ack must come last", "speaker_id": "spk-2", "timestamp": "2025-06-01T09:20:00Z", "emotion": "firm" }
                ]
            },
            {
                "name": "hallway chat",
                "summary": "Quick unstructured exchange.",
                "starts_at": "2025-06-01T10:00:00Z",
                "ends_at": "2025-06-01T10:05:00Z"
            }
        ]
    })
}

#[test]
fn extraction_output_matches_the_declared_schema() {
    #[derive(serde::Deserialize)]
    struct Output {
        moments: Vec<MomentDraft>,
    }
    let output: Output = serde_json::from_value(sample_extraction_output()).expect("decode");
    assert_eq!(output.moments.len(), 2);
    assert!(output.moments[0].check_bounds().is_ok());
    // Optional fields default sanely
    assert!(output.moments[1].moment_type.is_none());
    assert!(output.moments[1].speakers.is_empty());
}

#[test]
fn drafts_become_valid_moment_rows() {
    #[derive(serde::Deserialize)]
    struct Output {
        moments: Vec<MomentDraft>,
    }
    let output: Output = serde_json::from_value(sample_extraction_output()).unwrap();
    let source = Uuid::new_v4();

    for (index, draft) in output.moments.into_iter().enumerate() {
        let moment = draft.into_moment("tenant-a", "buckets/tenant-a/call.txt", source, index);
        // Every row the extractor persists must already satisfy the
        // temporal and speaker invariants.
        moment.validate().expect("moment invariants");
        assert_eq!(moment.tenant_id, "tenant-a");
        assert!(moment.summary.is_some());
    }
}

#[test]
fn unregistered_speaker_is_normalized_not_rejected() {
    #[derive(serde::Deserialize)]
    struct Output {
        moments: Vec<MomentDraft>,
    }
    let output: Output = serde_json::from_value(sample_extraction_output()).unwrap();
    // spk-2 speaks but only spk-1 is registered in present_persons.
    let moment = output.moments.into_iter().next().unwrap().into_moment(
        "tenant-a",
        "buckets/tenant-a/call.txt",
        Uuid::new_v4(),
        0,
    );
    assert!(moment.present_persons.values().any(|p| p.id == "spk-2"));
    assert!(moment.validate().is_ok());
    assert_eq!(moment.moment_type, MomentType::Meeting);
}

#[test]
fn rerunning_extraction_targets_the_same_rows() {
    let source = Uuid::new_v4();
    assert_eq!(moment_id("tenant-a", source, 0), moment_id("tenant-a", source, 0));
    assert_ne!(moment_id("tenant-a", source, 0), moment_id("tenant-b", source, 0));
}

#[test]
fn affinity_edge_merge_has_set_semantics() {
    let edges = vec![
        InlineEdge::new("Deep Learning Fundamentals", "see_also", 0.82).with_entity_type("resource"),
        InlineEdge::new("Intro to ML", "see_also", 0.79).with_entity_type("resource"),
    ];

    let mut paths = Vec::new();
    let first = merge_graph_paths(&mut paths, edges.clone());
    let second = merge_graph_paths(&mut paths, edges);
    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(paths.len(), 2);
}

#[test]
fn bounds_band_rejects_day_spanning_moments() {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let draft = MomentDraft {
        name: "endless".into(),
        summary: "suspiciously long".into(),
        moment_type: None,
        starts_at: start,
        ends_at: start + Duration::hours(48),
        emotion_tags: vec![],
        topic_tags: vec![],
        present_persons: Default::default(),
        speakers: vec![],
        location: String::new(),
        background_sounds: String::new(),
    };
    assert!(draft.check_bounds().is_err());
}

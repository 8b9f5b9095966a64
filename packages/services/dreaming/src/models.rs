use chrono::{DateTime, Duration, Utc};
use rem_store::{Moment, MomentType, PresentPerson, SpeakerTurn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const JOB_MOMENTS: &str = "moments";
pub const JOB_AFFINITY: &str = "affinity";

/// Longest segment a single Moment may span. Anything wider is a model
/// hallucination, not an experience.
pub const MAX_MOMENT_DURATION_HOURS: i64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum DreamingError {
    #[error("store error: {0}")]
    Store(#[from] rem_store::StoreError),

    #[error("model service error: {0}")]
    Llm(String),

    #[error("model output failed schema check: {0}")]
    SchemaViolation(String),

    #[error("embeddings service error: {0}")]
    Embeddings(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run for {tenant_id}/{job} needs operator attention after {retries} failures")]
    RetriesExhausted { tenant_id: String, job: String, retries: i32 },

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, DreamingError>;

/// Speaker turn as the extraction model emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSpeakerTurn {
    pub text: String,
    pub speaker_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub emotion: Option<String>,
}

/// One Moment as returned by the extraction model, before validation and
/// normalization. The declared output schema the client enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentDraft {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub moment_type: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub present_persons: HashMap<String, PresentPerson>,
    #[serde(default)]
    pub speakers: Vec<DraftSpeakerTurn>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub background_sounds: String,
}

impl MomentDraft {
    /// Temporal sanity: start before end, duration inside the band.
    pub fn check_bounds(&self) -> std::result::Result<(), String> {
        if self.ends_at < self.starts_at {
            return Err(format!("ends {} before it starts {}", self.ends_at, self.starts_at));
        }
        let max = Duration::hours(MAX_MOMENT_DURATION_HOURS);
        if self.ends_at - self.starts_at > max {
            return Err(format!(
                "duration {} exceeds the {}h band",
                self.ends_at - self.starts_at,
                MAX_MOMENT_DURATION_HOURS
            ));
        }
        Ok(())
    }

    /// Turn a validated draft into a Moment row. Speaker ids the model
    /// forgot to register are normalized into present_persons, and turn
    /// timestamps are clamped into the segment bounds, so the row-level
    /// invariants hold by construction.
    pub fn into_moment(
        mut self,
        tenant_id: &str,
        source_uri: &str,
        source_resource: Uuid,
        index: usize,
    ) -> Moment {
        for turn in &self.speakers {
            let registered = self.present_persons.values().any(|p| p.id == turn.speaker_id);
            if !registered {
                self.present_persons.insert(
                    turn.speaker_id.clone(),
                    PresentPerson { id: turn.speaker_id.clone(), label: turn.speaker_id.clone() },
                );
            }
        }

        let starts_at = self.starts_at;
        let ends_at = self.ends_at;
        let speakers: Vec<SpeakerTurn> = self
            .speakers
            .into_iter()
            .map(|turn| SpeakerTurn {
                text: turn.text,
                speaker_id: turn.speaker_id,
                timestamp: turn.timestamp.clamp(starts_at, ends_at),
                emotion: turn.emotion,
            })
            .collect();

        let content = speakers
            .iter()
            .map(|t| format!("{}: {}", t.speaker_id, t.text))
            .collect::<Vec<_>>()
            .join("\n");
        let now = Utc::now();

        Moment {
            id: moment_id(tenant_id, source_resource, index),
            tenant_id: tenant_id.to_string(),
            name: self.name,
            category: "moment".to_string(),
            content: if content.is_empty() { self.summary.clone() } else { content },
            summary: Some(self.summary),
            uri: format!("dreaming://{}/{}", tenant_id, source_resource),
            resource_timestamp: starts_at,
            resource_ends_timestamp: ends_at,
            moment_type: self
                .moment_type
                .as_deref()
                .map(MomentType::parse)
                .unwrap_or(MomentType::Unknown),
            emotion_tags: self.emotion_tags,
            topic_tags: self.topic_tags,
            present_persons: self.present_persons,
            speakers,
            location: self.location,
            background_sounds: self.background_sounds,
            metadata: HashMap::from([
                ("source_resource".to_string(), serde_json::json!(source_resource)),
                ("source_uri".to_string(), serde_json::json!(source_uri)),
            ]),
            graph_paths: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic moment id: rerunning extraction over the same resource
/// upserts the same rows.
pub fn moment_id(tenant_id: &str, source_resource: Uuid, index: usize) -> Uuid {
    let input = format!("{}\nmoment:{}\n{}", tenant_id, source_resource, index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, input.as_bytes())
}

/// Relationship the affinity LLM mode assigns to a pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityVerdict {
    pub rel_type: String,
    pub weight: f32,
    #[serde(default)]
    pub related: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft() -> MomentDraft {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        MomentDraft {
            name: "standup".into(),
            summary: "daily sync".into(),
            moment_type: Some("meeting".into()),
            starts_at: start,
            ends_at: start + Duration::minutes(30),
            emotion_tags: vec!["focused".into()],
            topic_tags: vec!["planning".into()],
            present_persons: HashMap::new(),
            speakers: vec![DraftSpeakerTurn {
                text: "shipped the worker".into(),
                speaker_id: "spk-1".into(),
                timestamp: start + Duration::minutes(65),
                emotion: None,
            }],
            location: String::new(),
            background_sounds: String::new(),
        }
    }

    #[test]
    fn bounds_check_rejects_inverted_times() {
        let mut d = draft();
        d.ends_at = d.starts_at - Duration::seconds(1);
        assert!(d.check_bounds().is_err());
    }

    #[test]
    fn bounds_check_rejects_week_long_moments() {
        let mut d = draft();
        d.ends_at = d.starts_at + Duration::hours(25);
        assert!(d.check_bounds().is_err());
    }

    #[test]
    fn normalization_makes_the_row_valid() {
        // The draft has an unregistered speaker and an out-of-bounds turn
        // timestamp; into_moment must repair both.
        let d = draft();
        let source = Uuid::new_v4();
        let moment = d.into_moment("tenant-a", "buckets/tenant-a/call.txt", source, 0);
        assert!(moment.validate().is_ok());
        assert!(moment.present_persons.values().any(|p| p.id == "spk-1"));
        assert!(moment.speakers[0].timestamp <= moment.resource_ends_timestamp);
    }

    #[test]
    fn moment_ids_are_deterministic() {
        let source = Uuid::new_v4();
        assert_eq!(moment_id("t", source, 0), moment_id("t", source, 0));
        assert_ne!(moment_id("t", source, 0), moment_id("t", source, 1));
    }
}

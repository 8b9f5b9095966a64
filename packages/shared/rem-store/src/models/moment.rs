use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::InlineEdge;

/// Classification of a time-bounded segment. Open set: unrecognized values
/// deserialize to Unknown rather than failing the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MomentType {
    Conversation,
    Meeting,
    Planning,
    Reflection,
    Observation,
    #[serde(other)]
    Unknown,
}

impl MomentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MomentType::Conversation => "conversation",
            MomentType::Meeting => "meeting",
            MomentType::Planning => "planning",
            MomentType::Reflection => "reflection",
            MomentType::Observation => "observation",
            MomentType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "conversation" => MomentType::Conversation,
            "meeting" => MomentType::Meeting,
            "planning" => MomentType::Planning,
            "reflection" => MomentType::Reflection,
            "observation" => MomentType::Observation,
            _ => MomentType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresentPerson {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub text: String,
    pub speaker_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub emotion: Option<String>,
}

/// A Resource subtype representing a time-bounded segment of experience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moment {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub category: String,
    pub content: String,
    pub summary: Option<String>,
    pub uri: String,
    pub resource_timestamp: DateTime<Utc>,
    pub resource_ends_timestamp: DateTime<Utc>,
    pub moment_type: MomentType,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    /// speaker fingerprint -> {id, label}
    #[serde(default)]
    pub present_persons: HashMap<String, PresentPerson>,
    #[serde(default)]
    pub speakers: Vec<SpeakerTurn>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub background_sounds: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub graph_paths: Vec<InlineEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Moment {
    /// Enforces the temporal and speaker invariants before a row is written:
    /// start <= end, every turn timestamp inside [start, end], and every
    /// speaker_id registered in present_persons.
    pub fn validate(&self) -> Result<()> {
        if self.resource_ends_timestamp < self.resource_timestamp {
            return Err(StoreError::InvalidMoment(format!(
                "ends {} before it starts {}",
                self.resource_ends_timestamp, self.resource_timestamp
            )));
        }
        let known: std::collections::HashSet<&str> = self
            .present_persons
            .values()
            .map(|p| p.id.as_str())
            .collect();
        for turn in &self.speakers {
            if turn.timestamp < self.resource_timestamp
                || turn.timestamp > self.resource_ends_timestamp
            {
                return Err(StoreError::InvalidMoment(format!(
                    "speaker turn at {} outside moment bounds",
                    turn.timestamp
                )));
            }
            if !known.contains(turn.speaker_id.as_str()) {
                return Err(StoreError::InvalidMoment(format!(
                    "speaker_id {} not in present_persons",
                    turn.speaker_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_moment() -> Moment {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        Moment {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            name: "standup".into(),
            category: "moment".into(),
            content: "daily standup".into(),
            summary: None,
            uri: "dreaming://tenant-a/standup".into(),
            resource_timestamp: start,
            resource_ends_timestamp: end,
            moment_type: MomentType::Meeting,
            emotion_tags: vec!["focused".into()],
            topic_tags: vec!["planning".into()],
            present_persons: HashMap::from([(
                "fp-1".to_string(),
                PresentPerson { id: "spk-1".into(), label: "Alice".into() },
            )]),
            speakers: vec![SpeakerTurn {
                text: "yesterday I shipped the parser".into(),
                speaker_id: "spk-1".into(),
                timestamp: start + chrono::Duration::minutes(5),
                emotion: None,
            }],
            location: String::new(),
            background_sounds: String::new(),
            metadata: HashMap::new(),
            graph_paths: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_moment_passes() {
        assert!(base_moment().validate().is_ok());
    }

    #[test]
    fn rejects_end_before_start() {
        let mut m = base_moment();
        m.resource_ends_timestamp = m.resource_timestamp - chrono::Duration::seconds(1);
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_turn_outside_bounds() {
        let mut m = base_moment();
        m.speakers[0].timestamp = m.resource_ends_timestamp + chrono::Duration::minutes(1);
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_unknown_speaker() {
        let mut m = base_moment();
        m.speakers[0].speaker_id = "spk-ghost".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn moment_type_is_an_open_set() {
        assert_eq!(MomentType::parse("meeting"), MomentType::Meeting);
        assert_eq!(MomentType::parse("interpretive-dance"), MomentType::Unknown);
        let parsed: MomentType = serde_json::from_str("\"daydream\"").unwrap();
        assert_eq!(parsed, MomentType::Unknown);
    }
}

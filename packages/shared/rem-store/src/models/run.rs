use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DreamRunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    SkippedEmpty,
}

impl DreamRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DreamRunState::Queued => "queued",
            DreamRunState::Running => "running",
            DreamRunState::Succeeded => "succeeded",
            DreamRunState::Failed => "failed",
            DreamRunState::SkippedEmpty => "skipped-empty",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => DreamRunState::Queued,
            "running" => DreamRunState::Running,
            "succeeded" => DreamRunState::Succeeded,
            "failed" => DreamRunState::Failed,
            "skipped-empty" => DreamRunState::SkippedEmpty,
            _ => DreamRunState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DreamRunState::Succeeded | DreamRunState::Failed | DreamRunState::SkippedEmpty
        )
    }
}

/// One dreaming job execution. Transitions are persisted so a restarted
/// scheduler can see what already ran and what needs operator attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamRun {
    pub id: Uuid,
    pub tenant_id: String,
    pub job: String,
    pub state: DreamRunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub moments_created: i64,
    pub edges_created: i64,
    pub retries: i32,
    pub last_error: Option<String>,
}

impl DreamRun {
    pub fn new(tenant_id: &str, job: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            job: job.to_string(),
            state: DreamRunState::Queued,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
            moments_created: 0,
            edges_created: 0,
            retries: 0,
            last_error: None,
        }
    }

    pub fn start(&mut self) {
        self.state = DreamRunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, moments_created: i64, edges_created: i64) {
        self.state = DreamRunState::Succeeded;
        self.moments_created = moments_created;
        self.edges_created = edges_created;
        self.finished_at = Some(Utc::now());
    }

    pub fn skip_empty(&mut self) {
        self.state = DreamRunState::SkippedEmpty;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str, prior_retries: i32) {
        self.state = DreamRunState::Failed;
        self.last_error = Some(error.to_string());
        self.retries = prior_retries + 1;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut run = DreamRun::new("tenant-a", "moments");
        assert_eq!(run.state, DreamRunState::Queued);
        assert!(!run.state.is_terminal());

        run.start();
        assert_eq!(run.state, DreamRunState::Running);
        assert!(run.started_at.is_some());

        run.succeed(3, 0);
        assert_eq!(run.state, DreamRunState::Succeeded);
        assert!(run.state.is_terminal());
        assert_eq!(run.moments_created, 3);
    }

    #[test]
    fn empty_window_is_a_success_shape() {
        let mut run = DreamRun::new("tenant-a", "moments");
        run.start();
        run.skip_empty();
        assert_eq!(run.state, DreamRunState::SkippedEmpty);
        assert_eq!(run.moments_created, 0);
    }

    #[test]
    fn failures_accumulate_retries() {
        let mut run = DreamRun::new("tenant-a", "affinity");
        run.start();
        run.fail("llm unreachable", 2);
        assert_eq!(run.state, DreamRunState::Failed);
        assert_eq!(run.retries, 3);
        assert!(run.last_error.as_deref().unwrap().contains("llm"));
    }

    #[test]
    fn state_string_round_trip() {
        for state in [
            DreamRunState::Queued,
            DreamRunState::Running,
            DreamRunState::Succeeded,
            DreamRunState::Failed,
            DreamRunState::SkippedEmpty,
        ] {
            assert_eq!(DreamRunState::parse(state.as_str()), state);
        }
    }
}

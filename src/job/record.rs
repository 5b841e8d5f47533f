use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cost::TokenUsage;
use crate::error::{FailureKind, GenerationError};
use crate::request::JobType;

/// Lifecycle of a generation job. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a job failed, in user-facing terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&GenerationError> for JobFailure {
    fn from(err: &GenerationError) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Persisted progress record for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub document_id: String,
    pub job_type: JobType,
    pub state: JobState,
    /// 0-100, never decreases.
    pub progress: u8,
    /// Present iff `state == Failed`.
    pub error: Option<JobFailure>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn new(document_id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: document_id.into(),
            job_type,
            state: JobState::Queued,
            progress: 0,
            error: None,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            state: self.state,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    pub progress: u8,
    pub error: Option<JobFailure>,
}

/// `floor(100 * done / total)`; an empty job is fully done.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = done.min(total) * 100 / total;
    pct as u8
}

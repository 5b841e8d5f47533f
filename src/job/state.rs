use chrono::Utc;

use super::record::{GenerationJob, JobFailure, JobState};
use crate::cost::TokenUsage;

/// Something the executor reports about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started,
    Progressed(u8),
    Completed { usage: TokenUsage, cost_usd: f64 },
    Failed(JobFailure),
}

/// The result of applying a [`JobEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job moved to a new state.
    Moved { from: JobState, to: JobState },
    /// Progress advanced while running.
    Progressed(u8),
    /// The event did not apply (terminal job, stale progress, wrong state).
    Ignored,
}

/// Drives a [`GenerationJob`] through `queued → running → completed | failed`.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job` in place.
    ///
    /// - `Started` moves a queued job to running and stamps `started_at`.
    /// - `Progressed` only ever raises progress, and only while running.
    /// - `Completed`/`Failed` stamp `completed_at` once; terminal states absorb
    ///   every later event.
    pub fn apply(job: &mut GenerationJob, event: JobEvent) -> Transition {
        if job.state.is_terminal() {
            return Transition::Ignored;
        }

        match (job.state, event) {
            (JobState::Queued, JobEvent::Started) => {
                job.started_at = Some(Utc::now());
                Self::moved(job, JobState::Running)
            }
            (JobState::Running, JobEvent::Progressed(pct)) => {
                let pct = pct.min(100);
                if pct > job.progress {
                    job.progress = pct;
                    Transition::Progressed(pct)
                } else {
                    Transition::Ignored
                }
            }
            (JobState::Running, JobEvent::Completed { usage, cost_usd }) => {
                job.progress = 100;
                job.usage = usage;
                job.cost_usd = cost_usd;
                job.completed_at = Some(Utc::now());
                Self::moved(job, JobState::Completed)
            }
            (_, JobEvent::Failed(failure)) => {
                job.error = Some(failure);
                job.completed_at = Some(Utc::now());
                Self::moved(job, JobState::Failed)
            }
            _ => Transition::Ignored,
        }
    }

    fn moved(job: &mut GenerationJob, to: JobState) -> Transition {
        let from = job.state;
        job.state = to;
        Transition::Moved { from, to }
    }
}

mod record;
mod state;
mod store;

pub use record::{GenerationJob, JobFailure, JobState, JobStatus, progress_percent};
pub use state::{JobEvent, StateMachine, Transition};
pub use store::{InMemoryJobStore, JobStore};

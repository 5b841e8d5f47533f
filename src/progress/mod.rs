pub mod broadcaster;
pub mod event;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use event::{ProgressEnvelope, ProgressEvent, SectionPayload};

/// Where the section loop reports progress.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Publishes one job's events to every live subscriber of its owner key.
pub struct OwnerSink {
    broadcaster: Arc<ProgressBroadcaster>,
    owner: String,
    job_id: Uuid,
}

impl OwnerSink {
    pub fn new(
        broadcaster: Arc<ProgressBroadcaster>,
        owner: impl Into<String>,
        job_id: Uuid,
    ) -> Self {
        Self {
            broadcaster,
            owner: owner.into(),
            job_id,
        }
    }
}

impl ProgressSink for OwnerSink {
    fn emit(&self, event: ProgressEvent) {
        let envelope = ProgressEnvelope::new(self.job_id, event);
        self.broadcaster.publish(&self.owner, &envelope);
    }
}

/// Single-consumer stream: start, one event per section, then complete or
/// error. Intermediate progress ticks are left to the broadcast mode.
pub struct StreamSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl StreamSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for StreamSink {
    fn emit(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::Progress { .. }) {
            return;
        }
        // A dropped consumer must not stop the job.
        let _ = self.tx.send(event);
    }
}

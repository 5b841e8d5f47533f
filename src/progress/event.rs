//! Wire schema for live progress events.
//!
//! Each event is one JSON object tagged by `type`. Consumers must ignore
//! fields they do not know.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cost::TokenUsage;
use crate::error::FailureKind;
use crate::provider::ModelId;
use crate::quality::QualityReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        total_sections: usize,
    },
    Progress {
        index: usize,
        title: String,
        percent: u8,
    },
    Section {
        index: usize,
        title: String,
        payload: SectionPayload,
    },
    Error {
        index: usize,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<FailureKind>,
    },
    Complete {
        total_sections: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPayload {
    pub content: String,
    pub attempts: u32,
    pub model: ModelId,
    pub usage: TokenUsage,
    pub quality: QualityReport,
}

/// A broadcast event stamped with the job that produced it.
///
/// On the wire this is the event object with an extra `job_id` field, so
/// one owner can tell concurrent jobs apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

impl ProgressEnvelope {
    pub fn new(job_id: Uuid, event: ProgressEvent) -> Self {
        Self { job_id, event }
    }

    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ProgressEvent {
    /// `complete` and `error` end a run; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    pub fn section_index(&self) -> Option<usize> {
        match self {
            ProgressEvent::Progress { index, .. }
            | ProgressEvent::Section { index, .. }
            | ProgressEvent::Error { index, .. } => Some(*index),
            ProgressEvent::Start { .. } | ProgressEvent::Complete { .. } => None,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

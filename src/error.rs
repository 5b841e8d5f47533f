use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of a failed call, used by the circuit breaker to decide
/// whether a failure says something about provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Server,
    Network,
    Timeout,
    /// 4xx-style problems with the request itself.
    Client,
    Configuration,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Client => "client",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors that can pass through a circuit breaker report their kind.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Terminal failures of a generation run, as seen by the job executor.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("all providers failed for {primary} (tried {}): {last_error}", attempted.join(", "))]
    AllProvidersFailed {
        primary: String,
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("quality not met for section {section:?} after {attempts} attempts: {reasons}")]
    QualityNotMet {
        section: String,
        attempts: u32,
        reasons: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl GenerationError {
    /// The user-visible classification recorded on a failed job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GenerationError::AllProvidersFailed { .. } => FailureKind::ProviderUnavailable,
            GenerationError::QualityNotMet { .. } => FailureKind::QualityNotMet,
            GenerationError::JobNotFound(_) | GenerationError::Unexpected(_) => {
                FailureKind::Unexpected
            }
        }
    }
}

/// Classifies a job failure for the status API. Each kind implies a different
/// remediation: retry later, manual review/refund, or investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Primary model and every fallback exhausted their retry budgets.
    ProviderUnavailable,
    /// Generated text kept failing the quality gate.
    QualityNotMet,
    /// Anything unclassified; never retried.
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ProviderUnavailable => write!(f, "Provider unavailable"),
            FailureKind::QualityNotMet => write!(f, "Quality not met"),
            FailureKind::Unexpected => write!(f, "Unexpected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_providers_failed_display_lists_models() {
        let err = GenerationError::AllProvidersFailed {
            primary: "anthropic/claude-opus-4-6".into(),
            attempted: vec![
                "anthropic/claude-opus-4-6".into(),
                "anthropic/claude-sonnet-4-5".into(),
            ],
            last_error: "request timed out after 120s".into(),
        };
        assert_eq!(
            err.to_string(),
            "all providers failed for anthropic/claude-opus-4-6 \
             (tried anthropic/claude-opus-4-6, anthropic/claude-sonnet-4-5): \
             request timed out after 120s"
        );
    }

    #[test]
    fn failure_kind_mapping() {
        let quality = GenerationError::QualityNotMet {
            section: "Intro".into(),
            attempts: 3,
            reasons: "ai probability 0.91 > 0.50".into(),
        };
        assert_eq!(quality.failure_kind(), FailureKind::QualityNotMet);
        assert_eq!(
            GenerationError::Unexpected("boom".into()).failure_kind(),
            FailureKind::Unexpected
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, r#""rate_limited""#);
        let kind: ErrorKind = serde_json::from_str(r#""timeout""#).unwrap();
        assert_eq!(kind, ErrorKind::Timeout);
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::ProviderUnavailable.to_string(), "Provider unavailable");
        assert_eq!(FailureKind::QualityNotMet.to_string(), "Quality not met");
    }

    #[test]
    fn generation_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GenerationError>();
    }
}

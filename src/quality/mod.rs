//! Quality gate over generated text.
//!
//! Up to three independent external signals (grammar, plagiarism, AI
//! detection) are measured. A signal whose check call fails is recorded as
//! unknown and never causes a rejection on its own.

pub mod languagetool;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use languagetool::LanguageToolCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Number of grammar errors found.
    Grammar,
    /// Uniqueness percentage, 0-100.
    Plagiarism,
    /// Probability the text is machine-written, 0-1.
    AiDetection,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("check service unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("check service returned status {status}: {message}")]
    Service { status: u16, message: String },

    #[error("malformed check response: {0}")]
    Malformed(String),
}

/// One external scoring service.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    fn kind(&self) -> SignalKind;

    async fn measure(&self, text: &str, language: &str) -> Result<f64, CheckError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default)]
    pub max_grammar_errors: Option<u32>,
    #[serde(default)]
    pub min_uniqueness: Option<f64>,
    #[serde(default)]
    pub max_ai_probability: Option<f64>,
    /// Regenerations allowed after the first attempt. Independent of the
    /// provider retry budget.
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
}

fn default_max_regenerations() -> u32 {
    2
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_grammar_errors: None,
            min_uniqueness: None,
            max_ai_probability: None,
            max_regenerations: default_max_regenerations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalOutcome {
    NotConfigured,
    Unknown { reason: String },
    Measured { value: f64 },
}

impl SignalOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            SignalOutcome::Measured { value } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Regenerate { reasons: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub grammar_errors: SignalOutcome,
    pub uniqueness: SignalOutcome,
    pub ai_probability: SignalOutcome,
    pub verdict: Verdict,
}

impl QualityReport {
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }

    pub fn reasons(&self) -> &[String] {
        match &self.verdict {
            Verdict::Accept => &[],
            Verdict::Regenerate { reasons } => reasons,
        }
    }
}

#[derive(Clone, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
    checks: Vec<Arc<dyn QualityCheck>>,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn QualityCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn max_regenerations(&self) -> u32 {
        self.thresholds.max_regenerations
    }

    pub async fn evaluate(&self, text: &str, language: &str) -> QualityReport {
        let grammar_errors = self.measure(SignalKind::Grammar, text, language).await;
        let uniqueness = self.measure(SignalKind::Plagiarism, text, language).await;
        let ai_probability = self.measure(SignalKind::AiDetection, text, language).await;

        let mut reasons = Vec::new();
        let thresholds = &self.thresholds;
        if let (Some(max), Some(found)) = (thresholds.max_grammar_errors, grammar_errors.value())
            && found > f64::from(max)
        {
            reasons.push(format!("{found} grammar errors > {max} allowed"));
        }
        if let (Some(min), Some(found)) = (thresholds.min_uniqueness, uniqueness.value())
            && found < min
        {
            reasons.push(format!("uniqueness {found:.1}% < {min:.1}% required"));
        }
        if let (Some(max), Some(found)) = (thresholds.max_ai_probability, ai_probability.value())
            && found > max
        {
            reasons.push(format!("ai probability {found:.2} > {max:.2} allowed"));
        }

        let verdict = if reasons.is_empty() {
            Verdict::Accept
        } else {
            Verdict::Regenerate { reasons }
        };

        QualityReport {
            grammar_errors,
            uniqueness,
            ai_probability,
            verdict,
        }
    }

    async fn measure(&self, kind: SignalKind, text: &str, language: &str) -> SignalOutcome {
        let Some(check) = self.checks.iter().find(|c| c.kind() == kind) else {
            return SignalOutcome::NotConfigured;
        };
        match check.measure(text, language).await {
            Ok(value) => {
                debug!(signal = ?kind, value, "quality signal measured");
                SignalOutcome::Measured { value }
            }
            Err(e) => {
                warn!(
                    signal = ?kind,
                    error = %e,
                    "quality check failed, treating signal as unknown"
                );
                SignalOutcome::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FixedCheck;
    use super::*;

    fn strict() -> QualityThresholds {
        QualityThresholds {
            max_grammar_errors: Some(3),
            min_uniqueness: Some(85.0),
            max_ai_probability: Some(0.5),
            max_regenerations: 2,
        }
    }

    #[tokio::test]
    async fn unknown_plagiarism_signal_does_not_reject() {
        let gate = QualityGate::new(strict())
            .with_check(FixedCheck::arc(SignalKind::Grammar, Some(1.0)))
            .with_check(FixedCheck::arc(SignalKind::Plagiarism, None))
            .with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.2)));

        let report = gate.evaluate("text", "en").await;
        assert!(report.is_accepted());
        assert!(matches!(report.uniqueness, SignalOutcome::Unknown { .. }));
        assert_eq!(report.grammar_errors.value(), Some(1.0));
    }

    #[tokio::test]
    async fn failing_signals_are_all_reported() {
        let gate = QualityGate::new(strict())
            .with_check(FixedCheck::arc(SignalKind::Grammar, Some(7.0)))
            .with_check(FixedCheck::arc(SignalKind::Plagiarism, Some(60.0)))
            .with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.9)));

        let report = gate.evaluate("text", "en").await;
        assert!(!report.is_accepted());
        assert_eq!(
            report.reasons(),
            &[
                "7 grammar errors > 3 allowed".to_string(),
                "uniqueness 60.0% < 85.0% required".to_string(),
                "ai probability 0.90 > 0.50 allowed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn thresholds_are_inclusive_bounds() {
        let gate = QualityGate::new(strict())
            .with_check(FixedCheck::arc(SignalKind::Grammar, Some(3.0)))
            .with_check(FixedCheck::arc(SignalKind::Plagiarism, Some(85.0)))
            .with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.5)));
        assert!(gate.evaluate("text", "en").await.is_accepted());
    }

    #[tokio::test]
    async fn measured_signal_without_threshold_never_rejects() {
        let gate = QualityGate::new(QualityThresholds::default())
            .with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.99)));
        let report = gate.evaluate("text", "en").await;
        assert!(report.is_accepted());
        assert_eq!(report.grammar_errors, SignalOutcome::NotConfigured);
        assert_eq!(report.ai_probability.value(), Some(0.99));
    }

    #[test]
    fn report_serializes_with_tags() {
        let report = QualityReport {
            grammar_errors: SignalOutcome::Measured { value: 2.0 },
            uniqueness: SignalOutcome::Unknown {
                reason: "timeout".into(),
            },
            ai_probability: SignalOutcome::NotConfigured,
            verdict: Verdict::Accept,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["grammar_errors"]["status"], "measured");
        assert_eq!(json["uniqueness"]["reason"], "timeout");
        assert_eq!(json["verdict"]["decision"], "accept");
    }
}

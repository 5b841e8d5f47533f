//! Section generation: provider calls with retry and model fallback, followed
//! by the quality gate and bounded regeneration.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cost::TokenUsage;
use crate::error::GenerationError;
use crate::progress::SectionPayload;
use crate::provider::{Completion, ModelId, ProviderError, ProviderSet, complete_with_timeout};
use crate::quality::{QualityGate, QualityReport};
use crate::request::{DocumentDescriptor, SectionSpec};
use crate::resilience::{BreakerRegistry, FallbackTable, RetryPolicy, RetryStrategy};

pub use prompt::{CONTEXT_CHAR_BUDGET, build_section_prompt};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOutcome {
    Accepted,
    /// The last regeneration was still rejected by the quality gate.
    QualityRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionGenerationResult {
    pub index: usize,
    pub title: String,
    pub content: String,
    /// Model that produced `content`; may be a fallback.
    pub model: ModelId,
    /// Quality-gate attempts, starting at 1.
    pub attempt_count: u32,
    /// Summed over every attempt, rejected ones included.
    pub usage: TokenUsage,
    pub quality: QualityReport,
    pub outcome: SectionOutcome,
}

impl SectionGenerationResult {
    pub fn is_accepted(&self) -> bool {
        self.outcome == SectionOutcome::Accepted
    }

    /// Turn a quality rejection into the terminal error the executor reports.
    pub fn into_accepted(self) -> Result<Self, GenerationError> {
        match self.outcome {
            SectionOutcome::Accepted => Ok(self),
            SectionOutcome::QualityRejected => Err(GenerationError::QualityNotMet {
                section: self.title,
                attempts: self.attempt_count,
                reasons: self.quality.reasons().join("; "),
            }),
        }
    }

    pub fn payload(&self) -> SectionPayload {
        SectionPayload {
            content: self.content.clone(),
            attempts: self.attempt_count,
            model: self.model.clone(),
            usage: self.usage,
            quality: self.quality.clone(),
        }
    }
}

/// Upper bound on provider calls for one section.
///
/// Provider retries, the fallback chain and quality regenerations nest, so
/// their limits multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptBudget {
    pub max_retries: u32,
    pub chain_len: usize,
    pub max_regenerations: u32,
}

impl AttemptBudget {
    pub fn max_provider_calls_per_section(&self) -> u64 {
        u64::from(self.max_regenerations + 1)
            * self.chain_len as u64
            * u64::from(self.max_retries + 1)
    }
}

/// Generates one section at a time against the configured providers.
#[derive(Clone)]
pub struct SectionGenerator {
    providers: ProviderSet,
    fallbacks: FallbackTable,
    breakers: Arc<BreakerRegistry>,
    policy: RetryPolicy,
    call_timeout: Duration,
    gate: QualityGate,
}

impl SectionGenerator {
    pub fn new(
        providers: ProviderSet,
        fallbacks: FallbackTable,
        breakers: Arc<BreakerRegistry>,
        policy: RetryPolicy,
        gate: QualityGate,
    ) -> Self {
        Self {
            providers,
            fallbacks,
            breakers,
            policy,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            gate,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn attempt_budget(&self, primary: &ModelId) -> AttemptBudget {
        AttemptBudget {
            max_retries: self.policy.max_retries,
            chain_len: self.fallbacks.chain(primary).len(),
            max_regenerations: self.gate.max_regenerations(),
        }
    }

    /// Try `primary`, then each fallback in order, each with a fresh retry
    /// budget. Breakers are shared per provider, so an outage seen through one
    /// model is visible to every model of that provider.
    pub async fn complete_with_fallback(
        &self,
        primary: &ModelId,
        prompt: &str,
    ) -> Result<(ModelId, Completion), GenerationError> {
        let chain = self.fallbacks.chain(primary);
        let mut attempted = Vec::with_capacity(chain.len());
        let mut last_error = String::new();

        for (position, model) in chain.iter().enumerate() {
            attempted.push(model.to_string());
            if position > 0 {
                warn!(
                    primary = %primary,
                    fallback = %model,
                    previous_error = %last_error,
                    "switching to fallback model"
                );
            }

            let Some(provider) = self.providers.get(&model.provider) else {
                let err = ProviderError::UnknownProvider(model.provider.clone());
                warn!(model = %model, error = %err, "skipping model without a registered provider");
                last_error = err.to_string();
                continue;
            };

            let breaker = self.breakers.get(&model.provider);
            let strategy = RetryStrategy::with_breaker(self.policy.clone(), breaker);
            let provider = provider.as_ref();
            let deadline = self.call_timeout;
            match strategy
                .execute(|_| complete_with_timeout(provider, model, prompt, deadline))
                .await
            {
                Ok(completion) => {
                    debug!(
                        model = %model,
                        input_tokens = completion.usage.input_tokens,
                        output_tokens = completion.usage.output_tokens,
                        "completion received"
                    );
                    return Ok((model.clone(), completion));
                }
                Err(err) => last_error = err.to_string(),
            }
        }

        Err(GenerationError::AllProvidersFailed {
            primary: primary.to_string(),
            attempted,
            last_error,
        })
    }

    /// Generate section `index`, regenerating with the same prompt while the
    /// quality gate rejects it, at most `max_regenerations` times.
    ///
    /// A final rejection is returned as `Ok` with
    /// [`SectionOutcome::QualityRejected`]; provider exhaustion is an error.
    pub async fn generate(
        &self,
        doc: &DocumentDescriptor,
        index: usize,
        section: &SectionSpec,
        previous: &[SectionGenerationResult],
    ) -> Result<SectionGenerationResult, GenerationError> {
        let prompt = build_section_prompt(doc, index, section, previous);
        let max_attempts = self.gate.max_regenerations() + 1;
        let mut usage = TokenUsage::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (model, completion) = self.complete_with_fallback(&doc.model, &prompt).await?;
            usage.add(&completion.usage);
            let quality = self.gate.evaluate(&completion.text, &doc.language).await;

            let accepted = quality.is_accepted();
            if accepted || attempt >= max_attempts {
                let outcome = if accepted {
                    SectionOutcome::Accepted
                } else {
                    warn!(
                        section = %section.title,
                        attempts = attempt,
                        reasons = %quality.reasons().join("; "),
                        "regeneration budget exhausted"
                    );
                    SectionOutcome::QualityRejected
                };
                return Ok(SectionGenerationResult {
                    index,
                    title: section.title.clone(),
                    content: completion.text,
                    model,
                    attempt_count: attempt,
                    usage,
                    quality,
                    outcome,
                });
            }

            info!(
                section = %section.title,
                attempt,
                max_attempts,
                reasons = %quality.reasons().join("; "),
                "section rejected by quality gate, regenerating"
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedProvider, down, flaky, ok};
    use super::*;
    use crate::quality::test_support::FixedCheck;
    use crate::quality::{CheckError, QualityCheck, QualityThresholds, SignalKind};
    use crate::resilience::BreakerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// AI-detection scores handed out in order; the last one repeats.
    struct AiScores {
        scores: Vec<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QualityCheck for AiScores {
        fn kind(&self) -> SignalKind {
            SignalKind::AiDetection
        }

        async fn measure(&self, _text: &str, _language: &str) -> Result<f64, CheckError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores[n.min(self.scores.len() - 1)])
        }
    }

    fn id(s: &str) -> ModelId {
        s.parse().unwrap()
    }

    fn doc() -> DocumentDescriptor {
        DocumentDescriptor {
            id: "doc-1".into(),
            topic: "Tidal energy".into(),
            language: "en".into(),
            page_target: 4,
            model: id("a/m1"),
        }
    }

    fn ai_gate(max_regenerations: u32) -> QualityGate {
        QualityGate::new(QualityThresholds {
            max_ai_probability: Some(0.5),
            max_regenerations,
            ..QualityThresholds::default()
        })
    }

    fn generator(
        providers: ProviderSet,
        fallbacks: FallbackTable,
        max_retries: u32,
        gate: QualityGate,
    ) -> SectionGenerator {
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1000,
            ..BreakerConfig::default()
        }));
        SectionGenerator::new(
            providers,
            fallbacks,
            breakers,
            RetryPolicy::new(max_retries, vec![]),
            gate,
        )
    }

    #[tokio::test]
    async fn fallback_exhaustion_sums_call_counts() {
        let a = ScriptedProvider::new("a", down);
        let b = ScriptedProvider::new("b", down);
        let generator = generator(
            ProviderSet::new().with(a.clone()).with(b.clone()),
            FallbackTable::new().with(id("a/m1"), vec![id("b/m2")]),
            2,
            QualityGate::default(),
        );

        let err = generator
            .complete_with_fallback(&id("a/m1"), "prompt")
            .await
            .unwrap_err();

        assert_eq!(a.calls() + b.calls(), 3 + 3);
        match err {
            GenerationError::AllProvidersFailed {
                primary,
                attempted,
                last_error,
            } => {
                assert_eq!(primary, "a/m1");
                assert_eq!(attempted, vec!["a/m1".to_string(), "b/m2".to_string()]);
                assert!(last_error.contains("overloaded"), "{last_error}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fallback_model_answers_after_primary_is_exhausted() {
        let a = ScriptedProvider::new("a", down);
        let b = ScriptedProvider::new("b", ok);
        let generator = generator(
            ProviderSet::new().with(a.clone()).with(b.clone()),
            FallbackTable::new().with(id("a/m1"), vec![id("b/m2")]),
            2,
            QualityGate::default(),
        );

        let (model, completion) = generator
            .complete_with_fallback(&id("a/m1"), "prompt")
            .await
            .unwrap();

        assert_eq!(model, id("b/m2"));
        assert_eq!(completion.text, "generated text");
        assert_eq!((a.calls(), b.calls()), (3, 1));
    }

    #[tokio::test]
    async fn unregistered_provider_is_skipped() {
        let a = ScriptedProvider::new("a", down);
        let generator = generator(
            ProviderSet::new().with(a.clone()),
            FallbackTable::new().with(id("a/m1"), vec![id("c/x")]),
            0,
            QualityGate::default(),
        );

        let err = generator
            .complete_with_fallback(&id("a/m1"), "prompt")
            .await
            .unwrap_err();

        assert_eq!(a.calls(), 1);
        assert!(err.to_string().ends_with("unknown provider: c"), "{err}");
    }

    #[tokio::test]
    async fn rejected_section_is_regenerated_until_accepted() {
        let a = ScriptedProvider::new("a", ok);
        let gate = ai_gate(2).with_check(Arc::new(AiScores {
            scores: vec![0.9, 0.2],
            calls: AtomicUsize::new(0),
        }));
        let generator = generator(
            ProviderSet::new().with(a.clone()),
            FallbackTable::new(),
            0,
            gate,
        );

        let result = generator
            .generate(&doc(), 0, &SectionSpec::new("Intro"), &[])
            .await
            .unwrap();

        assert!(result.is_accepted());
        assert_eq!(result.attempt_count, 2);
        assert_eq!(result.usage, TokenUsage::new(20, 40));
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn worst_case_provider_calls_equal_attempt_budget() {
        let a = ScriptedProvider::new("a", down);
        let b = ScriptedProvider::new("b", flaky);
        let gate = ai_gate(2).with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.99)));
        let generator = generator(
            ProviderSet::new().with(a.clone()).with(b.clone()),
            FallbackTable::new().with(id("a/m1"), vec![id("b/m2")]),
            1,
            gate,
        );
        let budget = generator.attempt_budget(&id("a/m1"));
        assert_eq!(
            budget,
            AttemptBudget {
                max_retries: 1,
                chain_len: 2,
                max_regenerations: 2
            }
        );

        let result = generator
            .generate(&doc(), 0, &SectionSpec::new("Intro"), &[])
            .await
            .unwrap();

        assert_eq!(result.outcome, SectionOutcome::QualityRejected);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(
            u64::from(a.calls() + b.calls()),
            budget.max_provider_calls_per_section()
        );
        assert_eq!(budget.max_provider_calls_per_section(), 12);
    }

    #[tokio::test]
    async fn final_rejection_becomes_quality_not_met() {
        let a = ScriptedProvider::new("a", ok);
        let gate = ai_gate(1).with_check(FixedCheck::arc(SignalKind::AiDetection, Some(0.8)));
        let generator = generator(
            ProviderSet::new().with(a.clone()),
            FallbackTable::new(),
            0,
            gate,
        );

        let result = generator
            .generate(&doc(), 3, &SectionSpec::new("Discussion"), &[])
            .await
            .unwrap();
        assert_eq!(result.index, 3);

        match result.into_accepted() {
            Err(GenerationError::QualityNotMet {
                section,
                attempts,
                reasons,
            }) => {
                assert_eq!(section, "Discussion");
                assert_eq!(attempts, 2);
                assert_eq!(reasons, "ai probability 0.80 > 0.50 allowed");
            }
            other => panic!("expected QualityNotMet, got {other:?}"),
        }
    }

    #[test]
    fn attempt_budget_is_the_product_of_bounds() {
        let budget = AttemptBudget {
            max_retries: 3,
            chain_len: 3,
            max_regenerations: 2,
        };
        assert_eq!(budget.max_provider_calls_per_section(), 3 * 3 * 4);
    }
}

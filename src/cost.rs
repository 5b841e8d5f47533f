//! Token accounting and advisory cost estimation.
//!
//! [`estimate_cost`] is a pure function used before a run starts to size the
//! speculative spend of a document. It informs, it never gates retries.

use serde::{Deserialize, Serialize};

use crate::generation::prompt::CONTEXT_CHAR_BUDGET;
use crate::provider::ModelId;
use crate::request::{DocumentDescriptor, SectionSpec};

const WORDS_PER_PAGE: u64 = 300;
/// Fixed instruction tokens in every section prompt.
const PROMPT_OVERHEAD_TOKENS: u64 = 400;
const CHARS_PER_TOKEN: u64 = 4;

/// Token usage for a request/response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// USD per million tokens for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_million: input,
            output_cost_per_million: output,
        }
    }

    /// Known list prices, matched by model-name substring. Unknown models are
    /// priced like a mid-tier model so estimates err on the expensive side.
    pub fn for_model(model: &ModelId) -> Self {
        let m = model.model.as_str();
        match model.provider.as_str() {
            "anthropic" if m.contains("opus") => Self::new(15.0, 75.0),
            "anthropic" if m.contains("sonnet") => Self::new(3.0, 15.0),
            "anthropic" if m.contains("haiku") => Self::new(1.0, 5.0),
            "openai" if m.contains("gpt-4o-mini") => Self::new(0.15, 0.60),
            "openai" if m.contains("gpt-4o") => Self::new(2.5, 10.0),
            "ollama" => Self::new(0.0, 0.0),
            _ => Self::new(3.0, 15.0),
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let input = usage.input_tokens as f64 / 1_000_000.0 * self.input_cost_per_million;
        let output = usage.output_tokens as f64 / 1_000_000.0 * self.output_cost_per_million;
        input + output
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub sections: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost if every section is accepted on its first attempt.
    pub expected_usd: f64,
    /// Cost if every section exhausts its regeneration budget.
    pub worst_case_usd: f64,
}

/// Estimate the token volume and spend of generating `sections` for `doc`.
///
/// Sections are generated sequentially with earlier sections fed back as
/// context, so each section's input grows with the output before it, capped by
/// the prompt builder's context budget.
pub fn estimate_cost(
    doc: &DocumentDescriptor,
    sections: &[SectionSpec],
    max_regenerations: u32,
) -> CostEstimate {
    let pricing = ModelPricing::for_model(&doc.model);
    let n = sections.len() as u64;
    if n == 0 {
        return CostEstimate {
            sections: 0,
            input_tokens: 0,
            output_tokens: 0,
            expected_usd: 0.0,
            worst_case_usd: 0.0,
        };
    }

    let total_output = u64::from(doc.page_target) * WORDS_PER_PAGE * 4 / 3;
    let per_section_output = total_output.div_ceil(n);
    let context_cap = CONTEXT_CHAR_BUDGET as u64 / CHARS_PER_TOKEN;

    let mut input_tokens = 0u64;
    let mut prior_output = 0u64;
    for section in sections {
        let title_tokens = (section.title.len() as u64).div_ceil(CHARS_PER_TOKEN);
        input_tokens += PROMPT_OVERHEAD_TOKENS + title_tokens + prior_output.min(context_cap);
        prior_output += per_section_output;
    }
    let output_tokens = per_section_output * n;

    let usage = TokenUsage::new(
        u32::try_from(input_tokens).unwrap_or(u32::MAX),
        u32::try_from(output_tokens).unwrap_or(u32::MAX),
    );
    let expected_usd = pricing.cost(&usage);

    CostEstimate {
        sections: sections.len(),
        input_tokens,
        output_tokens,
        expected_usd,
        worst_case_usd: expected_usd * f64::from(max_regenerations + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(model: &str, pages: u32) -> DocumentDescriptor {
        DocumentDescriptor {
            id: "doc".into(),
            topic: "Tidal energy".into(),
            language: "en".into(),
            page_target: pages,
            model: model.parse().unwrap(),
        }
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage::new(10, 20));
        total.add(&TokenUsage::new(1, 2));
        assert_eq!(total, TokenUsage::new(11, 22));
        assert_eq!(total.total(), 33);
    }

    #[test]
    fn pricing_by_model_family() {
        let opus = ModelPricing::for_model(&"anthropic/claude-opus-4-6".parse().unwrap());
        assert_eq!(opus, ModelPricing::new(15.0, 75.0));
        let local = ModelPricing::for_model(&"ollama/llama3".parse().unwrap());
        assert_eq!(local.cost(&TokenUsage::new(1_000_000, 1_000_000)), 0.0);
    }

    #[test]
    fn cost_of_one_million_tokens_each_way() {
        let sonnet = ModelPricing::new(3.0, 15.0);
        let cost = sonnet.cost(&TokenUsage::new(1_000_000, 1_000_000));
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn empty_section_list_costs_nothing() {
        let estimate = estimate_cost(&doc("claude-sonnet-4-5", 10), &[], 2);
        assert_eq!(estimate.sections, 0);
        assert_eq!(estimate.expected_usd, 0.0);
    }

    #[test]
    fn later_sections_carry_more_context() {
        let sections: Vec<_> = ["A", "B", "C"].into_iter().map(SectionSpec::new).collect();
        let one = estimate_cost(&doc("claude-sonnet-4-5", 3), &sections[..1], 0);
        let three = estimate_cost(&doc("claude-sonnet-4-5", 3), &sections, 0);

        // 3 pages * 300 words * 4/3 = 1200 output tokens in both cases.
        assert_eq!(one.output_tokens, 1200);
        assert_eq!(three.output_tokens, 1200);
        // Three prompts with growing context cost more than three bare prompts.
        assert!(three.input_tokens > 3 * (PROMPT_OVERHEAD_TOKENS + 1));
    }

    #[test]
    fn worst_case_scales_with_regenerations() {
        let sections = vec![SectionSpec::new("Only")];
        let estimate = estimate_cost(&doc("claude-opus-4-6", 5), &sections, 2);
        assert!(estimate.expected_usd > 0.0);
        assert!((estimate.worst_case_usd - estimate.expected_usd * 3.0).abs() < 1e-9);
    }
}

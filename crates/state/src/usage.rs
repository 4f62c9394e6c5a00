//! Token usage and cost accounting.

use serde::{Deserialize, Serialize};

/// Aggregated model usage for an execution.
///
/// Merge semantics are numeric sum: every node attempt contributes its
/// own usage, and the totals only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens produced.
    #[serde(default)]
    pub output_tokens: u64,
    /// Total tokens (input + output as reported by the provider).
    #[serde(default)]
    pub total_tokens: u64,
    /// Accumulated cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Number of model calls made.
    #[serde(default)]
    pub llm_calls: u64,
}

impl TokenUsage {
    /// Add another usage sample into this total.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.cost_usd += other.cost_usd;
        self.llm_calls += other.llm_calls;
    }

    /// Returns `true` if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.llm_calls == 0 && self.total_tokens == 0 && self.cost_usd == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenUsage {
        TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
            total_tokens: 140,
            cost_usd: 0.002,
            llm_calls: 1,
        }
    }

    #[test]
    fn default_is_empty() {
        assert!(TokenUsage::default().is_empty());
        assert!(!sample().is_empty());
    }

    #[test]
    fn merge_sums_fields() {
        let mut total = sample();
        total.merge(&sample());
        assert_eq!(total.input_tokens, 200);
        assert_eq!(total.output_tokens, 80);
        assert_eq!(total.total_tokens, 280);
        assert_eq!(total.llm_calls, 2);
        assert!((total.cost_usd - 0.004).abs() < 1e-9);
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut total = sample();
        total.merge(&TokenUsage::default());
        assert_eq!(total, sample());
    }

    #[test]
    fn serde_defaults_missing_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"total_tokens": 7}"#).unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert_eq!(usage.llm_calls, 0);
    }
}

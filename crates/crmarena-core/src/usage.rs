//! Token and cost accounting.
//!
//! [`UsageLog`] keeps one entry per model call, in call order, so a transcript
//! can be lined up with what each call cost. [`UsageTotals`] is the summed view.

use crate::llm::LlmCompletionMetadata;
use crate::model_profiles::estimate_cost;
use serde::{Deserialize, Serialize};

/// Per-call usage arrays for one actor in one episode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLog {
    pub cost: Vec<f64>,
    pub completion_tokens: Vec<u32>,
    pub prompt_tokens: Vec<u32>,
    pub total_tokens: Vec<u32>,
}

impl UsageLog {
    /// Append one call; missing counters are recorded as zero
    pub fn record(&mut self, metadata: &LlmCompletionMetadata) {
        self.cost.push(metadata.cost.unwrap_or(0.0));
        self.completion_tokens
            .push(metadata.completion_tokens.unwrap_or(0));
        self.prompt_tokens.push(metadata.prompt_tokens.unwrap_or(0));
        self.total_tokens.push(metadata.total_tokens.unwrap_or(0));
    }

    /// Append one call, pricing it from the quirk table when the driver did not
    pub fn record_priced(&mut self, model_id: &str, metadata: &LlmCompletionMetadata) {
        let mut metadata = metadata.clone();
        if metadata.cost.is_none() {
            metadata.cost = Some(estimate_cost(
                model_id,
                metadata.prompt_tokens.unwrap_or(0),
                metadata.completion_tokens.unwrap_or(0),
            ));
        }
        self.record(&metadata);
    }

    /// Append every call of another log, keeping order
    pub fn append(&mut self, other: &UsageLog) {
        self.cost.extend_from_slice(&other.cost);
        self.completion_tokens
            .extend_from_slice(&other.completion_tokens);
        self.prompt_tokens.extend_from_slice(&other.prompt_tokens);
        self.total_tokens.extend_from_slice(&other.total_tokens);
    }

    pub fn calls(&self) -> usize {
        self.cost.len()
    }

    pub fn total_cost(&self) -> f64 {
        self.cost.iter().sum()
    }

    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            calls: self.calls(),
            cost: self.total_cost(),
            completion_tokens: self.completion_tokens.iter().map(|&t| t as u64).sum(),
            prompt_tokens: self.prompt_tokens.iter().map(|&t| t as u64).sum(),
            total_tokens: self.total_tokens.iter().map(|&t| t as u64).sum(),
        }
    }
}

/// Summed usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: usize,
    pub cost: f64,
    pub completion_tokens: u64,
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

impl UsageTotals {
    /// Fold one call's metadata into the totals
    pub fn add_call(&mut self, metadata: &LlmCompletionMetadata) {
        self.calls += 1;
        self.cost += metadata.cost.unwrap_or(0.0);
        self.completion_tokens += metadata.completion_tokens.unwrap_or(0) as u64;
        self.prompt_tokens += metadata.prompt_tokens.unwrap_or(0) as u64;
        self.total_tokens += metadata.total_tokens.unwrap_or(0) as u64;
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.calls += other.calls;
        self.cost += other.cost;
        self.completion_tokens += other.completion_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(prompt: u32, completion: u32, cost: Option<f64>) -> LlmCompletionMetadata {
        LlmCompletionMetadata {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            cost,
            ..Default::default()
        }
    }

    #[test]
    fn test_log_keeps_one_entry_per_call() {
        let mut log = UsageLog::default();
        log.record(&meta(100, 20, Some(0.01)));
        log.record(&LlmCompletionMetadata::default());
        log.record(&meta(50, 5, Some(0.002)));

        assert_eq!(log.calls(), 3);
        assert_eq!(log.prompt_tokens, vec![100, 0, 50]);
        assert!((log.total_cost() - 0.012).abs() < 1e-12);

        let totals = log.totals();
        assert_eq!(totals.calls, 3);
        assert_eq!(totals.total_tokens, 175);
    }

    #[test]
    fn test_record_priced_and_append() {
        let mut log = UsageLog::default();
        log.record_priced("unknown-model", &meta(1000, 10, None));
        log.record_priced("unknown-model", &meta(1000, 10, Some(0.25)));
        assert_eq!(log.cost, vec![0.0, 0.25]);

        let mut combined = UsageLog::default();
        combined.append(&log);
        combined.append(&log);
        assert_eq!(combined.calls(), 4);
        assert_eq!(combined.prompt_tokens[3], 1000);
    }

    #[test]
    fn test_totals_merge() {
        let mut a = UsageTotals::default();
        a.add_call(&meta(10, 1, Some(0.5)));
        let mut b = UsageTotals::default();
        b.add_call(&meta(20, 2, None));
        a.merge(&b);
        assert_eq!(a.calls, 2);
        assert_eq!(a.prompt_tokens, 30);
        assert!((a.cost - 0.5).abs() < 1e-12);
    }
}

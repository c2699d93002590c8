// Model Quirk Profiles
//
// Model families differ in which generation parameters they accept and how
// large an output budget they need. Those differences live in one lookup
// table keyed by model id instead of being branched on inside the loop.
//
// Matching is case-insensitive. Rules are evaluated in order and the first
// rule whose pattern matches wins, so more specific patterns come first.

use serde::{Deserialize, Serialize};

/// Default output-token ceiling for ordinary chat models
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 3500;

/// Output-token ceiling for reasoning-heavy families
pub const REASONING_MAX_OUTPUT_TOKENS: u32 = 50000;

/// Per-model generation quirks, read once per model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelQuirks {
    pub max_output_tokens: u32,
    /// Do not send `temperature`
    pub omit_temperature: bool,
    /// Do not send `top_p`
    pub omit_top_p: bool,
    /// The model rejects system messages; fold the system prompt into the first user turn
    pub omit_system_role: bool,
    /// Thinking budget in tokens, for models that take one
    pub reasoning_budget: Option<u32>,
    /// Whether the provider supports native function calling for this model
    pub native_tool_calls: bool,
    /// USD per million prompt tokens
    pub input_cost_per_million: f64,
    /// USD per million completion tokens
    pub output_cost_per_million: f64,
}

impl Default for ModelQuirks {
    fn default() -> Self {
        Self {
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            omit_temperature: false,
            omit_top_p: false,
            omit_system_role: false,
            reasoning_budget: None,
            native_tool_calls: true,
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
        }
    }
}

impl ModelQuirks {
    /// Price a call from its token counts
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_cost_per_million
            + completion_tokens as f64 * self.output_cost_per_million)
            / 1_000_000.0
    }

    /// Reasoning effort level derived from the thinking budget
    pub fn reasoning_effort(&self) -> Option<&'static str> {
        self.reasoning_budget.map(|budget| match budget {
            0..=1024 => "low",
            1025..=8192 => "medium",
            _ => "high",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Prefix(&'static str),
    Contains(&'static str),
}

impl Pattern {
    fn matches(&self, model_lower: &str) -> bool {
        match self {
            Pattern::Prefix(p) => model_lower.starts_with(p),
            Pattern::Contains(p) => model_lower.contains(p),
        }
    }
}

struct QuirkRule {
    pattern: Pattern,
    build: fn() -> ModelQuirks,
}

fn priced(input: f64, output: f64) -> ModelQuirks {
    ModelQuirks {
        input_cost_per_million: input,
        output_cost_per_million: output,
        ..Default::default()
    }
}

fn reasoning(input: f64, output: f64) -> ModelQuirks {
    ModelQuirks {
        max_output_tokens: REASONING_MAX_OUTPUT_TOKENS,
        ..priced(input, output)
    }
}

fn o1_family() -> ModelQuirks {
    ModelQuirks {
        omit_temperature: true,
        omit_top_p: true,
        omit_system_role: true,
        ..reasoning(15.0, 60.0)
    }
}

fn llama_family() -> ModelQuirks {
    ModelQuirks {
        native_tool_calls: false,
        ..priced(0.88, 0.88)
    }
}

const RULES: &[QuirkRule] = &[
    QuirkRule {
        pattern: Pattern::Prefix("o1-mini"),
        build: || ModelQuirks {
            input_cost_per_million: 3.0,
            output_cost_per_million: 12.0,
            ..o1_family()
        },
    },
    QuirkRule {
        pattern: Pattern::Prefix("o1"),
        build: o1_family,
    },
    QuirkRule {
        pattern: Pattern::Prefix("o3-mini"),
        build: || reasoning(1.1, 4.4),
    },
    QuirkRule {
        pattern: Pattern::Prefix("deepseek-r1"),
        build: || reasoning(0.55, 2.19),
    },
    QuirkRule {
        pattern: Pattern::Contains("thinking-4096"),
        build: || ModelQuirks {
            reasoning_budget: Some(4096),
            ..reasoning(0.15, 3.5)
        },
    },
    QuirkRule {
        pattern: Pattern::Prefix("gemini-2.5"),
        build: || reasoning(1.25, 10.0),
    },
    QuirkRule {
        pattern: Pattern::Contains("llama"),
        build: llama_family,
    },
    QuirkRule {
        pattern: Pattern::Prefix("gpt-4o-mini"),
        build: || priced(0.15, 0.6),
    },
    QuirkRule {
        pattern: Pattern::Prefix("gpt-4o"),
        build: || priced(2.5, 10.0),
    },
    QuirkRule {
        pattern: Pattern::Prefix("gpt-4-turbo"),
        build: || priced(10.0, 30.0),
    },
    QuirkRule {
        pattern: Pattern::Prefix("gpt-3.5-turbo"),
        build: || priced(0.5, 1.5),
    },
    QuirkRule {
        pattern: Pattern::Prefix("claude-3-5-sonnet"),
        build: || priced(3.0, 15.0),
    },
    QuirkRule {
        pattern: Pattern::Prefix("gemini-1.5-pro"),
        build: || priced(1.25, 5.0),
    },
    QuirkRule {
        pattern: Pattern::Prefix("gemini-1.5-flash"),
        build: || priced(0.075, 0.3),
    },
];

/// Look up the quirks for a model id.
///
/// Unknown models get [`ModelQuirks::default`] (3500 output tokens, all
/// parameters sent, native tool calls, zero price).
pub fn get_model_quirks(model_id: &str) -> ModelQuirks {
    let model_lower = model_id.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.pattern.matches(&model_lower))
        .map(|rule| (rule.build)())
        .unwrap_or_default()
}

/// Estimate call cost in USD for a model id
pub fn estimate_cost(model_id: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    get_model_quirks(model_id).cost(prompt_tokens, completion_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let quirks = get_model_quirks("some-unknown-model");
        assert_eq!(quirks.max_output_tokens, 3500);
        assert!(!quirks.omit_top_p);
        assert!(quirks.native_tool_calls);
        assert_eq!(quirks.reasoning_effort(), None);
    }

    #[test]
    fn test_o1_family() {
        let quirks = get_model_quirks("o1-preview");
        assert_eq!(quirks.max_output_tokens, 50000);
        assert!(quirks.omit_temperature);
        assert!(quirks.omit_top_p);
        assert!(quirks.omit_system_role);

        // case insensitive, more specific rule wins on price
        let mini = get_model_quirks("O1-Mini");
        assert!(mini.omit_system_role);
        assert_eq!(mini.input_cost_per_million, 3.0);
    }

    #[test]
    fn test_large_budget_families() {
        for model in ["o3-mini-2025-01-31", "deepseek-r1", "gemini-2.5-pro"] {
            let quirks = get_model_quirks(model);
            assert_eq!(quirks.max_output_tokens, 50000, "{model}");
            assert!(!quirks.omit_system_role, "{model}");
        }
    }

    #[test]
    fn test_thinking_budget() {
        let quirks = get_model_quirks("gemini-2.5-flash-preview-04-17-thinking-4096");
        assert_eq!(quirks.reasoning_budget, Some(4096));
        assert_eq!(quirks.reasoning_effort(), Some("medium"));
        assert_eq!(quirks.max_output_tokens, 50000);
    }

    #[test]
    fn test_llama_has_no_native_tools() {
        assert!(!get_model_quirks("meta-llama/Llama-3.3-70B-Instruct-Turbo").native_tool_calls);
        assert!(get_model_quirks("gpt-4o").native_tool_calls);
    }

    #[test]
    fn test_cost() {
        let cost = estimate_cost("gpt-4o-2024-08-06", 1_000_000, 100_000);
        assert!((cost - 3.5).abs() < 1e-9);
        assert_eq!(estimate_cost("unknown", 1000, 1000), 0.0);
    }
}

// Evaluation run configuration
//
// EvalConfig is the single injected configuration for a run. It can be:
// - Created directly with defaults and `with_*` builders
// - Deserialized from a YAML/JSON file (missing fields take defaults)
// Model aliases live here instead of global name maps.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Interaction strategy: what the agent emits and which environment runs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Thought + tagged query/answer, against the query environment
    React,
    /// Tagged query/answer only
    Act,
    /// CRM tool set via tool calls
    ToolCall,
    /// CRM tool set plus free-form SOQL/SOSL tools
    ToolCallFlex,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::React => "react",
            Strategy::Act => "act",
            Strategy::ToolCall => "tool_call",
            Strategy::ToolCallFlex => "tool_call_flex",
        }
    }

    pub fn uses_tools(&self) -> bool {
        matches!(self, Strategy::ToolCall | Strategy::ToolCallFlex)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "react" => Ok(Strategy::React),
            "act" => Ok(Strategy::Act),
            "tool_call" => Ok(Strategy::ToolCall),
            "tool_call_flex" => Ok(Strategy::ToolCallFlex),
            other => Err(format!(
                "unknown strategy '{other}' (expected react, act, tool_call or tool_call_flex)"
            )),
        }
    }
}

/// Who the agent is told it is talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPersona {
    /// An employee of the same company
    #[default]
    Internal,
    /// A customer
    External,
}

impl FromStr for PromptPersona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(PromptPersona::Internal),
            "external" => Ok(PromptPersona::External),
            other => Err(format!("unknown persona '{other}' (expected internal or external)")),
        }
    }
}

/// Whether optional task metadata is revealed to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    #[default]
    Default,
    Aided,
}

impl FromStr for EvalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(EvalMode::Default),
            "aided" => Ok(EvalMode::Aided),
            other => Err(format!("unknown eval mode '{other}' (expected default or aided)")),
        }
    }
}

/// Which backend org (and credential set) a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgType {
    #[default]
    Original,
    B2b,
    B2c,
}

impl OrgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgType::Original => "original",
            OrgType::B2b => "b2b",
            OrgType::B2c => "b2c",
        }
    }
}

impl FromStr for OrgType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(OrgType::Original),
            "b2b" => Ok(OrgType::B2b),
            "b2c" => Ok(OrgType::B2c),
            other => Err(format!("unknown org type '{other}' (expected original, b2b or b2c)")),
        }
    }
}

/// Configuration for one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Agent model (an alias or a provider model id)
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    /// Maximum agent turns per episode (per user turn when interactive)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Run tasks against a simulated user
    #[serde(default)]
    pub interactive: bool,

    #[serde(default = "default_max_user_turns")]
    pub max_user_turns: usize,

    #[serde(default)]
    pub org_type: OrgType,

    /// Use the privacy-aware system prompt
    #[serde(default)]
    pub privacy_aware: bool,

    #[serde(default)]
    pub persona: PromptPersona,

    #[serde(default)]
    pub eval_mode: EvalMode,

    /// `all`, one task type, or a comma-separated list
    #[serde(default = "default_task_category")]
    pub task_category: String,

    /// Skip tasks already present in the result file
    #[serde(default)]
    pub reuse_checkpoint: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Delay before every model call after the first in an episode
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Delay between tasks
    #[serde(default = "default_task_delay_ms")]
    pub task_delay_ms: u64,

    /// Model used for answer extraction and privacy classification.
    ///
    /// Unset means the simulated user's model.
    #[serde(default)]
    pub judge_model: Option<String>,

    /// Model playing the simulated user
    #[serde(default = "default_user_model")]
    pub user_model: String,

    /// Display name -> provider model id
    #[serde(default)]
    pub model_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "RetryPolicy::llm_default")]
    pub retry: RetryPolicy,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_strategy() -> Strategy {
    Strategy::ToolCall
}

fn default_max_turns() -> usize {
    20
}

fn default_max_user_turns() -> usize {
    10
}

fn default_task_category() -> String {
    "all".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_step_delay_ms() -> u64 {
    3000
}

fn default_task_delay_ms() -> u64 {
    1000
}

fn default_user_model() -> String {
    "gpt-4o".to_string()
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            strategy: default_strategy(),
            max_turns: default_max_turns(),
            interactive: false,
            max_user_turns: default_max_user_turns(),
            org_type: OrgType::default(),
            privacy_aware: false,
            persona: PromptPersona::default(),
            eval_mode: EvalMode::default(),
            task_category: default_task_category(),
            reuse_checkpoint: false,
            log_dir: default_log_dir(),
            step_delay_ms: default_step_delay_ms(),
            task_delay_ms: default_task_delay_ms(),
            judge_model: None,
            user_model: default_user_model(),
            model_aliases: BTreeMap::new(),
            temperature: 0.0,
            top_p: default_top_p(),
            retry: RetryPolicy::llm_default(),
        }
    }
}

impl EvalConfig {
    pub fn new(model: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            model: model.into(),
            strategy,
            ..Self::default()
        }
    }

    /// Parse a YAML config file body
    pub fn from_yaml_str(content: &str) -> crate::Result<Self> {
        serde_yaml::from_str(content).map_err(|e| crate::EvalError::config(e.to_string()))
    }

    /// Provider model id for a configured name (aliases resolved, else unchanged)
    pub fn resolve_model<'a>(&'a self, name: &'a str) -> &'a str {
        self.model_aliases
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Provider id of the agent model
    pub fn agent_model_id(&self) -> &str {
        self.resolve_model(&self.model)
    }

    /// Provider id of the judge model
    pub fn judge_model_id(&self) -> &str {
        self.resolve_model(self.judge_model.as_deref().unwrap_or(&self.user_model))
    }

    /// Provider id of the simulated user's model
    pub fn user_model_id(&self) -> &str {
        self.resolve_model(&self.user_model)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }

    /// Result-file name: `results_{model}_{strategy}_{category}.json`
    pub fn result_file_name(&self) -> String {
        format!(
            "results_{}_{}_{}.json",
            self.model.replace('/', "_"),
            self.strategy,
            self.task_category.replace(',', "+")
        )
    }

    pub fn result_path(&self) -> PathBuf {
        self.log_dir.join(self.result_file_name())
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_interactive(mut self, max_user_turns: usize) -> Self {
        self.interactive = true;
        self.max_user_turns = max_user_turns;
        self
    }

    pub fn with_privacy_aware(mut self, privacy_aware: bool) -> Self {
        self.privacy_aware = privacy_aware;
        self
    }

    pub fn with_persona(mut self, persona: PromptPersona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_eval_mode(mut self, eval_mode: EvalMode) -> Self {
        self.eval_mode = eval_mode;
        self
    }

    pub fn with_task_category(mut self, category: impl Into<String>) -> Self {
        self.task_category = category.into();
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_reuse_checkpoint(mut self, reuse: bool) -> Self {
        self.reuse_checkpoint = reuse;
        self
    }

    /// Set both delays (useful for tests, which run with no delay)
    pub fn with_delays(mut self, step_delay_ms: u64, task_delay_ms: u64) -> Self {
        self.step_delay_ms = step_delay_ms;
        self.task_delay_ms = task_delay_ms;
        self
    }

    pub fn with_judge_model(mut self, model: impl Into<String>) -> Self {
        self.judge_model = Some(model.into());
        self
    }

    pub fn with_user_model(mut self, model: impl Into<String>) -> Self {
        self.user_model = model.into();
        self
    }

    pub fn with_model_alias(mut self, alias: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.model_aliases.insert(alias.into(), model_id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.max_user_turns, 10);
        assert_eq!(config.step_delay(), Duration::from_secs(3));
        assert_eq!(config.task_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.judge_model_id(), "gpt-4o");
    }

    #[test]
    fn test_judge_follows_user_model_unless_set() {
        let config = EvalConfig::default()
            .with_user_model("claude")
            .with_model_alias("claude", "claude-3-5-sonnet-20241022");
        assert_eq!(config.judge_model_id(), "claude-3-5-sonnet-20241022");
        assert_eq!(config.user_model_id(), "claude-3-5-sonnet-20241022");

        let config = config.with_judge_model("gpt-4o-mini");
        assert_eq!(config.judge_model_id(), "gpt-4o-mini");
    }

    #[test]
    fn test_yaml_partial_config() {
        let config = EvalConfig::from_yaml_str(
            "model: llama-3.1-70b\nstrategy: tool_call_flex\nmodel_aliases:\n  llama-3.1-70b: meta-llama/Llama-3.1-70B-Instruct\n",
        )
        .unwrap();
        assert_eq!(config.strategy, Strategy::ToolCallFlex);
        assert_eq!(config.agent_model_id(), "meta-llama/Llama-3.1-70B-Instruct");
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.resolve_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn test_result_path() {
        let config = EvalConfig::new("gpt-4o", Strategy::React)
            .with_task_category("handle_time")
            .with_log_dir("/tmp/logs");
        assert_eq!(
            config.result_path(),
            PathBuf::from("/tmp/logs/results_gpt-4o_react_handle_time.json")
        );
    }

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [Strategy::React, Strategy::Act, Strategy::ToolCall, Strategy::ToolCallFlex] {
            assert_eq!(strategy.as_str().parse::<Strategy>(), Ok(strategy));
        }
        assert!("plan".parse::<Strategy>().is_err());
    }
}

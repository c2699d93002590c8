// CRM Agent Evaluation Core
//
// This crate provides a backend-agnostic implementation of the agent
// evaluation loop (model call → action → environment step → repeat) for
// analytical questions over a CRM instance.
//
// Key design decisions:
// - Uses traits (LlmDriver, QueryBackend, BackendFactory, Environment) for pluggable backends
// - Actions are a closed sum type; the environment dispatches on it in one place
// - Malformed model output, tool failures and backend query errors are observations,
//   only model/transport failures after retries are errors
// - Tools are defined via a Tool trait and collected in a ToolRegistry
// - Model quirks live in one lookup table keyed by model id
// - Judge and simulated-user usage is tracked apart from the agent's

pub mod action;
pub mod agent;
pub mod backend;
pub mod config;
pub mod crm;
pub mod environment;
pub mod error;
pub mod llm;
pub mod model_profiles;
pub mod parser;
pub mod prompts;
pub mod retry;
pub mod reward;
pub mod runner;
pub mod task;
pub mod tools;
pub mod usage;
pub mod user_sim;

// In-memory implementations for demos and testing
pub mod memory;

// Re-exports for convenience
pub use action::{Action, InvalidOutput, ParseOutcome, RESPOND_TOOL, SUBMIT_TOOL};
pub use agent::{AgentInfo, AgentLoop, EpisodeOutcome};
pub use backend::{BackendFactory, QueryBackend, QueryOutcome, Record, SharedBackend};
pub use config::{EvalConfig, EvalMode, OrgType, PromptPersona, Strategy};
pub use environment::{
    EndReason, EndSource, Environment, InteractiveEnv, QueryEnv, ResetOutput, StepInfo,
    StepResult, ToolEnv,
};
pub use error::{EvalError, Result};
pub use llm::{
    LlmCallConfig, LlmCallConfigBuilder, LlmCompletionMetadata, LlmDriver, LlmMessage,
    LlmMessageRole, LlmResponse, LlmToolCall, ModelEndpoint, SharedLlmDriver,
};
pub use model_profiles::{get_model_quirks, ModelQuirks};
pub use parser::ActionParser;
pub use retry::RetryPolicy;
pub use reward::{Evaluation, ExtractionMode, FuzzyMetrics, Reward, RewardEvaluator};
pub use runner::{
    summarize_by_type, EvalRunner, FailureNote, RecordedInfo, ResultLog, ResultRecord,
    RunSummary, TypeSummary,
};
pub use task::{GroundTruth, RewardMetric, SchemaObject, Task, TaskMetadata, TaskSet};
pub use tools::{
    Tool, ToolContext, ToolDefinition, ToolDispatchError, ToolExecutionResult, ToolRegistry,
    ToolRegistryBuilder,
};
pub use usage::{UsageLog, UsageTotals};
pub use user_sim::UserSimulator;

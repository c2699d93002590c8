//! Episode environments
//!
//! An [`Environment`] is a small state machine: created, reset onto a task,
//! stepped with one action at a time, then done. Stepping before `reset` or
//! after the terminal action is an error, never a panic.
//!
//! - [`QueryEnv`] runs raw SOQL/SOSL from the tag-based strategies
//! - [`ToolEnv`] dispatches tool calls through a [`ToolRegistry`]
//! - [`InteractiveEnv`] wraps either and routes answers through a simulated user
//!
//! Rewards are computed once, on the terminating action. Every other step
//! returns zero. Query failures, whether reported by the backend or raised by
//! the connection, come back as observations.

use crate::action::Action;
use crate::backend::SharedBackend;
use crate::error::{EvalError, Result};
use crate::reward::{Reward, RewardEvaluator};
use crate::task::{Task, TaskMetadata, TaskSet};
use crate::tools::{ToolContext, ToolDispatchError, ToolRegistry};
use crate::usage::UsageLog;
use crate::user_sim::{is_stop, UserSimulator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observation returned for a terminal answer
pub const DONE_OBSERVATION: &str = "DONE";

// ============================================================================
// Step types
// ============================================================================

/// Who ended (or flagged) the episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndSource {
    Agent,
    Tool,
    User,
    Api,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndReason {
    pub source: EndSource,
    pub message: String,
    #[serde(default)]
    pub content: String,
}

impl EndReason {
    pub fn new(source: EndSource, message: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    /// Rows returned by a successful query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_answer: Option<Vec<String>>,
    /// The observation is the simulated user's reply
    #[serde(default)]
    pub from_user: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: String,
    pub reward: Reward,
    pub done: bool,
    pub info: StepInfo,
}

impl StepResult {
    /// A non-terminal observation with zero reward
    pub fn observe(observation: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            reward: Reward::zero(),
            done: false,
            info: StepInfo::default(),
        }
    }

    pub fn with_end_reason(mut self, end_reason: EndReason) -> Self {
        self.info.end_reason = Some(end_reason);
        self
    }
}

/// What `reset` hands back to the driver
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutput {
    pub observation: String,
    pub metadata: TaskMetadata,
}

// ============================================================================
// Environment trait
// ============================================================================

#[async_trait]
pub trait Environment: Send {
    /// Bind to a task and clear the action log; may be called again to rebind
    async fn reset(&mut self, task_id: u64) -> Result<ResetOutput>;

    /// Apply one action
    async fn step(&mut self, action: Action) -> Result<StepResult>;

    /// Actions applied since the last reset, in order
    fn actions(&self) -> &[Action];

    fn task(&self) -> Option<&Task>;

    /// Tools the agent may call, if this environment dispatches tools
    fn tools(&self) -> Option<&ToolRegistry> {
        None
    }

    /// Model usage spent on evaluation (judge, simulated user), not by the agent
    fn overhead_usage(&self) -> UsageLog;

    /// The reward evaluator, so wrappers can score answers they intercept
    fn evaluator_mut(&mut self) -> &mut RewardEvaluator;
}

// ============================================================================
// Shared episode state
// ============================================================================

/// Bookkeeping shared by the concrete environments
#[derive(Debug)]
struct Episode {
    tasks: Arc<TaskSet>,
    task: Option<Task>,
    actions: Vec<Action>,
    done: bool,
    evaluator: RewardEvaluator,
}

impl Episode {
    fn new(tasks: Arc<TaskSet>, evaluator: RewardEvaluator) -> Self {
        Self {
            tasks,
            task: None,
            actions: Vec::new(),
            done: false,
            evaluator,
        }
    }

    fn reset(&mut self, task_id: u64) -> Result<ResetOutput> {
        let task = self.tasks.get(task_id)?.clone();
        let output = ResetOutput {
            observation: task.query.clone(),
            metadata: task.metadata.clone(),
        };
        info!(task_id, task_type = %task.task_type, "Environment reset");
        self.task = Some(task);
        self.actions.clear();
        self.done = false;
        Ok(output)
    }

    /// Check state and log the action before it is applied
    fn begin_step(&mut self, action: &Action) -> Result<()> {
        if self.task.is_none() {
            return Err(EvalError::NotReset);
        }
        if self.done {
            return Err(EvalError::EpisodeFinished);
        }
        self.actions.push(action.clone());
        Ok(())
    }

    /// Score a terminal answer and close the episode
    async fn finish(&mut self, answer: String) -> Result<StepResult> {
        let task = self.task.as_ref().ok_or(EvalError::NotReset)?;
        let trajectory = trajectory_of(&self.actions);
        let evaluation = self.evaluator.evaluate(&answer, task, &trajectory).await?;
        self.done = true;
        Ok(StepResult {
            observation: DONE_OBSERVATION.to_string(),
            reward: evaluation.reward,
            done: true,
            info: StepInfo {
                end_reason: Some(EndReason::new(EndSource::Agent, "Submit action", answer)),
                parsed_answer: evaluation.parsed_answer,
                ..Default::default()
            },
        })
    }
}

fn trajectory_of(actions: &[Action]) -> Vec<String> {
    actions.iter().map(Action::trajectory_text).collect()
}

fn unknown_action(name: &str) -> String {
    format!("Unknown action {name}")
}

// ============================================================================
// QueryEnv
// ============================================================================

/// Environment for the tag-based strategies: the agent writes queries itself
pub struct QueryEnv {
    episode: Episode,
    backend: SharedBackend,
}

impl QueryEnv {
    pub fn new(tasks: Arc<TaskSet>, backend: SharedBackend, evaluator: RewardEvaluator) -> Self {
        Self {
            episode: Episode::new(tasks, evaluator),
            backend,
        }
    }
}

impl std::fmt::Debug for QueryEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEnv")
            .field("episode", &self.episode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Environment for QueryEnv {
    async fn reset(&mut self, task_id: u64) -> Result<ResetOutput> {
        self.episode.reset(task_id)
    }

    async fn step(&mut self, action: Action) -> Result<StepResult> {
        self.episode.begin_step(&action)?;
        match action {
            Action::Execute { content } => {
                let outcome = match self.backend.execute(&content).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(error = %err, "Query failed before reaching the backend");
                        let message = err.to_string();
                        return Ok(StepResult::observe(message.clone()).with_end_reason(
                            EndReason::new(EndSource::Agent, "SOQL/SOSL query error", message),
                        ));
                    }
                };
                let observation = outcome.to_observation();
                debug!(status = outcome.status(), "Query executed");
                match outcome.into_rows() {
                    Ok(rows) => {
                        let mut result = StepResult::observe(observation);
                        result.info.observation_size = Some(rows.len());
                        Ok(result)
                    }
                    Err(error) => Ok(StepResult::observe(observation).with_end_reason(
                        EndReason::new(EndSource::Agent, "SOQL/SOSL query error", error),
                    )),
                }
            }
            terminal if terminal.is_terminal() => {
                let answer = terminal.proposed_answer().unwrap_or_default();
                self.episode.finish(answer).await
            }
            Action::ToolCall { name, .. } => Ok(StepResult::observe(unknown_action(&name))),
            Action::Respond { .. } => Ok(StepResult::observe(unknown_action("respond"))),
        }
    }

    fn actions(&self) -> &[Action] {
        &self.episode.actions
    }

    fn task(&self) -> Option<&Task> {
        self.episode.task.as_ref()
    }

    fn overhead_usage(&self) -> UsageLog {
        self.episode.evaluator.usage().clone()
    }

    fn evaluator_mut(&mut self) -> &mut RewardEvaluator {
        &mut self.episode.evaluator
    }
}

// ============================================================================
// ToolEnv
// ============================================================================

/// Environment for the tool-calling strategies
#[derive(Debug)]
pub struct ToolEnv {
    episode: Episode,
    registry: Arc<ToolRegistry>,
    context: ToolContext,
}

impl ToolEnv {
    pub fn new(
        tasks: Arc<TaskSet>,
        backend: SharedBackend,
        registry: Arc<ToolRegistry>,
        evaluator: RewardEvaluator,
    ) -> Self {
        Self {
            episode: Episode::new(tasks, evaluator),
            registry,
            context: ToolContext::new(backend),
        }
    }
}

#[async_trait]
impl Environment for ToolEnv {
    async fn reset(&mut self, task_id: u64) -> Result<ResetOutput> {
        self.episode.reset(task_id)
    }

    async fn step(&mut self, action: Action) -> Result<StepResult> {
        self.episode.begin_step(&action)?;
        if action.is_terminal() {
            let answer = action.proposed_answer().unwrap_or_default();
            return self.episode.finish(answer).await;
        }

        match action {
            Action::ToolCall {
                name, arguments, ..
            } => match self.registry.dispatch(&name, arguments, &self.context).await {
                Ok(observation) => Ok(StepResult::observe(observation)),
                Err(ToolDispatchError::UnknownTool(name)) => {
                    warn!(tool = %name, "Agent called an unknown tool");
                    Ok(StepResult::observe(unknown_action(&name)).with_end_reason(
                        EndReason::new(EndSource::Agent, format!("Invalid tool: {name}"), ""),
                    ))
                }
                Err(ToolDispatchError::Failed(observation)) => {
                    let reason = EndReason::new(
                        EndSource::Tool,
                        format!("tool_call error: {name}"),
                        observation.clone(),
                    );
                    Ok(StepResult::observe(observation).with_end_reason(reason))
                }
            },
            other => Ok(StepResult::observe(unknown_action(other.kind()))),
        }
    }

    fn actions(&self) -> &[Action] {
        &self.episode.actions
    }

    fn task(&self) -> Option<&Task> {
        self.episode.task.as_ref()
    }

    fn tools(&self) -> Option<&ToolRegistry> {
        Some(&self.registry)
    }

    fn overhead_usage(&self) -> UsageLog {
        self.episode.evaluator.usage().clone()
    }

    fn evaluator_mut(&mut self) -> &mut RewardEvaluator {
        &mut self.episode.evaluator
    }
}

// ============================================================================
// InteractiveEnv
// ============================================================================

/// Multi-turn wrapper: terminal actions go to a simulated user instead of
/// ending the episode.
///
/// The episode ends when the user sends the stop sentinel (reward computed on
/// the last proposed answer) or when the user-turn budget runs out (reward 0).
#[derive(Debug)]
pub struct InteractiveEnv<E> {
    inner: E,
    user: UserSimulator,
    max_user_turns: usize,
    current_user_turn: usize,
    actions: Vec<Action>,
    done: bool,
}

impl<E: Environment> InteractiveEnv<E> {
    pub fn new(inner: E, user: UserSimulator, max_user_turns: usize) -> Self {
        Self {
            inner,
            user,
            max_user_turns,
            current_user_turn: 0,
            actions: Vec::new(),
            done: false,
        }
    }

    /// Terminal actions forwarded to the user so far
    pub fn current_user_turn(&self) -> usize {
        self.current_user_turn
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    async fn score(&mut self, answer: &str) -> Result<crate::reward::Evaluation> {
        let task = self.inner.task().cloned().ok_or(EvalError::NotReset)?;
        let trajectory = trajectory_of(&self.actions);
        self.inner
            .evaluator_mut()
            .evaluate(answer, &task, &trajectory)
            .await
    }
}

#[async_trait]
impl<E: Environment> Environment for InteractiveEnv<E> {
    async fn reset(&mut self, task_id: u64) -> Result<ResetOutput> {
        let output = self.inner.reset(task_id).await?;
        let task = self.inner.task().ok_or(EvalError::NotReset)?;
        let opening = self.user.reset(&task.query, task.persona.as_deref()).await?;
        self.current_user_turn = 0;
        self.actions.clear();
        self.done = false;
        Ok(ResetOutput {
            observation: opening,
            metadata: output.metadata,
        })
    }

    async fn step(&mut self, action: Action) -> Result<StepResult> {
        if self.inner.task().is_none() {
            return Err(EvalError::NotReset);
        }
        if self.done {
            return Err(EvalError::EpisodeFinished);
        }
        if !action.is_terminal() {
            self.actions.push(action.clone());
            return self.inner.step(action).await;
        }

        self.actions.push(action.clone());
        let answer = action.proposed_answer().unwrap_or_default();
        self.current_user_turn += 1;
        let reply = self.user.step(&answer).await?;
        info!(
            user_turn = self.current_user_turn,
            max_user_turns = self.max_user_turns,
            stop = is_stop(&reply),
            "User turn"
        );

        if is_stop(&reply) {
            let evaluation = self.score(&answer).await?;
            self.done = true;
            return Ok(StepResult {
                observation: reply,
                reward: evaluation.reward,
                done: true,
                info: StepInfo {
                    end_reason: Some(EndReason::new(EndSource::User, "User ended conversation", answer)),
                    parsed_answer: evaluation.parsed_answer,
                    from_user: true,
                    ..Default::default()
                },
            });
        }

        if self.current_user_turn >= self.max_user_turns {
            self.done = true;
            return Ok(StepResult {
                observation: reply,
                reward: Reward::zero(),
                done: true,
                info: StepInfo {
                    end_reason: Some(EndReason::new(EndSource::User, "Max user turns reached", answer)),
                    from_user: true,
                    ..Default::default()
                },
            });
        }

        let mut result = StepResult::observe(reply);
        result.info.from_user = true;
        Ok(result)
    }

    fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn task(&self) -> Option<&Task> {
        self.inner.task()
    }

    fn tools(&self) -> Option<&ToolRegistry> {
        self.inner.tools()
    }

    fn overhead_usage(&self) -> UsageLog {
        let mut usage = self.inner.overhead_usage();
        usage.append(self.user.usage());
        usage
    }

    fn evaluator_mut(&mut self) -> &mut RewardEvaluator {
        self.inner.evaluator_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelEndpoint;
    use crate::memory::{InMemoryBackend, ScriptedLlmDriver};
    use crate::retry::RetryPolicy;
    use crate::task::{GroundTruth, RewardMetric};
    use serde_json::{json, Map};

    fn tasks() -> Arc<TaskSet> {
        Arc::new(TaskSet::new(vec![Task {
            id: 1,
            query: "Which agent handled the most cases?".into(),
            answer: Some(GroundTruth::One("005A".into())),
            reward_metric: RewardMetric::ExactMatch,
            metadata: TaskMetadata {
                required: "Today's date: 2021-05-01".into(),
                optional: None,
            },
            task_type: "handle_time".into(),
            persona: Some("A busy manager.".into()),
        }]))
    }

    fn respond(content: &str) -> Action {
        Action::Respond {
            content: content.into(),
        }
    }

    fn tool_call(name: &str, arguments: serde_json::Value) -> Action {
        Action::ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    #[tokio::test]
    async fn test_query_env_lifecycle() {
        let backend = Arc::new(
            InMemoryBackend::new()
                .with_rows("FROM Case", vec![json!({"OwnerId": "005A"}), json!({"OwnerId": "005B"})])
                .with_error("SELECT BAD", "MALFORMED_QUERY: unexpected token: BAD"),
        );
        let mut env = QueryEnv::new(tasks(), backend, RewardEvaluator::new());

        let err = env.step(respond("x")).await.unwrap_err();
        assert!(matches!(err, EvalError::NotReset));

        let reset = env.reset(1).await.unwrap();
        assert_eq!(reset.observation, "Which agent handled the most cases?");
        assert_eq!(reset.metadata.required, "Today's date: 2021-05-01");

        let rows = env
            .step(Action::Execute {
                content: "SELECT OwnerId FROM Case".into(),
            })
            .await
            .unwrap();
        assert!(!rows.done);
        assert_eq!(rows.info.observation_size, Some(2));
        assert_eq!(rows.reward, Reward::zero());

        let bad = env
            .step(Action::Execute {
                content: "SELECT BAD".into(),
            })
            .await
            .unwrap();
        assert_eq!(bad.observation, "MALFORMED_QUERY: unexpected token: BAD");
        assert!(!bad.done);
        let reason = bad.info.end_reason.unwrap();
        assert_eq!(reason.source, EndSource::Agent);
        assert_eq!(reason.message, "SOQL/SOSL query error");

        let done = env.step(respond("005A")).await.unwrap();
        assert!(done.done);
        assert_eq!(done.observation, DONE_OBSERVATION);
        assert_eq!(done.reward, Reward::Score(1.0));
        assert_eq!(done.info.end_reason.unwrap().message, "Submit action");
        assert_eq!(env.actions().len(), 3);

        let err = env.step(respond("again")).await.unwrap_err();
        assert!(matches!(err, EvalError::EpisodeFinished));

        env.reset(1).await.unwrap();
        assert!(env.actions().is_empty());
    }

    #[tokio::test]
    async fn test_reset_unknown_task() {
        let mut env = QueryEnv::new(tasks(), Arc::new(InMemoryBackend::new()), RewardEvaluator::new());
        assert!(matches!(env.reset(99).await, Err(EvalError::TaskNotFound(99))));
    }

    #[tokio::test]
    async fn test_tool_env_dispatch_outcomes() {
        let backend = Arc::new(InMemoryBackend::new().with_rows(
            "FROM Case",
            vec![json!({"ShippingState__c": "CA"})],
        ));
        let registry = Arc::new(ToolRegistry::crm());
        let mut env = ToolEnv::new(tasks(), backend, registry, RewardEvaluator::new());
        env.reset(1).await.unwrap();
        assert!(env.tools().is_some());

        let unknown = env.step(tool_call("drop_tables", json!({}))).await.unwrap();
        assert_eq!(unknown.observation, "Unknown action drop_tables");
        assert_eq!(unknown.info.end_reason.unwrap().message, "Invalid tool: drop_tables");

        let failed = env
            .step(tool_call("get_agents_with_max_cases", json!({"subset_cases": "oops"})))
            .await
            .unwrap();
        assert!(failed.observation.starts_with("Error:"));
        assert!(!failed.done);
        let reason = failed.info.end_reason.unwrap();
        assert_eq!(reason.source, EndSource::Tool);
        assert_eq!(reason.message, "tool_call error: get_agents_with_max_cases");

        let ok = env
            .step(tool_call("get_agents_with_max_cases", json!({"subset_cases": [{"OwnerId": "005A"}]})))
            .await
            .unwrap();
        assert_eq!(ok.observation, "[\"005A\"]");
        assert!(ok.info.end_reason.is_none());

        let done = env.step(tool_call("respond", json!({"content": "005A"}))).await.unwrap();
        assert!(done.done);
        assert_eq!(done.reward, Reward::Score(1.0));
    }

    fn interactive(replies: &[&str], max_user_turns: usize) -> InteractiveEnv<QueryEnv> {
        let driver = Arc::new(ScriptedLlmDriver::from_texts(replies.iter().copied()));
        let endpoint = ModelEndpoint::new(driver, "gpt-4o").with_retry(RetryPolicy::no_retry());
        let inner = QueryEnv::new(tasks(), Arc::new(InMemoryBackend::new()), RewardEvaluator::new());
        InteractiveEnv::new(inner, UserSimulator::new(endpoint), max_user_turns)
    }

    #[tokio::test]
    async fn test_interactive_stop_sentinel_scores_last_answer() {
        let mut env = interactive(&["Who is my best agent?", "I meant by case count.", "###STOP###"], 2);
        let reset = env.reset(1).await.unwrap();
        assert_eq!(reset.observation, "Who is my best agent?");

        let first = env.step(respond("Best by which measure?")).await.unwrap();
        assert!(!first.done);
        assert!(first.info.from_user);
        assert_eq!(first.observation, "I meant by case count.");
        assert_eq!(env.current_user_turn(), 1);

        let second = env.step(respond("005A")).await.unwrap();
        assert!(second.done);
        assert_eq!(second.reward, Reward::Score(1.0));
        let reason = second.info.end_reason.unwrap();
        assert_eq!(reason.source, EndSource::User);
        assert_eq!(reason.message, "User ended conversation");
        assert_eq!(env.overhead_usage().calls(), 3);
    }

    #[tokio::test]
    async fn test_interactive_user_budget() {
        let mut env = interactive(&["Hi", "Not quite.", "Still no."], 2);
        env.reset(1).await.unwrap();
        env.step(respond("005B")).await.unwrap();
        let last = env.step(respond("005A")).await.unwrap();
        assert!(last.done);
        assert_eq!(last.reward, Reward::zero());
        assert_eq!(last.info.end_reason.unwrap().message, "Max user turns reached");
        assert!(matches!(env.step(respond("x")).await, Err(EvalError::EpisodeFinished)));
    }
}

//! Evaluation runner
//!
//! Runs tasks one after another, each in a fresh environment with a fresh
//! backend connection, and appends one [`ResultRecord`] per task to a JSON
//! result file that is rewritten after every task. Records already in the
//! file are kept; `reuse_checkpoint` only decides whether their tasks are
//! skipped. A failing task is recorded
//! with reward 0 and an `api` note; it never aborts the run.

use crate::agent::{AgentInfo, AgentLoop, EpisodeOutcome};
use crate::backend::BackendFactory;
use crate::config::{EvalConfig, Strategy};
use crate::environment::{EndSource, Environment, InteractiveEnv, QueryEnv, ToolEnv};
use crate::error::Result;
use crate::llm::{LlmMessage, ModelEndpoint, SharedLlmDriver};
use crate::reward::{Reward, RewardEvaluator};
use crate::task::{GroundTruth, SchemaObject, Task, TaskSet};
use crate::tools::ToolRegistry;
use crate::user_sim::UserSimulator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Result records
// ============================================================================

/// Note stored instead of [`AgentInfo`] when a task failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNote {
    pub source: EndSource,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedInfo {
    Episode(AgentInfo),
    Failure(FailureNote),
}

/// One line of the result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: u64,
    pub task_type: String,
    pub gt_answer: Option<GroundTruth>,
    pub reward: Reward,
    pub agent_info: RecordedInfo,
    pub traj: Vec<LlmMessage>,
}

impl ResultRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.agent_info, RecordedInfo::Failure(_))
    }
}

/// The append-only JSON array of results for one run configuration
#[derive(Debug, Clone)]
pub struct ResultLog {
    path: PathBuf,
    records: Vec<ResultRecord>,
}

impl ResultLog {
    /// Empty log that will be written to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Load existing records; a missing file is an empty log
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn task_ids(&self) -> HashSet<u64> {
        self.records.iter().map(|r| r.task_id).collect()
    }

    pub fn push(&mut self, record: ResultRecord) {
        self.records.push(record);
    }

    /// Rewrite the whole file, pretty-printed
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.records)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Outcome of one `run` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub solved: usize,
    /// Mean over scalar rewards of the attempted tasks
    pub mean_reward: Option<f64>,
}

impl RunSummary {
    pub fn from_records(records: &[ResultRecord], skipped: usize) -> Self {
        let scalars: Vec<f64> = records.iter().filter_map(|r| r.reward.scalar()).collect();
        Self {
            attempted: records.len(),
            skipped,
            failed: records.iter().filter(|r| r.is_failure()).count(),
            solved: scalars.iter().filter(|&&s| s >= 1.0).count(),
            mean_reward: mean(&scalars),
        }
    }
}

/// Per task type aggregate for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub tasks: usize,
    pub mean_reward: f64,
    pub failures: usize,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Group results by task type, averaging [`Reward::headline`]
pub fn summarize_by_type(records: &[ResultRecord]) -> BTreeMap<String, TypeSummary> {
    let mut grouped: BTreeMap<String, Vec<&ResultRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.task_type.clone()).or_default().push(record);
    }
    grouped
        .into_iter()
        .map(|(task_type, group)| {
            let rewards: Vec<f64> = group.iter().map(|r| r.reward.headline()).collect();
            let summary = TypeSummary {
                tasks: group.len(),
                mean_reward: mean(&rewards).unwrap_or(0.0),
                failures: group.iter().filter(|r| r.is_failure()).count(),
            };
            (task_type, summary)
        })
        .collect()
}

// ============================================================================
// EvalRunner
// ============================================================================

pub struct EvalRunner {
    config: EvalConfig,
    tasks: Arc<TaskSet>,
    backends: Arc<dyn BackendFactory>,
    agent: AgentLoop,
    agent_driver: SharedLlmDriver,
    registry: Arc<ToolRegistry>,
    judge: ModelEndpoint,
    user: ModelEndpoint,
}

impl EvalRunner {
    /// Runner over `tasks`, filtered by the configured category.
    ///
    /// The judge and the simulated user run on the agent's driver with
    /// [`EvalConfig::judge_model_id`] and [`EvalConfig::user_model_id`].
    pub fn new(
        config: EvalConfig,
        tasks: TaskSet,
        backends: Arc<dyn BackendFactory>,
        agent_driver: SharedLlmDriver,
    ) -> Self {
        let tasks = Arc::new(tasks.filter_by_category(&config.task_category));
        let registry = Arc::new(match config.strategy {
            Strategy::ToolCallFlex => ToolRegistry::crm_with_free_form(),
            _ => ToolRegistry::crm(),
        });
        let judge = ModelEndpoint::new(agent_driver.clone(), config.judge_model_id())
            .with_retry(config.retry.clone());
        let user = ModelEndpoint::new(agent_driver.clone(), config.user_model_id())
            .with_retry(config.retry.clone());
        Self {
            agent: AgentLoop::new(agent_driver.clone(), config.clone()),
            config,
            tasks,
            backends,
            agent_driver,
            registry,
            judge,
            user,
        }
    }

    pub fn with_schema(mut self, objects: &[SchemaObject]) -> Self {
        self.agent = AgentLoop::new(self.agent_driver.clone(), self.config.clone()).with_schema(objects);
        self
    }

    pub fn with_judge(mut self, judge: ModelEndpoint) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_user_simulator(mut self, user: ModelEndpoint) -> Self {
        self.user = user;
        self
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Run every task, writing the result file after each one
    pub async fn run(&self) -> Result<RunSummary> {
        let path = self.config.result_path();
        let mut log = ResultLog::load(&path).await?;
        let done_ids = log.task_ids();
        let run_id = uuid::Uuid::now_v7();
        info!(
            run_id = %run_id,
            tasks = self.tasks.len(),
            existing = log.records().len(),
            reuse_checkpoint = self.config.reuse_checkpoint,
            results = %path.display(),
            "Run started"
        );

        let mut fresh = Vec::new();
        let mut skipped = 0;
        for task in self.tasks.iter() {
            if self.config.reuse_checkpoint && done_ids.contains(&task.id) {
                info!(task_id = task.id, "Skipping checkpointed task");
                skipped += 1;
                continue;
            }
            if !fresh.is_empty() {
                tokio::time::sleep(self.config.task_delay()).await;
            }

            let record = self.run_task(task).await;
            info!(
                task_id = task.id,
                task_type = %task.task_type,
                reward = ?record.reward,
                "Task recorded"
            );
            log.push(record.clone());
            log.save().await?;
            fresh.push(record);
        }

        let summary = RunSummary::from_records(&fresh, skipped);
        info!(
            run_id = %run_id,
            attempted = summary.attempted,
            skipped = summary.skipped,
            solved = summary.solved,
            failed = summary.failed,
            mean_reward = ?summary.mean_reward,
            "Run finished"
        );
        Ok(summary)
    }

    /// Run one task; never fails, errors become a zero-reward record
    pub async fn run_task(&self, task: &Task) -> ResultRecord {
        let mut transcript = Vec::new();
        let (reward, agent_info) = match self.run_episode(task, &mut transcript).await {
            Ok(outcome) => (outcome.reward, RecordedInfo::Episode(outcome.info)),
            Err(err) => {
                error!(task_id = task.id, error = %err, "Task failed");
                (
                    Reward::zero(),
                    RecordedInfo::Failure(FailureNote {
                        source: EndSource::Api,
                        content: format!("Error: {err}"),
                    }),
                )
            }
        };
        ResultRecord {
            task_id: task.id,
            task_type: task.task_type.clone(),
            gt_answer: task.answer.clone(),
            reward,
            agent_info,
            traj: transcript,
        }
    }

    async fn run_episode(
        &self,
        task: &Task,
        transcript: &mut Vec<LlmMessage>,
    ) -> Result<EpisodeOutcome> {
        let mut env = self.build_environment().await?;
        self.agent.run(env.as_mut(), task.id, transcript).await
    }

    async fn build_environment(&self) -> Result<Box<dyn Environment>> {
        let backend = self.backends.connect().await?;
        let evaluator = RewardEvaluator::with_judge(self.judge.clone());
        let tasks = self.tasks.clone();

        let user = self
            .config
            .interactive
            .then(|| UserSimulator::new(self.user.clone()));
        let max_user_turns = self.config.max_user_turns;

        Ok(match (self.config.strategy.uses_tools(), user) {
            (false, None) => Box::new(QueryEnv::new(tasks, backend, evaluator)),
            (false, Some(user)) => Box::new(InteractiveEnv::new(
                QueryEnv::new(tasks, backend, evaluator),
                user,
                max_user_turns,
            )),
            (true, None) => Box::new(ToolEnv::new(tasks, backend, self.registry.clone(), evaluator)),
            (true, Some(user)) => Box::new(InteractiveEnv::new(
                ToolEnv::new(tasks, backend, self.registry.clone(), evaluator),
                user,
                max_user_turns,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageLog;

    fn record(task_id: u64, task_type: &str, reward: Reward) -> ResultRecord {
        ResultRecord {
            task_id,
            task_type: task_type.into(),
            gt_answer: Some(GroundTruth::One("x".into())),
            reward,
            agent_info: RecordedInfo::Episode(AgentInfo {
                end_reason: None,
                usage: UsageLog::default(),
                total_cost: 0.0,
                num_turns: 1,
                observation_sizes: vec![],
                evaluation_usage: UsageLog::default(),
                parsed_answer: None,
            }),
            traj: vec![],
        }
    }

    #[test]
    fn test_failure_note_round_trips_untagged() {
        let failed = ResultRecord {
            agent_info: RecordedInfo::Failure(FailureNote {
                source: EndSource::Api,
                content: "Error: LLM error: 500".into(),
            }),
            ..record(1, "handle_time", Reward::zero())
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["agent_info"]["source"], "api");
        let back: ResultRecord = serde_json::from_value(json).unwrap();
        assert!(back.is_failure());

        let ok: ResultRecord =
            serde_json::from_value(serde_json::to_value(record(2, "handle_time", Reward::Score(1.0))).unwrap())
                .unwrap();
        assert!(!ok.is_failure());
    }

    #[test]
    fn test_summaries() {
        let records = vec![
            record(1, "handle_time", Reward::Score(1.0)),
            record(2, "handle_time", Reward::Score(0.0)),
            record(3, "knowledge_qa", Reward::Metrics(crate::reward::FuzzyMetrics { f1: 0.5, ..Default::default() })),
        ];
        let by_type = summarize_by_type(&records);
        assert_eq!(by_type["handle_time"].tasks, 2);
        assert!((by_type["handle_time"].mean_reward - 0.5).abs() < 1e-9);
        assert!((by_type["knowledge_qa"].mean_reward - 0.5).abs() < 1e-9);

        let summary = RunSummary::from_records(&records, 4);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.solved, 1);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.mean_reward, Some(0.5));
    }

    #[tokio::test]
    async fn test_result_log_round_trip() {
        let dir = std::env::temp_dir().join(format!("crmarena-log-{}", uuid::Uuid::now_v7()));
        let path = dir.join("results.json");

        let missing = ResultLog::load(&path).await.unwrap();
        assert!(missing.records().is_empty());

        let mut log = ResultLog::new(&path);
        log.push(record(5, "handle_time", Reward::Score(1.0)));
        log.save().await.unwrap();

        let loaded = ResultLog::load(&path).await.unwrap();
        assert_eq!(loaded.task_ids(), HashSet::from([5]));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}

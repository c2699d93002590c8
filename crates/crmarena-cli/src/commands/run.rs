// Evaluation run command
//
// Configuration precedence, lowest to highest: built-in defaults, the YAML
// file given with --config, then flags and environment variables.

use crate::output::{format_reward, print_field, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use crmarena_core::{
    EvalConfig, EvalMode, EvalRunner, OrgType, PromptPersona, SchemaObject, Strategy, TaskSet,
};
use crmarena_openai::{OpenAILlmDriver, DEFAULT_API_URL};
use crmarena_salesforce::SalesforceBackendFactory;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task file (JSON array or JSON lines)
    #[arg(long, env = "CRMARENA_TASKS")]
    pub tasks: PathBuf,

    /// Schema file describing the objects in the instance
    #[arg(long, env = "CRMARENA_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// YAML config file
    #[arg(long, env = "CRMARENA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Task type to run: "all", one type, or a comma-separated list
    #[arg(long)]
    pub task_category: Option<String>,

    /// react, act, tool_call or tool_call_flex
    #[arg(long)]
    pub agent_strategy: Option<Strategy>,

    /// Agent model (alias or provider model id)
    #[arg(long, env = "CRMARENA_MODEL")]
    pub model: Option<String>,

    /// Agent turns per episode [default: 20]
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// Run against a simulated user
    #[arg(long)]
    pub interactive: bool,

    /// Simulated user turns per episode [default: 10]
    #[arg(long)]
    pub max_user_turns: Option<usize>,

    /// original, b2b or b2c
    #[arg(long, env = "CRMARENA_ORG_TYPE")]
    pub org_type: Option<OrgType>,

    /// Tell the agent to withhold confidential information
    #[arg(long)]
    pub privacy_aware: bool,

    /// internal or external
    #[arg(long)]
    pub persona: Option<PromptPersona>,

    /// default or aided
    #[arg(long)]
    pub agent_eval_mode: Option<EvalMode>,

    /// Skip tasks already present in the result file
    #[arg(long)]
    pub reuse_checkpoint: bool,

    /// Pause between tasks in milliseconds [default: 1000]
    #[arg(long)]
    pub task_delay_ms: Option<u64>,

    /// Pause between model calls in milliseconds [default: 3000]
    #[arg(long)]
    pub step_delay_ms: Option<u64>,

    /// Directory for result files
    #[arg(long, env = "CRMARENA_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Model used to extract and judge answers
    #[arg(long, env = "CRMARENA_JUDGE_MODEL")]
    pub judge_model: Option<String>,

    /// Model playing the user in interactive runs
    #[arg(long, env = "CRMARENA_USER_MODEL")]
    pub user_model: Option<String>,

    /// Chat completions endpoint
    #[arg(long, env = "OPENAI_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// API key for the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Merge the config file and the flags into one run configuration
pub fn build_config(args: &RunArgs, file_contents: Option<&str>) -> Result<EvalConfig> {
    let mut config = match file_contents {
        Some(content) => EvalConfig::from_yaml_str(content)?,
        None => EvalConfig::default(),
    };

    if let Some(category) = &args.task_category {
        config.task_category = category.clone();
    }
    if let Some(strategy) = args.agent_strategy {
        config.strategy = strategy;
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(max_turns) = args.max_turns {
        config.max_turns = max_turns;
    }
    if args.interactive {
        config.interactive = true;
    }
    if let Some(max_user_turns) = args.max_user_turns {
        config.max_user_turns = max_user_turns;
    }
    if let Some(org_type) = args.org_type {
        config.org_type = org_type;
    }
    if args.privacy_aware {
        config.privacy_aware = true;
    }
    if let Some(persona) = args.persona {
        config.persona = persona;
    }
    if let Some(eval_mode) = args.agent_eval_mode {
        config.eval_mode = eval_mode;
    }
    if args.reuse_checkpoint {
        config.reuse_checkpoint = true;
    }
    if let Some(ms) = args.task_delay_ms {
        config.task_delay_ms = ms;
    }
    if let Some(ms) = args.step_delay_ms {
        config.step_delay_ms = ms;
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = log_dir.clone();
    }
    if let Some(judge) = &args.judge_model {
        config.judge_model = Some(judge.clone());
    }
    if let Some(user) = &args.user_model {
        config.user_model = user.clone();
    }
    Ok(config)
}

pub async fn run(args: RunArgs, output: OutputFormat) -> Result<()> {
    let file_contents = match &args.config {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?,
        ),
        None => None,
    };
    let config = build_config(&args, file_contents.as_deref())?;

    let api_key = args
        .api_key
        .clone()
        .context("No API key: pass --api-key or set OPENAI_API_KEY")?;
    let driver = Arc::new(OpenAILlmDriver::with_base_url(api_key, args.api_url.clone()));

    let tasks = TaskSet::load(&args.tasks)
        .await
        .with_context(|| format!("Failed to load tasks from {}", args.tasks.display()))?;
    let backends = Arc::new(SalesforceBackendFactory::from_env(config.org_type)?);

    tracing::info!(
        model = %config.model,
        strategy = %config.strategy,
        category = %config.task_category,
        interactive = config.interactive,
        "Starting evaluation run"
    );

    let result_path = config.result_path();
    let mut runner = EvalRunner::new(config, tasks, backends, driver);
    if let Some(path) = &args.schema {
        let objects = SchemaObject::load_all(path)
            .await
            .with_context(|| format!("Failed to load schema from {}", path.display()))?;
        runner = runner.with_schema(&objects);
    }

    let summary = runner.run().await?;

    if output.is_text() {
        print_field("Results", &result_path.display().to_string());
        print_field("Attempted", &summary.attempted.to_string());
        print_field("Skipped", &summary.skipped.to_string());
        print_field("Solved", &summary.solved.to_string());
        print_field("Failed", &summary.failed.to_string());
        print_field("Mean reward", &format_reward(summary.mean_reward));
    } else {
        output.print_value(&serde_json::json!({
            "results": result_path.display().to_string(),
            "summary": summary,
        }))?;
    }
    Ok(())
}

// CRMArena CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Logs go to stderr so stdout stays machine-readable.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crmarena")]
#[command(about = "CRMArena - Evaluate LLM agents on CRM tasks")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent over a task set and write the result file
    Run(commands::run::RunArgs),

    /// Print the tool catalogue shown to text-mode models
    Tools {
        /// Include the free-form query and search tools
        #[arg(long)]
        full: bool,
    },

    /// Summarize a result file by task type
    Summarize {
        /// Result file written by `run`
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crmarena=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, output_format).await,
        Commands::Tools { full } => commands::tools::run(output_format, full),
        Commands::Summarize { file } => commands::summarize::run(&file, output_format).await,
    }
}

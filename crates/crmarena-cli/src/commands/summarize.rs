// Result file summary command

use crate::output::{
    format_reward, print_field, print_table_header, print_table_row, OutputFormat,
};
use anyhow::{bail, Result};
use crmarena_core::{summarize_by_type, ResultLog, RunSummary};
use std::path::Path;

pub async fn run(file: &Path, output: OutputFormat) -> Result<()> {
    if !file.exists() {
        bail!("result file not found: {}", file.display());
    }
    let log = ResultLog::load(file).await?;
    let overall = RunSummary::from_records(log.records(), 0);
    let by_type = summarize_by_type(log.records());

    if !output.is_text() {
        return output.print_value(&serde_json::json!({
            "file": file.display().to_string(),
            "overall": overall,
            "by_type": by_type,
        }));
    }

    if by_type.is_empty() {
        println!("No results in {}", file.display());
        return Ok(());
    }

    print_table_header(&[("TASK TYPE", 32), ("TASKS", 6), ("MEAN", 7), ("FAILED", 6)]);
    for (task_type, summary) in &by_type {
        print_table_row(&[
            (task_type, 32),
            (&summary.tasks.to_string(), 6),
            (&format_reward(Some(summary.mean_reward)), 7),
            (&summary.failures.to_string(), 6),
        ]);
    }
    println!();
    print_field("Tasks", &overall.attempted.to_string());
    print_field("Solved", &overall.solved.to_string());
    print_field("Failed", &overall.failed.to_string());
    print_field("Mean reward", &format_reward(overall.mean_reward));
    Ok(())
}

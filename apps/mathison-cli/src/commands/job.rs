// job.rs - Job subcommands: status, list.

use clap::Subcommand;
use mathison_gateway::GovernanceConfig;
use mathison_jobs::{CheckpointStore, JobCheckpoint, JobStatus};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Show the checkpoint for one job.
    Status {
        /// Job id.
        id: String,
        /// Include stage outputs.
        #[arg(long)]
        outputs: bool,
    },
    /// List job checkpoints, most recently updated first.
    List {
        /// Filter by status (running, resumable_failure, completed, failed).
        #[arg(long)]
        status: Option<String>,
    },
}

pub fn execute(cmd: &JobCommands, config: &GovernanceConfig) -> anyhow::Result<()> {
    let store = CheckpointStore::new(&config.checkpoints_dir)?;

    match cmd {
        JobCommands::Status { id, outputs } => {
            let Some(cp) = store.load(id)? else {
                anyhow::bail!("No job found with id '{}'", id);
            };
            show_status(&cp, *outputs)?;
        }
        JobCommands::List { status } => {
            let jobs = match status {
                Some(s) => store.list_by_status(parse_status(s)?)?,
                None => store.list()?,
            };
            list_jobs(&jobs);
        }
    }
    Ok(())
}

fn parse_status(s: &str) -> anyhow::Result<JobStatus> {
    match s.to_ascii_lowercase().as_str() {
        "running" => Ok(JobStatus::Running),
        "resumable_failure" | "resumable" => Ok(JobStatus::ResumableFailure),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => anyhow::bail!("unknown job status '{}'", other),
    }
}

fn show_status(cp: &JobCheckpoint, outputs: bool) -> anyhow::Result<()> {
    println!("Job:        {}", cp.job_id);
    println!("Type:       {}", cp.job_type);
    println!("Status:     {}", cp.status);
    println!("Attempts:   {}", cp.attempts);
    println!("Inputs:     {}", cp.inputs_hash);
    println!("Created:    {}", cp.created_at.to_rfc3339());
    println!("Updated:    {}", cp.updated_at.to_rfc3339());
    if let Some(done) = cp.completed_at {
        println!("Completed:  {}", done.to_rfc3339());
    }
    if let Some(stage) = &cp.current_stage {
        println!("Current:    {}", stage);
    }
    if let Some(error) = &cp.error {
        println!("Error:      {}", error);
    }
    println!();
    println!("{:<24} OUTPUT HASH", "COMPLETED STAGE");
    println!("{}", "-".repeat(90));
    for stage in &cp.completed_stages {
        println!(
            "{:<24} {}",
            stage,
            cp.output_hashes.get(stage).map(String::as_str).unwrap_or("-")
        );
        if outputs {
            if let Some(value) = cp.stage_outputs.get(stage) {
                println!("  {}", serde_json::to_string(value)?);
            }
        }
    }
    Ok(())
}

fn list_jobs(jobs: &[JobCheckpoint]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!(
        "{:<28} {:<18} {:<18} {:<8} UPDATED",
        "JOB", "TYPE", "STATUS", "STAGES"
    );
    println!("{}", "-".repeat(96));
    for cp in jobs {
        println!(
            "{:<28} {:<18} {:<18} {:<8} {}",
            cp.job_id,
            cp.job_type,
            cp.status.to_string(),
            cp.completed_stages.len(),
            cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_names() {
        assert_eq!(parse_status("COMPLETED").unwrap(), JobStatus::Completed);
        assert_eq!(parse_status("resumable").unwrap(), JobStatus::ResumableFailure);
        assert!(parse_status("paused").is_err());
    }
}

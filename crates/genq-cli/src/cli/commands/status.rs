//! `genq status` – show every job in the durable queue.

use anyhow::Result;
use genq_core::job::Job;
use genq_core::state_db::StateDb;
use genq_core::store::JobStore;

const PROMPT_WIDTH: usize = 40;

fn short_prompt(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default();
    if line.chars().count() <= PROMPT_WIDTH {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(PROMPT_WIDTH - 3).collect();
    cut.push_str("...");
    cut
}

fn row(job: &Job) -> String {
    format!(
        "{:<24} {:<6} {:<11} {:>4}% {:<14} {}",
        job.id.as_str(),
        job.kind().as_str(),
        job.status.as_str(),
        job.progress,
        job.task_id.as_deref().unwrap_or("-"),
        short_prompt(job.payload.prompt())
    )
}

pub async fn run_status(db: &StateDb) -> Result<()> {
    let jobs = JobStore::new(db.clone()).load_all().await?;
    if jobs.is_empty() {
        println!("No jobs in queue.");
        return Ok(());
    }
    println!(
        "{:<24} {:<6} {:<11} {:>5} {:<14} {}",
        "ID", "KIND", "STATUS", "PROG", "TASK", "PROMPT"
    );
    for job in &jobs {
        println!("{}", row(job));
        if let Some(err) = &job.error {
            println!("    error: {err}");
        }
    }
    Ok(())
}

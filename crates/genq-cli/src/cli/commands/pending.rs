//! `genq pending` – artifacts whose save has not been confirmed yet.

use anyhow::Result;
use genq_core::artifact::FsArtifactStore;
use genq_core::config::GenqConfig;
use genq_core::pending_uploads::PendingUploads;
use genq_core::state_db::StateDb;

pub async fn run_pending(db: &StateDb, cfg: &GenqConfig, flush: bool) -> Result<()> {
    let pending = PendingUploads::new(db.clone());
    if flush {
        let store = FsArtifactStore::open(cfg.artifacts_root()?)?;
        let report = pending.process(&store).await?;
        println!(
            "Saved {} pending artifact(s), {} still failing",
            report.persisted, report.failed
        );
        return Ok(());
    }

    let entries = pending.list().await?;
    if entries.is_empty() {
        println!("No pending uploads.");
        return Ok(());
    }
    println!("{:<6} {:<14} {}", "KIND", "TASK", "SOURCE");
    for entry in entries {
        println!(
            "{:<6} {:<14} {}",
            entry.artifact.kind.as_str(),
            entry.artifact.task_id.as_deref().unwrap_or("-"),
            entry.artifact.source_url
        );
    }
    Ok(())
}

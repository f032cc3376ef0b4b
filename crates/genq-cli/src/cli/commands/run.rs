//! `genq run` – run one scheduler instance until Ctrl-C.

use anyhow::Result;
use genq_core::artifact::FsArtifactStore;
use genq_core::config::GenqConfig;
use genq_core::control::{default_control_socket_path, spawn_control_server};
use genq_core::provider::ProviderSet;
use genq_core::scheduler::{self, JobEvent, SchedulerContext, SchedulerParts};
use genq_core::state_db::StateDb;
use genq_core::sync::SyncHub;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

fn describe(event: &JobEvent) -> String {
    match event {
        JobEvent::Completed(job) => {
            let results = job.payload.results();
            if results.is_empty() {
                format!("done     {} ({})", job.id, job.kind())
            } else {
                format!("done     {} ({}) -> {}", job.id, job.kind(), results.join(", "))
            }
        }
        JobEvent::Dropped { id, kind, reason } => format!("dropped  {id} ({kind}): {reason}"),
        JobEvent::TimedOut(id) => {
            format!("timeout  {id}; `genq retry {id}` or `genq cancel {id}`")
        }
    }
}

pub async fn run_scheduler(db: StateDb, cfg: &GenqConfig) -> Result<()> {
    let artifacts_root = cfg.artifacts_root()?;
    let artifacts = FsArtifactStore::open(&artifacts_root)?;
    tracing::debug!(root = %artifacts_root.display(), "artifact store ready");

    let ctx = SchedulerContext::new(SchedulerParts {
        db: db.clone(),
        hub: SyncHub::default(),
        settings: cfg.queue_settings(),
        providers_config: cfg.providers_config(),
        providers: ProviderSet::http()?,
        artifacts: Arc::new(artifacts),
    });

    let server = match default_control_socket_path() {
        Ok(path) => Some(spawn_control_server(Arc::clone(&ctx), path)),
        Err(e) => {
            tracing::warn!("no control socket path: {}", e);
            None
        }
    };

    let mut events = ctx.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(n)) => tracing::debug!("event printer lagged by {}", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("genq scheduler {} running; Ctrl-C to stop", ctx.tab_id());
    scheduler::run(Arc::clone(&ctx), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    printer.abort();
    if let Some(handle) = server {
        handle.abort();
    }
    let left = ctx.jobs().len();
    if left > 0 {
        println!("{left} job(s) left in the queue; they resume on the next `genq run`.");
    }
    db.close().await;
    Ok(())
}

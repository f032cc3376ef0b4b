//! `genq image` / `genq video` – append a job to the durable queue.
//!
//! The job is written straight to the store as Queued; a running scheduler is
//! woken over the control socket, otherwise the next `genq run` picks it up.
//! `genq image --service nano-banana` is answered synchronously instead.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use genq_core::config::GenqConfig;
use genq_core::control::{default_control_socket_path, send_command, ControlCommand, ControlReply};
use genq_core::job::{ImageParams, Job, JobId, JobPayload, VideoParams};
use genq_core::state_db::{unix_millis, StateDb};
use genq_core::store::JobStore;
use std::path::{Path, PathBuf};

use super::generate::run_nano_banana;
use crate::cli::ImageService;

#[derive(Debug, Default)]
pub struct ImageArgs {
    pub service: ImageService,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub model: Option<String>,
    pub bot_type: Option<String>,
    pub mode: Option<String>,
    pub references: Vec<PathBuf>,
    pub provider: Option<String>,
    /// nano-banana only.
    pub size: Option<String>,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct VideoArgs {
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub duration: Option<String>,
    pub model: Option<String>,
    pub reference: Option<PathBuf>,
    pub provider: Option<String>,
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Read a local image into a `data:` URL.
pub(super) async fn data_url_from_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read reference image {}", path.display()))?;
    Ok(format!("data:{};base64,{}", mime_for(path), STANDARD.encode(bytes)))
}

pub async fn run_image(db: &StateDb, cfg: &GenqConfig, args: ImageArgs) -> Result<()> {
    if args.service == ImageService::NanoBanana {
        return run_nano_banana(db, cfg, args).await;
    }
    let mut reference_images = Vec::with_capacity(args.references.len());
    for path in &args.references {
        reference_images.push(data_url_from_file(path).await?);
    }
    let params = ImageParams {
        prompt: args.prompt,
        reference_images,
        bot_type: args.bot_type,
        mode: args.mode,
        aspect_ratio: args.aspect_ratio,
        model: args.model,
        ..ImageParams::default()
    };
    let id = enqueue(db, cfg, JobPayload::image(params), args.provider).await?;
    println!("Queued image job {id}");
    Ok(())
}

pub async fn run_video(db: &StateDb, cfg: &GenqConfig, args: VideoArgs) -> Result<()> {
    let reference_image = match &args.reference {
        Some(path) => Some(data_url_from_file(path).await?),
        None => None,
    };
    let params = VideoParams {
        prompt: args.prompt,
        reference_image,
        aspect_ratio: args.aspect_ratio,
        duration: args.duration,
        model: args.model,
    };
    let id = enqueue(db, cfg, JobPayload::video(params), args.provider).await?;
    println!("Queued video job {id}");
    Ok(())
}

pub(super) async fn enqueue_offline(
    store: &JobStore,
    cfg: &GenqConfig,
    payload: JobPayload,
    provider: Option<String>,
) -> Result<Job> {
    let provider_id = provider.or_else(|| cfg.selected_provider.clone());
    if cfg.providers_config().resolve(provider_id.as_deref()).is_none() {
        eprintln!("warning: no provider credentials configured; the job will be dropped when submitted");
    }
    let timeout_ms = cfg.queue_settings().timeout().as_millis() as i64;
    let job = Job::new(payload, provider_id, unix_millis(), timeout_ms);
    store.append(job.clone()).await?;
    tracing::info!(job_id = %job.id, kind = %job.kind(), "appended to store");
    Ok(job)
}

async fn enqueue(
    db: &StateDb,
    cfg: &GenqConfig,
    payload: JobPayload,
    provider: Option<String>,
) -> Result<JobId> {
    let store = JobStore::new(db.clone());
    let job = enqueue_offline(&store, cfg, payload, provider).await?;
    if let Ok(path) = default_control_socket_path() {
        match send_command(&path, &ControlCommand::Wake).await {
            Ok(Some(ControlReply::Ok)) => tracing::debug!("woke running scheduler"),
            Ok(Some(ControlReply::Rejected(reason))) => {
                tracing::debug!("wake rejected: {}", reason)
            }
            Ok(None) => println!("No scheduler listening; start one with `genq run`."),
            Err(e) => tracing::debug!("wake failed: {:#}", e),
        }
    }
    Ok(job.id)
}

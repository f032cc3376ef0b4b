//! `genq image --service nano-banana` – generate now and save the results.
//!
//! Images that cannot be saved right away go to the pending-upload list, the
//! same as queued jobs, so `genq pending --flush` or the next leader retries them.

use anyhow::{Context, Result};
use genq_core::artifact::{ArtifactRef, ArtifactStore, FsArtifactStore};
use genq_core::config::GenqConfig;
use genq_core::job::JobKind;
use genq_core::pending_uploads::PendingUploads;
use genq_core::provider::{http_client, ImageGeneration, NanoBananaClient};
use genq_core::state_db::StateDb;

use super::enqueue::ImageArgs;

pub(super) fn request_from(args: &ImageArgs) -> ImageGeneration {
    let mut request = ImageGeneration::new(args.prompt.clone());
    if let Some(model) = &args.model {
        request.model = model.clone();
    }
    if let Some(size) = &args.size {
        request.size = size.clone();
    }
    request.n = args.count.max(1);
    request
}

pub(super) async fn run_nano_banana(db: &StateDb, cfg: &GenqConfig, args: ImageArgs) -> Result<()> {
    if !args.references.is_empty() || args.bot_type.is_some() || args.mode.is_some() {
        eprintln!("warning: --reference, --bot-type and --mode only apply to midjourney");
    }
    let provider_id = args.provider.clone().or_else(|| cfg.selected_provider.clone());
    let endpoint = cfg
        .providers_config()
        .resolve(provider_id.as_deref())
        .context("no provider credentials configured")?;

    let request = request_from(&args);
    let urls = NanoBananaClient::new(http_client()?)
        .generate(&endpoint, &request)
        .await
        .context("nano-banana generation")?;

    let refs: Vec<ArtifactRef> = urls
        .iter()
        .map(|url| ArtifactRef::new(JobKind::Image, url.clone(), None))
        .collect();
    let store = FsArtifactStore::open(cfg.artifacts_root()?)?;
    match store.persist(&refs).await {
        Ok(saved) => {
            for location in saved {
                println!("saved    {location}");
            }
        }
        Err(e) => {
            tracing::warn!("saving generated images failed: {}", e);
            PendingUploads::new(db.clone()).add(&refs).await?;
            for url in &urls {
                println!("pending  {url}");
            }
        }
    }
    Ok(())
}

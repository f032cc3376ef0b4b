//! CLI for the genq generation queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use genq_core::config;
use genq_core::state_db::StateDb;
use genq_core::sync::UserAction;
use std::path::PathBuf;

use commands::{
    run_action, run_artifacts_delete, run_artifacts_list, run_describe, run_image, run_pending,
    run_scheduler, run_status, run_video, ImageArgs, VideoArgs,
};

/// Image backend for `genq image`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ImageService {
    /// Queued Midjourney-style task.
    #[default]
    Midjourney,
    /// Synchronous generation; results are saved right away.
    NanoBanana,
}

/// Top-level CLI for genq.
#[derive(Debug, Parser)]
#[command(name = "genq")]
#[command(about = "genq: durable queue for generative image and video jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Enqueue an image generation job (or generate at once with nano-banana).
    Image {
        /// Text prompt.
        prompt: String,
        #[arg(long, value_enum, default_value_t = ImageService::Midjourney)]
        service: ImageService,
        /// Aspect ratio, e.g. 16:9.
        #[arg(long)]
        aspect_ratio: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// MID_JOURNEY or NIJI_JOURNEY.
        #[arg(long)]
        bot_type: Option<String>,
        /// Account mode, e.g. FAST or RELAX.
        #[arg(long)]
        mode: Option<String>,
        /// Reference image file (repeatable).
        #[arg(long = "reference", value_name = "FILE")]
        references: Vec<PathBuf>,
        /// Provider id from config.toml (default: selected provider).
        #[arg(long)]
        provider: Option<String>,
        /// Image size for nano-banana, e.g. 1024x1024.
        #[arg(long)]
        size: Option<String>,
        /// Number of images for nano-banana.
        #[arg(long, default_value = "1", value_name = "N")]
        count: u32,
    },

    /// Enqueue a video generation job.
    Video {
        /// Text prompt.
        prompt: String,
        #[arg(long)]
        aspect_ratio: Option<String>,
        /// Clip length, e.g. 10s.
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Reference image file.
        #[arg(long = "reference", value_name = "FILE")]
        reference: Option<PathBuf>,
        #[arg(long)]
        provider: Option<String>,
    },

    /// Turn an image into a prompt (Midjourney describe). Waits for the answer.
    Describe {
        /// Image file.
        image: PathBuf,
        /// MID_JOURNEY or NIJI_JOURNEY.
        #[arg(long)]
        bot_type: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },

    /// Run a scheduler instance until Ctrl-C.
    Run,

    /// Show queued, running and timed-out jobs.
    Status,

    /// Retry a timed-out job.
    Retry {
        /// Job identifier.
        id: String,
    },

    /// Cancel a timed-out job.
    Cancel {
        /// Job identifier.
        id: String,
    },

    /// Browse or delete saved artifacts.
    Artifacts {
        #[command(subcommand)]
        command: ArtifactsCommand,
    },

    /// List artifacts still waiting to be saved.
    Pending {
        /// Try to save every pending artifact now.
        #[arg(long)]
        flush: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ArtifactsCommand {
    /// List saved artifacts in key order.
    List {
        /// Only keys starting with this prefix (e.g. images/).
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "50", value_name = "N")]
        page_size: usize,
        /// Continue after this key (printed by the previous page).
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Delete one artifact by key.
    Delete { key: String },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = StateDb::open_default().await?;

        match cli.command {
            CliCommand::Image {
                prompt,
                service,
                aspect_ratio,
                model,
                bot_type,
                mode,
                references,
                provider,
                size,
                count,
            } => {
                let args = ImageArgs {
                    service,
                    prompt,
                    aspect_ratio,
                    model,
                    bot_type,
                    mode,
                    references,
                    provider,
                    size,
                    count,
                };
                run_image(&db, &cfg, args).await?
            }
            CliCommand::Video {
                prompt,
                aspect_ratio,
                duration,
                model,
                reference,
                provider,
            } => {
                let args = VideoArgs {
                    prompt,
                    aspect_ratio,
                    duration,
                    model,
                    reference,
                    provider,
                };
                run_video(&db, &cfg, args).await?
            }
            CliCommand::Describe {
                image,
                bot_type,
                provider,
            } => run_describe(&cfg, &image, bot_type, provider).await?,
            CliCommand::Run => run_scheduler(db, &cfg).await?,
            CliCommand::Status => run_status(&db).await?,
            CliCommand::Retry { id } => {
                run_action(&db, &cfg, UserAction::Retry(id.into())).await?
            }
            CliCommand::Cancel { id } => {
                run_action(&db, &cfg, UserAction::Cancel(id.into())).await?
            }
            CliCommand::Artifacts { command } => match command {
                ArtifactsCommand::List {
                    prefix,
                    page_size,
                    cursor,
                } => run_artifacts_list(&cfg, &prefix, page_size, cursor.as_deref()).await?,
                ArtifactsCommand::Delete { key } => run_artifacts_delete(&cfg, &key).await?,
            },
            CliCommand::Pending { flush } => run_pending(&db, &cfg, flush).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;

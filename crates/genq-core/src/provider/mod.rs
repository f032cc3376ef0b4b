//! Generation provider seam: submit a request, poll the remote task.
//!
//! The scheduler only sees this trait. Default HTTP adapters live in
//! `midjourney` (image) and `video`. `describe` and `nano_banana` are
//! one-shot calls made outside the queue.

mod describe;
mod midjourney;
mod nano_banana;
mod video;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProviderEndpoint;
use crate::job::{JobKind, JobPayload};

pub use describe::{DescribeClient, DescribeOptions, DescribeStatus};
pub use midjourney::MidjourneyProvider;
pub use nano_banana::{ImageGeneration, NanoBananaClient};
pub use video::VideoProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider answered but refused the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    /// The response could not be understood.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    /// This adapter cannot run the given payload.
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// A polled task did not finish within the allowed attempts.
    #[error("no result after {0} polls")]
    Exhausted(u32),
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub task_id: String,
    /// Progress the provider already reports at submission, if any.
    pub progress: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Success,
    Failure,
}

/// One poll answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub state: TaskState,
    pub progress: Option<i64>,
    /// Remote artifact locations, set on success.
    pub result_refs: Vec<String>,
    /// Provider-supplied failure reason.
    pub message: Option<String>,
}

impl PollReport {
    pub fn pending(progress: Option<i64>) -> Self {
        Self {
            state: TaskState::Pending,
            progress,
            result_refs: Vec::new(),
            message: None,
        }
    }

    pub fn success(result_refs: Vec<String>) -> Self {
        Self {
            state: TaskState::Success,
            progress: Some(100),
            result_refs,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failure,
            progress: None,
            result_refs: Vec::new(),
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Create a remote task for `payload`.
    async fn submit(
        &self,
        endpoint: &ProviderEndpoint,
        payload: &JobPayload,
    ) -> Result<Submitted, ProviderError>;

    /// Ask for the state of a previously created task. Must be safe to repeat.
    async fn poll(&self, endpoint: &ProviderEndpoint, task_id: &str)
        -> Result<PollReport, ProviderError>;
}

/// One adapter per job kind.
#[derive(Clone)]
pub struct ProviderSet {
    pub image: Arc<dyn GenerationProvider>,
    pub video: Arc<dyn GenerationProvider>,
}

/// HTTP client shared by the default adapters.
pub fn http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("genq/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

impl ProviderSet {
    /// The HTTP adapters, sharing one client.
    pub fn http() -> Result<Self, ProviderError> {
        let client = http_client()?;
        Ok(Self {
            image: Arc::new(MidjourneyProvider::new(client.clone())),
            video: Arc::new(VideoProvider::new(client)),
        })
    }

    pub fn for_kind(&self, kind: JobKind) -> &Arc<dyn GenerationProvider> {
        match kind {
            JobKind::Image => &self.image,
            JobKind::Video => &self.video,
        }
    }
}

/// Turn a non-2xx response into `Rejected`, keeping the body's `message` when present.
pub(crate) async fn reject_unless_ok(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
    Err(ProviderError::Rejected(format!("HTTP {}: {}", status.as_u16(), detail)))
}

//! Job record, kind-specific payloads and status.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::id::JobId;

/// Job kind: selects the provider adapter and the concurrency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Image,
    Video,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Image, JobKind::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Image => "image",
            JobKind::Video => "video",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Submitting,
    Processing,
    Saving,
    Success,
    Timeout,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Submitting => "submitting",
            JobStatus::Processing => "processing",
            JobStatus::Saving => "saving",
            JobStatus::Success => "success",
            JobStatus::Timeout => "timeout",
        }
    }

    /// States that occupy a concurrency slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Submitting | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageParams {
    pub prompt: String,
    /// Reference images as base64 / data URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoParams {
    pub prompt: String,
    /// Reference image as a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Kind-specific request parameters and result, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Image {
        params: ImageParams,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        result_urls: Vec<String>,
    },
    Video {
        params: VideoParams,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_url: Option<String>,
    },
}

impl JobPayload {
    pub fn image(params: ImageParams) -> Self {
        JobPayload::Image {
            params,
            result_urls: Vec::new(),
        }
    }

    pub fn video(params: VideoParams) -> Self {
        JobPayload::Video {
            params,
            result_url: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Image { .. } => JobKind::Image,
            JobPayload::Video { .. } => JobKind::Video,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            JobPayload::Image { params, .. } => &params.prompt,
            JobPayload::Video { params, .. } => &params.prompt,
        }
    }

    /// Persisted artifact locations (empty until the job is saved).
    pub fn results(&self) -> Vec<String> {
        match self {
            JobPayload::Image { result_urls, .. } => result_urls.clone(),
            JobPayload::Video { result_url, .. } => result_url.iter().cloned().collect(),
        }
    }

    pub(crate) fn set_results(&mut self, urls: Vec<String>) {
        match self {
            JobPayload::Image { result_urls, .. } => *result_urls = urls,
            JobPayload::Video { result_url, .. } => *result_url = urls.into_iter().next(),
        }
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Provider resolved at enqueue time; later credential changes don't move the job.
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub progress: u8,
    pub created_at: i64,
    pub updated_at: i64,
    pub timeout_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: JobPayload,
}

impl Job {
    /// A fresh Queued job with `timeout_at = now + timeout_ms`.
    pub fn new(payload: JobPayload, provider_id: Option<String>, now: i64, timeout_ms: i64) -> Self {
        Self {
            id: JobId::generate(),
            status: JobStatus::Queued,
            provider_id,
            task_id: None,
            progress: 0,
            created_at: now,
            updated_at: now,
            timeout_at: now.saturating_add(timeout_ms),
            error: None,
            payload,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Record a reported progress value: clamped to 0..=100 and never lower than before.
    pub fn record_progress(&mut self, reported: i64) {
        let clamped = reported.clamp(0, 100) as u8;
        self.progress = self.progress.max(clamped);
    }

    pub fn is_timed_out(&self, now: i64) -> bool {
        now > self.timeout_at
    }

    pub(crate) fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }
}

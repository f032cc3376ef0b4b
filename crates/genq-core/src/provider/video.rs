//! Video provider speaking the `/v1/videos` task API (multipart submit, JSON poll).

use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{reject_unless_ok, GenerationProvider, PollReport, ProviderError, Submitted};
use crate::config::ProviderEndpoint;
use crate::job::{JobPayload, VideoParams};

const DEFAULT_MODEL: &str = "sora-2";
const DEFAULT_SECONDS: u32 = 15;

pub struct VideoProvider {
    client: reqwest::Client,
}

impl VideoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Landscape for 16:9, portrait otherwise.
pub(crate) fn size_for(aspect_ratio: Option<&str>) -> &'static str {
    match aspect_ratio {
        Some(ar) if ar.contains("16:9") => "1280x720",
        _ => "720x1280",
    }
}

/// First run of digits in the duration ("10s", "15 seconds"), else the default.
pub(crate) fn seconds_for(duration: Option<&str>) -> u32 {
    duration
        .and_then(|d| {
            let digits: String = d
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        })
        .unwrap_or(DEFAULT_SECONDS)
}

/// Decode `data:<mime>;base64,<payload>` into (mime, bytes).
pub(crate) fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), ProviderError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| ProviderError::Unsupported("reference image is not a data URL".to_string()))?;
    let mime = header
        .strip_prefix("data:")
        .and_then(|h| h.split(';').next())
        .filter(|m| !m.is_empty())
        .unwrap_or("image/png")
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ProviderError::Unsupported(format!("reference image: {e}")))?;
    Ok((mime, bytes))
}

fn build_form(params: &VideoParams) -> Result<Form, ProviderError> {
    let mut form = Form::new()
        .text("model", params.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()))
        .text("prompt", params.prompt.clone());
    if let Some(data_url) = &params.reference_image {
        let (mime, bytes) = decode_data_url(data_url)?;
        let part = Part::bytes(bytes)
            .file_name("reference.png")
            .mime_str(&mime)?;
        form = form.part("input_reference", part);
    }
    Ok(form
        .text("size", size_for(params.aspect_ratio.as_deref()))
        .text("seconds", seconds_for(params.duration.as_deref()).to_string())
        .text("watermark", "false"))
}

#[derive(Deserialize)]
struct VideoTask {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn into_report(task: VideoTask) -> PollReport {
    let progress = task.progress.map(|p| p as i64);
    match task.status.as_deref().unwrap_or("") {
        "completed" => match task.video_url {
            Some(url) => PollReport::success(vec![url]),
            None => PollReport::failure("completed without video_url"),
        },
        "failed" | "error" => {
            let reason = task
                .error
                .map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "generation failed".to_string());
            PollReport::failure(reason)
        }
        _ => PollReport::pending(progress),
    }
}

#[async_trait]
impl GenerationProvider for VideoProvider {
    async fn submit(
        &self,
        endpoint: &ProviderEndpoint,
        payload: &JobPayload,
    ) -> Result<Submitted, ProviderError> {
        let JobPayload::Video { params, .. } = payload else {
            return Err(ProviderError::Unsupported(
                "video provider received an image job".to_string(),
            ));
        };
        let response = self
            .client
            .post(format!("{}/v1/videos", endpoint.base_url))
            .bearer_auth(&endpoint.api_key)
            .multipart(build_form(params)?)
            .send()
            .await?;
        let task: VideoTask = reject_unless_ok(response).await?.json().await?;
        if task.id.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "submission accepted without a task id".to_string(),
            ));
        }
        Ok(Submitted {
            task_id: task.id,
            progress: task.progress.map(|p| p as i64),
        })
    }

    async fn poll(
        &self,
        endpoint: &ProviderEndpoint,
        task_id: &str,
    ) -> Result<PollReport, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/videos/{}", endpoint.base_url, task_id))
            .bearer_auth(&endpoint.api_key)
            .send()
            .await?;
        let task: VideoTask = reject_unless_ok(response).await?.json().await?;
        Ok(into_report(task))
    }
}

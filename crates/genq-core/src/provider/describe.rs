//! Image-to-prompt ("describe") on Midjourney-style providers
//! (`/mj/submit/describe`, then `/mj/task/{id}/fetch` until done).
//!
//! Describe tasks finish within a minute or two, so the caller waits for the
//! answer instead of queueing a job.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::midjourney::{parse_progress, SubmitResponse};
use super::{reject_unless_ok, ProviderError};
use crate::config::ProviderEndpoint;

#[derive(Debug, Clone)]
pub struct DescribeOptions {
    pub bot_type: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for DescribeOptions {
    fn default() -> Self {
        Self {
            bot_type: "MID_JOURNEY".to_string(),
            poll_interval: Duration::from_secs(2),
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescribeStatus {
    Pending { progress: Option<i64> },
    /// The generated prompt; empty when the provider returned none.
    Done(String),
    Failed(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    #[serde(default)]
    final_prompt: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    prompt_en: Option<String>,
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    properties: Option<Properties>,
    #[serde(default)]
    fail_reason: Option<String>,
}

impl FetchResponse {
    fn into_status(self) -> DescribeStatus {
        let status = self.status.unwrap_or_else(|| "PROCESSING".to_string());
        match status.as_str() {
            "SUCCESS" => {
                let prompt = [
                    self.prompt_en,
                    self.prompt,
                    self.properties.and_then(|p| p.final_prompt),
                ]
                .into_iter()
                .flatten()
                .find(|p| !p.is_empty())
                .unwrap_or_default();
                DescribeStatus::Done(prompt)
            }
            "FAILURE" | "FAILED" => {
                DescribeStatus::Failed(self.fail_reason.unwrap_or_else(|| status.clone()))
            }
            _ => DescribeStatus::Pending {
                progress: self.progress.as_ref().and_then(parse_progress),
            },
        }
    }
}

pub struct DescribeClient {
    client: reqwest::Client,
}

impl DescribeClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Start a describe task for one image (base64 or data URL).
    pub async fn submit(
        &self,
        endpoint: &ProviderEndpoint,
        image: &str,
        bot_type: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/mj/submit/describe", endpoint.base_url))
            .bearer_auth(&endpoint.api_key)
            .json(&json!({ "botType": bot_type, "base64": image }))
            .send()
            .await?;
        let data: SubmitResponse = reject_unless_ok(response).await?.json().await?;
        data.into_task_id()
    }

    pub async fn fetch(
        &self,
        endpoint: &ProviderEndpoint,
        task_id: &str,
    ) -> Result<DescribeStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/mj/task/{}/fetch", endpoint.base_url, task_id))
            .bearer_auth(&endpoint.api_key)
            .send()
            .await?;
        let data: FetchResponse = reject_unless_ok(response).await?.json().await?;
        Ok(data.into_status())
    }

    /// Submit and poll until the provider returns a prompt.
    pub async fn describe(
        &self,
        endpoint: &ProviderEndpoint,
        image: &str,
        opts: &DescribeOptions,
    ) -> Result<String, ProviderError> {
        let task_id = self.submit(endpoint, image, &opts.bot_type).await?;
        tracing::info!(task_id = %task_id, "describe task submitted");

        for attempt in 0..opts.max_attempts {
            match self.fetch(endpoint, &task_id).await? {
                DescribeStatus::Done(prompt) => {
                    if prompt.is_empty() {
                        tracing::warn!(task_id = %task_id, "describe finished without a prompt");
                    }
                    return Ok(prompt);
                }
                DescribeStatus::Failed(reason) => return Err(ProviderError::Rejected(reason)),
                DescribeStatus::Pending { progress } => {
                    tracing::debug!(task_id = %task_id, attempt, ?progress, "describe pending");
                }
            }
            tokio::time::sleep(opts.poll_interval).await;
        }
        Err(ProviderError::Exhausted(opts.max_attempts))
    }
}

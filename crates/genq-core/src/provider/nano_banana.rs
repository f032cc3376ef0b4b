//! Synchronous image generation (`/v1/images/generations`, OpenAI-style).
//! The response carries the image URLs directly, so nothing is queued.

use serde::{Deserialize, Serialize};

use super::{reject_unless_ok, ProviderError};
use crate::config::ProviderEndpoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageGeneration {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
}

impl ImageGeneration {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash-image";
    pub const DEFAULT_SIZE: &'static str = "1024x1024";

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            prompt: prompt.into(),
            n: 1,
            size: Self::DEFAULT_SIZE.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

pub struct NanoBananaClient {
    client: reqwest::Client,
}

impl NanoBananaClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Generate images and return their URLs.
    pub async fn generate(
        &self,
        endpoint: &ProviderEndpoint,
        request: &ImageGeneration,
    ) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/images/generations", endpoint.base_url))
            .bearer_auth(&endpoint.api_key)
            .json(request)
            .send()
            .await?;
        let data: GenerationResponse = reject_unless_ok(response).await?.json().await?;
        let urls: Vec<String> = data
            .data
            .into_iter()
            .filter_map(|image| image.url.filter(|u| !u.is_empty()))
            .collect();
        if urls.is_empty() {
            return Err(ProviderError::InvalidResponse("no image URLs returned".to_string()));
        }
        tracing::info!(model = %request.model, count = urls.len(), "images generated");
        Ok(urls)
    }
}

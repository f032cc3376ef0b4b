//! Midjourney-style image provider (`/mj/submit/imagine`, `/mj/task/{id}/fetch`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{reject_unless_ok, GenerationProvider, PollReport, ProviderError, Submitted};
use crate::config::ProviderEndpoint;
use crate::job::{ImageParams, JobPayload};

pub struct MidjourneyProvider {
    client: reqwest::Client,
}

impl MidjourneyProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Append `--niji` for the Niji bot and `--ar` for an aspect ratio, unless the
/// prompt already carries them.
pub(crate) fn build_prompt(params: &ImageParams) -> String {
    let mut prompt = params.prompt.clone();
    if params.bot_type.as_deref() == Some("NIJI_JOURNEY") && !prompt.contains("--niji") {
        prompt.push_str(" --niji");
    }
    if let Some(ar) = params.aspect_ratio.as_deref().filter(|s| !s.is_empty()) {
        if !prompt.contains("--ar") {
            prompt.push_str(" --ar ");
            prompt.push_str(ar);
        }
    }
    prompt
}

fn submit_body(params: &ImageParams) -> Value {
    let mut body = json!({
        "botType": params.bot_type.as_deref().unwrap_or("MID_JOURNEY"),
        "prompt": build_prompt(params),
        "base64Array": params.reference_images,
    });
    if let Some(mode) = &params.mode {
        body["accountFilter"] = json!({
            "modes": [mode],
            "remix": true,
            "remixAutoConsidered": true,
        });
    }
    body
}

/// Answer to any `/mj/submit/*` call.
#[derive(Deserialize)]
pub(crate) struct SubmitResponse {
    code: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

impl SubmitResponse {
    /// The new task id, or the provider's reason for refusing.
    pub(crate) fn into_task_id(self) -> Result<String, ProviderError> {
        if self.code != 1 {
            return Err(ProviderError::Rejected(
                self.description.unwrap_or_else(|| format!("code {}", self.code)),
            ));
        }
        match self.result {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(ProviderError::InvalidResponse(
                "submission accepted without a task id".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_urls: Option<Vec<ImageUrl>>,
    #[serde(default)]
    fail_reason: Option<String>,
}

/// Progress arrives as `"80%"` or as a number.
pub(crate) fn parse_progress(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn into_report(data: FetchResponse) -> PollReport {
    let status = data.status.unwrap_or_else(|| "PROCESSING".to_string());
    match status.as_str() {
        "SUCCESS" => {
            let refs = match data.image_urls {
                Some(urls) if !urls.is_empty() => urls.into_iter().map(|u| u.url).collect(),
                _ => data.image_url.into_iter().collect(),
            };
            PollReport::success(refs)
        }
        "FAILURE" | "FAILED" => {
            PollReport::failure(data.fail_reason.unwrap_or_else(|| status.clone()))
        }
        _ => PollReport::pending(data.progress.as_ref().and_then(parse_progress)),
    }
}

#[async_trait]
impl GenerationProvider for MidjourneyProvider {
    async fn submit(
        &self,
        endpoint: &ProviderEndpoint,
        payload: &JobPayload,
    ) -> Result<Submitted, ProviderError> {
        let JobPayload::Image { params, .. } = payload else {
            return Err(ProviderError::Unsupported(
                "image provider received a video job".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/mj/submit/imagine", endpoint.base_url))
            .bearer_auth(&endpoint.api_key)
            .json(&submit_body(params))
            .send()
            .await?;
        let data: SubmitResponse = reject_unless_ok(response).await?.json().await?;
        let task_id = data.into_task_id()?;
        Ok(Submitted {
            task_id,
            progress: None,
        })
    }

    async fn poll(
        &self,
        endpoint: &ProviderEndpoint,
        task_id: &str,
    ) -> Result<PollReport, ProviderError> {
        let response = self
            .client
            .get(format!("{}/mj/task/{}/fetch", endpoint.base_url, task_id))
            .bearer_auth(&endpoint.api_key)
            .send()
            .await?;
        let data: FetchResponse = reject_unless_ok(response).await?.json().await?;
        Ok(into_report(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TaskState;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(prompt: &str) -> ImageParams {
        ImageParams {
            prompt: prompt.to_string(),
            ..ImageParams::default()
        }
    }

    fn endpoint(server: &MockServer) -> ProviderEndpoint {
        ProviderEndpoint {
            base_url: server.uri(),
            api_key: "sk-test".to_string(),
        }
    }

    #[test]
    fn prompt_gets_niji_and_aspect_ratio() {
        let mut p = params("a cat");
        p.bot_type = Some("NIJI_JOURNEY".to_string());
        p.aspect_ratio = Some("16:9".to_string());
        assert_eq!(build_prompt(&p), "a cat --niji --ar 16:9");

        let mut p = params("a cat --ar 1:1");
        p.aspect_ratio = Some("16:9".to_string());
        assert_eq!(build_prompt(&p), "a cat --ar 1:1");
    }

    #[test]
    fn progress_strings_and_numbers() {
        assert_eq!(parse_progress(&json!("80%")), Some(80));
        assert_eq!(parse_progress(&json!(" 5 % ")), Some(5));
        assert_eq!(parse_progress(&json!(42)), Some(42));
        assert_eq!(parse_progress(&json!("")), None);
        assert_eq!(parse_progress(&Value::Null), None);
    }

    #[test]
    fn mode_adds_account_filter() {
        let mut p = params("x");
        p.mode = Some("FAST".to_string());
        let body = submit_body(&p);
        assert_eq!(body["botType"], "MID_JOURNEY");
        assert_eq!(body["accountFilter"]["modes"][0], "FAST");
        assert!(submit_body(&params("x")).get("accountFilter").is_none());
    }

    #[tokio::test]
    async fn submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mj/submit/imagine"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1, "description": "ok", "result": "1712345"
            })))
            .mount(&server)
            .await;

        let provider = MidjourneyProvider::new(reqwest::Client::new());
        let submitted = provider
            .submit(&endpoint(&server), &JobPayload::image(params("a cat")))
            .await
            .unwrap();
        assert_eq!(submitted.task_id, "1712345");
    }

    #[tokio::test]
    async fn submit_with_error_code_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mj/submit/imagine"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 4, "description": "banned prompt"
            })))
            .mount(&server)
            .await;

        let provider = MidjourneyProvider::new(reqwest::Client::new());
        let err = provider
            .submit(&endpoint(&server), &JobPayload::image(params("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref m) if m == "banned prompt"));
    }

    #[tokio::test]
    async fn poll_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mj/task/T1/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "IN_PROGRESS", "progress": "45%"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mj/task/T2/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "imageUrl": "https://cdn.example.com/grid.png",
                "imageUrls": [{"url": "https://cdn.example.com/1.png"}, {"url": "https://cdn.example.com/2.png"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mj/task/T3/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "FAILURE", "failReason": "moderation"
            })))
            .mount(&server)
            .await;

        let provider = MidjourneyProvider::new(reqwest::Client::new());
        let ep = endpoint(&server);

        let r1 = provider.poll(&ep, "T1").await.unwrap();
        assert_eq!(r1.state, TaskState::Pending);
        assert_eq!(r1.progress, Some(45));

        let r2 = provider.poll(&ep, "T2").await.unwrap();
        assert_eq!(r2.state, TaskState::Success);
        assert_eq!(r2.result_refs.len(), 2);

        let r3 = provider.poll(&ep, "T3").await.unwrap();
        assert_eq!(r3.state, TaskState::Failure);
        assert_eq!(r3.message.as_deref(), Some("moderation"));
    }

    #[tokio::test]
    async fn poll_http_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mj/task/T9/fetch"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let provider = MidjourneyProvider::new(reqwest::Client::new());
        assert!(provider.poll(&endpoint(&server), "T9").await.is_err());
    }
}

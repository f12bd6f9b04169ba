use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Duration, Instant, sleep};

use crate::provider::{GeneratedImage, ImageProvider};

pub const MODELSCOPE_API_ROOT: &str = "https://api-inference.modelscope.cn";
pub const DEFAULT_MODEL: &str = "Tongyi-MAI/Z-Image-Turbo";
const DEFAULT_SIZE: &str = "512x512";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(anyhow!("ModelScope request failed: {status} {text}"))
}

#[derive(Debug, Deserialize)]
struct ImageGenerationTaskResponse {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationStatusResponse {
    task_status: Option<String>,
    output_images: Option<Vec<String>>,
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    code: Option<String>,
    message: Option<String>,
}

/// Text-to-image through the ModelScope async task API: submit, poll until
/// the task settles, then download the first output image.
#[derive(Clone, Debug)]
pub struct ModelScopeProvider {
    client: Client,
    api_root: String,
    api_key: String,
    model: String,
    size: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ModelScopeProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_root: MODELSCOPE_API_ROOT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            size: DEFAULT_SIZE.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.timeout = timeout;
        self
    }

    async fn submit_task(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": self.size,
        });
        tracing::debug!(model = %self.model, "submitting image generation task");
        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.api_root))
            .bearer_auth(&self.api_key)
            .header("X-ModelScope-Async-Mode", "true")
            .json(&body)
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let response_text = response.text().await?;
        let payload: ImageGenerationTaskResponse = serde_json::from_str(&response_text)
            .map_err(|e| anyhow!("failed to parse task response: {e}, body: {response_text}"))?;
        payload
            .task_id
            .ok_or_else(|| anyhow!("ModelScope returned no task_id"))
    }

    async fn poll_task(&self, task_id: &str) -> Result<String> {
        let deadline = Instant::now() + self.timeout;
        let mut poll_count = 0u32;

        while Instant::now() <= deadline {
            poll_count += 1;
            let response = self
                .client
                .get(format!("{}/v1/tasks/{task_id}", self.api_root))
                .bearer_auth(&self.api_key)
                .header("X-ModelScope-Task-Type", "image_generation")
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            let response_text = response.text().await?;
            let payload: ImageGenerationStatusResponse = serde_json::from_str(&response_text)
                .map_err(|e| anyhow!("failed to parse task status: {e}, body: {response_text}"))?;
            let status = payload
                .task_status
                .ok_or_else(|| anyhow!("ModelScope returned no task status, body: {response_text}"))?;
            tracing::debug!(task_id, poll_count, status = %status, "polled generation task");

            match status.as_str() {
                "SUCCEED" => {
                    return payload
                        .output_images
                        .and_then(|images| images.into_iter().next())
                        .ok_or_else(|| anyhow!("ModelScope returned no image url"));
                }
                "FAILED" => {
                    let error_msg = payload
                        .error
                        .map(|e| {
                            format!(
                                "code={}, message={}",
                                e.code.unwrap_or_default(),
                                e.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(anyhow!("ModelScope image generation failed: {error_msg}"));
                }
                _ => sleep(self.poll_interval).await,
            }
        }

        Err(anyhow!(
            "ModelScope image generation timed out (task_id={task_id}, poll_count={poll_count})"
        ))
    }

    async fn download(&self, image_url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(image_url).send().await?;
        let response = assert_ok_response(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageProvider for ModelScopeProvider {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let task_id = self.submit_task(prompt).await?;
        let image_url = self.poll_task(&task_id).await?;
        tracing::info!(task_id = %task_id, "generation task finished");
        let bytes = self.download(&image_url).await?;
        Ok(GeneratedImage { bytes })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use axum::{
        Json, Router,
        extract::{Path, State},
        routing::{get, post},
    };
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone)]
    struct FakeModelScope {
        base: String,
        polls: Arc<AtomicU32>,
        fail: bool,
    }

    async fn submit(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["size"], "512x512");
        Json(json!({ "task_id": "task-1" }))
    }

    async fn status(State(state): State<FakeModelScope>, Path(task_id): Path<String>) -> Json<Value> {
        assert_eq!(task_id, "task-1");
        let polls = state.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls < 2 {
            return Json(json!({ "task_status": "RUNNING" }));
        }
        if state.fail {
            return Json(json!({
                "task_status": "FAILED",
                "error": { "code": "E1", "message": "nsfw" }
            }));
        }
        Json(json!({
            "task_status": "SUCCEED",
            "output_images": [format!("{}/out.png", state.base)]
        }))
    }

    async fn spawn_fake(fail: bool) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let polls = Arc::new(AtomicU32::new(0));
        let state = FakeModelScope {
            base: base.clone(),
            polls: polls.clone(),
            fail,
        };
        let app = Router::new()
            .route("/v1/images/generations", post(submit))
            .route("/v1/tasks/{task_id}", get(status))
            .route("/out.png", get(|| async { b"png-bytes".to_vec() }))
            .with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (base, polls)
    }

    fn provider(base: &str) -> ModelScopeProvider {
        ModelScopeProvider::new("key")
            .with_api_root(base)
            .with_polling(Duration::from_millis(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn polls_until_success_then_downloads() {
        let (base, polls) = spawn_fake(false).await;
        let image = provider(&base).generate("a cat").await.expect("generate");
        assert_eq!(image.bytes, b"png-bytes");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_task_reports_provider_error() {
        let (base, _) = spawn_fake(true).await;
        let err = provider(&base).generate("a cat").await.unwrap_err();
        assert!(err.to_string().contains("nsfw"), "{err}");
    }
}

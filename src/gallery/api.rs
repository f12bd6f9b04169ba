use async_trait::async_trait;
use reqwest::{Client, Response};
use url::Url;

use crate::{
    error::ApiError,
    models::{ErrorBody, GalleryPage, GenerateRequest, GenerateResponse, ListQuery},
};

#[async_trait]
pub trait GalleryApi: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GenerateResponse, ApiError>;
    async fn list(&self, query: &ListQuery) -> Result<GalleryPage, ApiError>;
}

#[derive(Clone, Debug)]
pub struct HttpGalleryApi {
    client: Client,
    base_url: String,
}

impl HttpGalleryApi {
    pub fn new(base_url: &Url) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

/// Turns a non-2xx response into [`ApiError::Status`], keeping the body's
/// `message` when there is one.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.message);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl GalleryApi for HttpGalleryApi {
    async fn generate(&self, prompt: &str) -> Result<GenerateResponse, ApiError> {
        let response = self
            .client
            .post(self.endpoint("generate"))
            .json(&GenerateRequest {
                prompt: prompt.to_string(),
            })
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<GenerateResponse>().await?)
    }

    async fn list(&self, query: &ListQuery) -> Result<GalleryPage, ApiError> {
        let term = query.term.as_deref().filter(|term| !term.is_empty());
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(term) = term {
            params.push(("term", term.to_string()));
        }
        if let Some(cursor) = &query.cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        let path = if term.is_some() { "search" } else { "gallery" };
        let response = self
            .client
            .get(self.endpoint(path))
            .query(&params)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<GalleryPage>().await?)
    }
}

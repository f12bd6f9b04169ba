use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    image_processing,
    models::{GalleryPage, GenerateRequest, GenerateResponse, ImageRecord, ImageRow, PageCursor},
    storage::{LocalFileStorage, ScanRequest, image_id},
};

use super::AppState;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub term: Option<String>,
    #[serde(alias = "lastEvaluatedKey")]
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorKey {
    id: String,
}

fn encode_cursor(id: String) -> Result<PageCursor, ServiceError> {
    serde_json::to_string(&CursorKey { id })
        .map(PageCursor::new)
        .map_err(|err| ServiceError::internal("Error encoding cursor", err))
}

fn decode_cursor(raw: Option<&str>) -> Result<Option<String>, ServiceError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(raw) => serde_json::from_str::<CursorKey>(raw)
            .map(|key| Some(key.id))
            .map_err(|_| ServiceError::InvalidCursor),
    }
}

fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .map(|limit| limit.min(MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT)
}

fn to_record(storage: &LocalFileStorage, row: ImageRow) -> ImageRecord {
    let image_url = storage.public_url(&LocalFileStorage::image_key(&row.id));
    ImageRecord {
        id: row.id,
        prompt: row.prompt,
        created_at: row.created_at,
        image_url,
    }
}

pub async fn generate_image(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let Json(request) = body.map_err(|rejection| ServiceError::Validation(rejection.body_text()))?;
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ServiceError::Validation("prompt must not be empty".to_string()));
    }
    tracing::info!(prompt_len = prompt.len(), "generating image");

    const FAILURE: &str = "Error generating image";
    let image = state
        .provider
        .generate(prompt)
        .await
        .map_err(|err| ServiceError::internal(FAILURE, err))?;
    let format =
        image_processing::sniff_format(&image.bytes).map_err(|err| ServiceError::internal(FAILURE, err))?;

    let now = Utc::now();
    let created_at = now.timestamp_millis();
    let salt = format!("{prompt}:{}", now.timestamp_nanos_opt().unwrap_or_default());
    let id = image_id(created_at, &salt, format.extension);
    let key = LocalFileStorage::image_key(&id);
    state
        .storage
        .put(&key, &image.bytes)
        .await
        .map_err(|err| ServiceError::internal(FAILURE, err))?;

    let row = ImageRow {
        id: id.clone(),
        prompt: prompt.to_string(),
        created_at,
    };
    state
        .table
        .put(&row)
        .await
        .map_err(|err| ServiceError::internal(FAILURE, err))?;
    tracing::info!(id = %id, mime_type = format.mime_type, "image generated and saved");

    Ok(Json(GenerateResponse {
        message: Some("Image generated and saved".to_string()),
        image_url: state.storage.public_url(&key),
    }))
}

async fn list_page(
    state: &AppState,
    filter: Option<String>,
    params: &ListParams,
    failure: &'static str,
) -> Result<Json<GalleryPage>, ServiceError> {
    let request = ScanRequest {
        filter,
        limit: parse_limit(params.limit.as_deref()),
        exclusive_start: decode_cursor(params.cursor.as_deref())?,
    };
    let page = state
        .table
        .scan(&request)
        .await
        .map_err(|err| ServiceError::internal(failure, err))?;
    let next_cursor = page.last_evaluated_key.map(encode_cursor).transpose()?;
    let items = page
        .rows
        .into_iter()
        .map(|row| to_record(&state.storage, row))
        .collect::<Vec<_>>();
    tracing::debug!(count = items.len(), has_more = next_cursor.is_some(), "listed images");
    Ok(Json(GalleryPage {
        items,
        has_more: next_cursor.is_some(),
        next_cursor,
    }))
}

fn list_params(query: Result<Query<ListParams>, QueryRejection>) -> Result<ListParams, ServiceError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ServiceError::Validation(rejection.body_text()))
}

pub async fn gallery_images(
    State(state): State<AppState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<GalleryPage>, ServiceError> {
    let params = list_params(query)?;
    list_page(&state, None, &params, "Error fetching gallery images").await
}

pub async fn search_images(
    State(state): State<AppState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<GalleryPage>, ServiceError> {
    let params = list_params(query)?;
    let term = params.term.clone().filter(|term| !term.is_empty());
    list_page(&state, term, &params, "Error searching images").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(parse_limit(None), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("abc")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("0")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("25")), 25);
        assert_eq!(parse_limit(Some("5000")), MAX_LIMIT);
    }

    #[test]
    fn cursor_decodes_what_it_encodes() {
        let cursor = encode_cursor("1000-a.png".to_string()).unwrap();
        assert_eq!(cursor.as_str(), r#"{"id":"1000-a.png"}"#);
        assert_eq!(
            decode_cursor(Some(cursor.as_str())).unwrap(),
            Some("1000-a.png".to_string())
        );
        assert_eq!(decode_cursor(Some("  ")).unwrap(), None);
        assert!(matches!(decode_cursor(Some("page=2")), Err(ServiceError::InvalidCursor)));
    }
}

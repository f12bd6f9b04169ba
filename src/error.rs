use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service responded with {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status { status: u16, message: Option<String> },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// The message the service put in its error body, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => message
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("{public}: {cause}")]
    Internal {
        public: &'static str,
        cause: anyhow::Error,
    },
}

impl ServiceError {
    pub fn internal(public: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        ServiceError::Internal {
            public,
            cause: cause.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidCursor => StatusCode::BAD_REQUEST,
            ServiceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let message = match &self {
            ServiceError::Internal { public, cause } => {
                tracing::error!(error = %cause, "{public}");
                public.to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(ErrorBody { message })).into_response()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid url for {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_ignores_blank_bodies() {
        let blank = ApiError::Status {
            status: 500,
            message: Some("  ".to_string()),
        };
        assert_eq!(blank.server_message(), None);

        let boom = ApiError::Status {
            status: 500,
            message: Some("boom".to_string()),
        };
        assert_eq!(boom.server_message(), Some("boom"));
        assert_eq!(ApiError::Transport("refused".into()).server_message(), None);
    }

    #[test]
    fn internal_errors_map_to_500() {
        let err = ServiceError::internal("Error generating image", anyhow::anyhow!("disk full"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ServiceError::InvalidCursor.status(), StatusCode::BAD_REQUEST);
    }
}

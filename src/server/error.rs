use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::types::Dimension;
use crate::matching::MatchError;

/// Errors returned by the HTTP API. Each maps to a stable `code` so the
/// results UI can tell "try again shortly" from "answer more questions".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("insufficient quiz signal")]
    InsufficientSignal { missing: Vec<Dimension> },
    #[error("embeddings pending for {pending} selected answers")]
    EmbeddingsPending { pending: usize },
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_dimensions: Option<Vec<Dimension>>,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InsufficientSignal { .. } => "insufficient_signal",
            ApiError::EmbeddingsPending { .. } => "embeddings_pending",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientSignal { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::EmbeddingsPending { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::InsufficientSignal { .. } => {
                "the quiz answers carry no usable signal in any dimension".into()
            }
            ApiError::EmbeddingsPending { pending } => {
                format!("still processing {pending} selected answers, try again shortly")
            }
            ApiError::Internal(_) => "internal server error".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), status = %status, error = %self, "api_error");
        } else {
            tracing::debug!(code = self.code(), status = %status, error = %self, "api_error");
        }

        let missing_dimensions = match &self {
            ApiError::InsufficientSignal { missing } => Some(missing.clone()),
            _ => None,
        };
        let body = Json(ErrorBody {
            code: self.code(),
            message: self.public_message(),
            missing_dimensions,
        });
        (status, body).into_response()
    }
}

impl From<MatchError> for ApiError {
    fn from(value: MatchError) -> Self {
        match value {
            MatchError::SessionNotFound(id) => ApiError::NotFound(format!("quiz session not found: {id}")),
            MatchError::EmbeddingsPending { pending } => ApiError::EmbeddingsPending { pending },
            MatchError::NoUsableSignal { missing } => ApiError::InsufficientSignal { missing },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        ApiError::Internal(format!("{value:#}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(value: tokio::task::JoinError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;

    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, Value) {
        let (parts, body) = err.into_response().into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn no_signal_lists_missing_dimensions() {
        let err: ApiError = MatchError::NoUsableSignal {
            missing: vec![Dimension::StyleEmotion, Dimension::Companion],
        }
        .into();
        let (status, json) = body_json(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "insufficient_signal");
        assert_eq!(json["missing_dimensions"][1], "companion");
    }

    #[tokio::test]
    async fn pending_is_service_unavailable() {
        let (status, json) = body_json(MatchError::EmbeddingsPending { pending: 2 }.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "embeddings_pending");
        assert!(json.get("missing_dimensions").is_none());
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let (status, json) = body_json(anyhow::anyhow!("disk I/O error at /var/db").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], "internal server error");
    }
}

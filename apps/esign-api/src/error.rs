//! Error types for the e-sign API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use esign_types::SigningError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Signing(e) => match e {
                SigningError::InvalidState(_) | SigningError::Integrity(_) => StatusCode::CONFLICT,
                SigningError::OrderViolation { .. } => StatusCode::LOCKED,
                SigningError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SigningError::NotFound(_) => StatusCode::NOT_FOUND,
                SigningError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                SigningError::Encryption(_) | SigningError::Storage(_) | SigningError::Render(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message, retryable) = match &self {
            ApiError::Signing(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("Signing error: {}", e);
                (e.code(), "Internal error".to_string(), e.is_retryable())
            }
            ApiError::Signing(e) => (e.code(), e.to_string(), e.is_retryable()),
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), false),
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                ("internal", "Internal error".to_string(), false)
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code,
            "retryable": retryable,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SigningError::invalid_state("x"), StatusCode::CONFLICT),
            (
                SigningError::OrderViolation { waiting_on: vec![] },
                StatusCode::LOCKED,
            ),
            (SigningError::validation("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (SigningError::Integrity("x".into()), StatusCode::CONFLICT),
            (SigningError::not_found("x"), StatusCode::NOT_FOUND),
            (SigningError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (SigningError::storage("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }
}

//! API error types.
//!
//! Every variant maps to one HTTP status.  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(ApiError::NotFound { .. })`.  Bodies are JSON objects with an
//! `error` field (plus `path` where one is known).

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Error taxonomy of the blob API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The blob does not exist.
    #[error("Not found")]
    NotFound { path: String },

    /// A required field is missing or malformed.
    #[error("{message}")]
    BadRequest { message: String },

    /// The route exists but not for this method.
    #[error("Method Not Allowed")]
    MethodNotAllowed { allow: &'static str },

    /// Copy/move target exists and overwriting was not allowed.
    #[error("Destination exists")]
    DestinationExists { path: String },

    /// Missing or unknown bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Upstream or internal failure; carries the underlying message.
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Shorthand for [`ApiError::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::DestinationExists { .. } => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        let body = match &self {
            ApiError::NotFound { path } | ApiError::DestinationExists { path } => {
                json!({ "path": path, "error": message })
            }
            ApiError::Internal(err) => {
                error!("Request failed: {:#}", err);
                json!({ "error": message })
            }
            _ => json!({ "error": message }),
        };

        let mut response = (status, Json(body)).into_response();
        match self {
            ApiError::MethodNotAllowed { allow } => {
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(allow));
            }
            ApiError::Unauthorized => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer"),
                );
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NotFound { path: "a".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::MethodNotAllowed { allow: "GET" }.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::DestinationExists { path: "b".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_not_found_body_carries_path() {
        let response = ApiError::NotFound {
            path: "folder/missing.txt".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "path": "folder/missing.txt", "error": "Not found" })
        );
    }

    #[tokio::test]
    async fn test_internal_surfaces_message() {
        let response = ApiError::Internal(anyhow::anyhow!("upload failed")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({ "error": "upload failed" }));
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow_header() {
        let response = ApiError::MethodNotAllowed { allow: "GET, POST" }.into_response();
        assert_eq!(response.headers()["allow"], "GET, POST");
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Method Not Allowed" })
        );
    }
}

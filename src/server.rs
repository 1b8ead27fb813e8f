//! Axum router construction.
//!
//! The [`app`] function wires the blob API, health check, metrics and the
//! OpenAPI document, and returns a ready-to-serve [`axum::Router`].
//!
//! `/blobs/versions` and `/blobs/{path}` share one wildcard route; the
//! handlers tell them apart by the decoded key.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::auth;
use crate::errors::{generate_request_id, ApiError};
use crate::handlers::blobs::{self as blob_handlers, method_not_allowed, BLOBS_ALLOW};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the blob portal API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Blob Portal API",
        version = "0.1.0",
        description = "Listing, streaming, copy/move and version history over an Azure Blob Storage container"
    ),
    paths(
        health_check,
        blob_handlers::list_blobs,
        blob_handlers::upload_blob,
        blob_handlers::get_blob,
        blob_handlers::put_blob,
        blob_handlers::delete_blob,
        blob_handlers::list_versions,
    ),
    components(schemas(
        crate::blobs::Folder,
        crate::blobs::FileRow,
        crate::blobs::Listing,
        crate::blobs::BlobVersion,
        crate::blobs::BlobMetadata,
        crate::blobs::CopyOutcome,
        blob_handlers::RenameRequest,
        blob_handlers::UploadResponse,
        blob_handlers::VersionsResponse,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Blobs", description = "Blob listing, transfer and versions"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = state.config.server.cors;

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/blobs",
            get(blob_handlers::list_blobs)
                .post(blob_handlers::upload_blob)
                .fallback(|| async { method_not_allowed(BLOBS_ALLOW) }),
        )
        .route(
            "/blobs/*path",
            get(blob_handlers::get_blob)
                .put(blob_handlers::put_blob)
                .delete(blob_handlers::delete_blob)
                .fallback(blob_handlers::blob_method_not_allowed),
        )
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Uploads stream straight through; no body cap.
        .layer(DefaultBodyLimit::disable());

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` and `server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }
    headers.insert("server", HeaderValue::from_static("blob-portal"));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Bearer-token gate; see [`auth::is_authorized`] for the skip rules.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !auth::is_authorized(
        &state.config.auth,
        req.method(),
        req.uri().path(),
        req.headers(),
    ) {
        debug!("Rejected unauthenticated {} {}", req.method(), req.uri().path());
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- plain `ok`.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Service is up", body = String)
    )
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// `GET /openapi.json` -- the generated OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

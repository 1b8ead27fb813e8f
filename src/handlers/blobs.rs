//! Handlers for the `/blobs` API.
//!
//! Keys in `/blobs/{path}` are taken from the raw request path and decoded
//! one segment at a time.  `/blobs/versions` shares the wildcard route and
//! is dispatched from [`get_blob`].

use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use garde::Validate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use crate::blobs::{BlobMetadata, BlobVersion, Listing};
use crate::errors::ApiError;
use crate::paths::{blob_key_from_uri_path, decode_segment, version_target};
use crate::AppState;

/// `Allow` for `/blobs`.
pub const BLOBS_ALLOW: &str = "GET, POST";
/// `Allow` for `/blobs/{path}`.
pub const BLOB_ALLOW: &str = "GET,PUT,DELETE";
/// `Allow` for `/blobs/versions`.
pub const VERSIONS_ALLOW: &str = "GET";

const MOUNT: &str = "/blobs";
const VERSIONS_KEY: &str = "versions";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Largest rename body read before answering with the usage error.
const RENAME_BODY_LIMIT: usize = 64 * 1024;

// -- Request types ------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Virtual folder to list; root when absent.
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UploadQuery {
    /// File name, used when `x-file-name` is absent.
    pub name: Option<String>,
    /// Target folder, used when `x-prefix` is absent.
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BlobQuery {
    /// `1` returns properties as JSON instead of the bytes.
    pub meta: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct VersionsQuery {
    /// Exact blob key.
    pub path: Option<String>,
}

/// Body of a rename request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[garde(pattern(r"^rename$"))]
    pub action: String,
    #[garde(length(min = 1))]
    pub new_path: String,
}

const RENAME_USAGE: &str = "PUT requires { action: \"rename\", newPath } or x-replace header";

/// Parse and validate a rename body; any failure yields the usage error.
fn parse_rename(body: &[u8]) -> Result<RenameRequest, ApiError> {
    let request: RenameRequest =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request(RENAME_USAGE))?;
    request
        .validate()
        .map_err(|_| ApiError::bad_request(RENAME_USAGE))?;
    Ok(request)
}

// -- Response types -----------------------------------------------------------

#[derive(Debug, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub ok: bool,
    pub path: String,
    pub content_type: String,
}

#[derive(Debug, serde::Serialize, ToSchema)]
pub struct VersionsResponse {
    pub versions: Vec<BlobVersion>,
}

/// First value of `name` as a non-empty string.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Error for a method the route does not serve.
pub fn method_not_allowed(allow: &'static str) -> ApiError {
    ApiError::MethodNotAllowed { allow }
}

/// Method fallback for `/blobs/*path`; `/blobs/versions` only serves GET.
pub async fn blob_method_not_allowed(uri: Uri) -> ApiError {
    if blob_key_from_uri_path(uri.path(), MOUNT) == VERSIONS_KEY {
        method_not_allowed(VERSIONS_ALLOW)
    } else {
        method_not_allowed(BLOB_ALLOW)
    }
}

// -- /blobs -------------------------------------------------------------------

/// List folders and files under a prefix.
#[utoipa::path(
    get,
    path = "/blobs",
    tag = "Blobs",
    operation_id = "ListBlobs",
    params(ListQuery),
    responses(
        (status = 200, description = "Folders and files under the prefix", body = Listing),
        (status = 500, description = "Storage error")
    )
)]
pub async fn list_blobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Listing>, ApiError> {
    let listing = state.blobs.list_prefix(query.prefix.as_deref()).await?;
    Ok(Json(listing))
}

/// Stream the request body into a new blob.
#[utoipa::path(
    post,
    path = "/blobs",
    tag = "Blobs",
    operation_id = "UploadBlob",
    params(
        UploadQuery,
        ("x-file-name" = Option<String>, Header, description = "File name"),
        ("x-prefix" = Option<String>, Header, description = "Target folder"),
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Blob written", body = UploadResponse),
        (status = 400, description = "No file name given"),
        (status = 500, description = "Storage error")
    )
)]
pub async fn upload_blob(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, ApiError> {
    let name = header_str(&headers, "x-file-name")
        .map(str::to_string)
        .or(query.name.filter(|n| !n.is_empty()))
        .ok_or_else(|| {
            ApiError::bad_request(
                "Missing file name. Provide header \"x-file-name\" or query ?name=",
            )
        })?;
    let prefix = header_str(&headers, "x-prefix")
        .map(str::to_string)
        .or(query.prefix);
    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(anyhow::Error::from))
        .boxed();
    let path = state
        .blobs
        .upload(prefix.as_deref(), &name, &content_type, stream)
        .await?;

    Ok(Json(UploadResponse {
        ok: true,
        path,
        content_type,
    }))
}

// -- /blobs/{path} ------------------------------------------------------------

/// Stream a blob, or return its properties with `?meta=1`.
#[utoipa::path(
    get,
    path = "/blobs/{path}",
    tag = "Blobs",
    operation_id = "GetBlob",
    params(
        ("path" = String, Path, description = "Blob key"),
        BlobQuery,
    ),
    responses(
        (status = 200, description = "Blob bytes, or properties with ?meta=1", body = BlobMetadata),
        (status = 404, description = "Blob not found"),
        (status = 500, description = "Storage error")
    )
)]
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Query(query): Query<BlobQuery>,
) -> Result<Response, ApiError> {
    let path = blob_key_from_uri_path(uri.path(), MOUNT);
    if path == VERSIONS_KEY {
        let query = Query::<VersionsQuery>::try_from_uri(&uri)
            .map_err(|_| ApiError::bad_request("Missing ?path="))?;
        return list_versions(State(state), query).await;
    }

    if query.meta.as_deref() == Some("1") {
        let meta = state
            .blobs
            .metadata(&path)
            .await?
            .ok_or(ApiError::NotFound { path })?;
        return Ok(Json(meta).into_response());
    }

    let download = state
        .blobs
        .download(&path)
        .await?
        .ok_or(ApiError::NotFound { path })?;

    let content_type = download
        .content_type
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=0"),
    );
    if let Some(len) = download.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

/// Delete a blob and its snapshots.
#[utoipa::path(
    delete,
    path = "/blobs/{path}",
    tag = "Blobs",
    operation_id = "DeleteBlob",
    params(("path" = String, Path, description = "Blob key")),
    responses(
        (status = 200, description = "Blob deleted"),
        (status = 404, description = "Blob not found"),
        (status = 500, description = "Storage error")
    )
)]
pub async fn delete_blob(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let path = blob_key_from_uri_path(uri.path(), MOUNT);
    if path == VERSIONS_KEY {
        return method_not_allowed(VERSIONS_ALLOW).into_response();
    }

    match state.blobs.delete_blob(&path).await {
        Ok(true) => Json(json!({ "ok": true, "path": path })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "path": path, "error": "Blob not found" })),
        )
            .into_response(),
        Err(e) => {
            error!("Delete of {} failed: {:#}", path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "path": path, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Replace a blob (`x-replace`) or rename it (JSON body).
#[utoipa::path(
    put,
    path = "/blobs/{path}",
    tag = "Blobs",
    operation_id = "PutBlob",
    params(
        ("path" = String, Path, description = "Blob key"),
        ("x-replace" = Option<String>, Header, description = "Replace the blob with the raw body"),
    ),
    request_body(content = RenameRequest, description = "Rename target when x-replace is absent"),
    responses(
        (status = 200, description = "Blob replaced or renamed"),
        (status = 400, description = "Neither a rename body nor x-replace"),
        (status = 404, description = "Source blob not found"),
        (status = 409, description = "Destination exists"),
        (status = 500, description = "Storage error")
    )
)]
pub async fn put_blob(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let path = blob_key_from_uri_path(uri.path(), MOUNT);
    if path == VERSIONS_KEY {
        return Err(method_not_allowed(VERSIONS_ALLOW));
    }

    if header_str(&headers, "x-replace").is_some() {
        let data = body::to_bytes(body, usize::MAX).await.map_err(|e| {
            ApiError::Internal(anyhow::anyhow!("Failed to read request body: {}", e))
        })?;
        let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string);
        state.blobs.put_blob(&path, data, content_type).await?;
        return Ok(Json(json!({ "ok": true, "replaced": true })).into_response());
    }

    let data = body::to_bytes(body, RENAME_BODY_LIMIT)
        .await
        .map_err(|_| ApiError::bad_request(RENAME_USAGE))?;
    let rename = parse_rename(&data)?;
    let target = decode_segment(&rename.new_path);
    let overwrite = state.config.transfer.overwrite_on_move;
    state.blobs.move_blob(&path, &target, overwrite).await?;

    Ok(Json(json!({ "ok": true, "renamed": { "from": path, "to": target } })).into_response())
}

// -- /blobs/versions ----------------------------------------------------------

/// Version history of one blob, newest first.
#[utoipa::path(
    get,
    path = "/blobs/versions",
    tag = "Blobs",
    operation_id = "ListBlobVersions",
    params(VersionsQuery),
    responses(
        (status = 200, description = "Versions, newest first", body = VersionsResponse),
        (status = 400, description = "Missing ?path="),
        (status = 500, description = "Storage error")
    )
)]
pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VersionsQuery>,
) -> Result<Response, ApiError> {
    let raw = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing ?path="))?;
    let target = version_target(&raw);

    match state.blobs.list_versions(target).await {
        Ok(versions) => Ok(Json(VersionsResponse { versions }).into_response()),
        Err(e) => {
            error!("Listing versions of {} failed: {:#}", target, e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to list versions" })),
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rename_accepts_valid_body() {
        let req = parse_rename(br#"{"action":"rename","newPath":"a/b.txt"}"#).unwrap();
        assert_eq!(req.new_path, "a/b.txt");
    }

    #[test]
    fn test_parse_rename_rejects_bad_bodies() {
        for body in [
            &b""[..],
            b"not json",
            br#"{}"#,
            br#"{"action":"copy","newPath":"x"}"#,
            br#"{"action":"rename","newPath":""}"#,
        ] {
            let err = parse_rename(body).unwrap_err();
            assert_eq!(err.to_string(), RENAME_USAGE);
        }
    }

    #[test]
    fn test_header_str_ignores_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("x-file-name", HeaderValue::from_static(""));
        headers.insert("x-prefix", HeaderValue::from_static("docs"));
        assert_eq!(header_str(&headers, "x-file-name"), None);
        assert_eq!(header_str(&headers, "x-prefix"), Some("docs"));
    }
}

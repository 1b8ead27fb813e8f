//! Abstract blob store trait.
//!
//! Every backend must implement [`BlobStore`].  The trait exposes the
//! primitive calls the portal makes against a blob service (flat listing,
//! properties, streamed download/upload, delete, signed read URLs and
//! service-side copy) so the listing, copy/move and version logic in
//! [`crate::blobs`] stays backend-agnostic.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// One entry of a flat listing.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobItem {
    /// Full blob key.
    pub name: String,
    /// Content length in bytes.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// Version id, present when versions were requested and versioning is on.
    pub version_id: Option<String>,
    /// Whether this entry is the blob's current version.
    pub is_current_version: bool,
}

/// Properties of a blob's current version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobProperties {
    pub content_type: Option<String>,
    pub size: u64,
    pub created_on: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    /// User metadata (`x-ms-meta-*`).
    pub metadata: HashMap<String, String>,
    /// Status of the last copy that targeted this blob, if any.
    pub copy_status: Option<CopyStatus>,
}

/// An open download.
pub struct BlobDownload {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// State of a service-side copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Aborted,
    Failed,
}

impl CopyStatus {
    /// Parse an `x-ms-copy-status` value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(CopyStatus::Pending),
            "success" => Some(CopyStatus::Success),
            "aborted" => Some(CopyStatus::Aborted),
            "failed" => Some(CopyStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Success => "success",
            CopyStatus::Aborted => "aborted",
            CopyStatus::Failed => "failed",
        }
    }
}

/// A service-side copy the store has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStarted {
    /// Id to pass to [`BlobStore::abort_copy`]; absent if the store did not report one.
    pub copy_id: Option<String>,
    pub status: CopyStatus,
}

/// What a flat listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include every version, not just current blobs.
    pub include_versions: bool,
    /// Include user metadata.
    pub include_metadata: bool,
}

/// Block size and parallelism for streamed uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
}

/// Async blob store contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Every blob whose key starts with `prefix`, with no hierarchy applied.
    fn list_flat(
        &self,
        prefix: &str,
        options: ListOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BlobItem>>> + Send + '_>>;

    /// Properties of the current version, or `None` if the blob is absent.
    fn properties(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobProperties>>> + Send + '_>>;

    /// Open the blob for streaming, or `None` if it is absent.
    fn download(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobDownload>>> + Send + '_>>;

    /// Write `body` to `path` in blocks of `options.chunk_size`.
    fn upload_stream(
        &self,
        path: &str,
        body: ByteStream,
        content_type: Option<String>,
        options: UploadOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Write `data` to `path` in a single call.
    fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Delete the blob and its snapshots; `false` when it did not exist.
    fn delete_if_exists(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// A read-only URL for `path` valid for `ttl`.
    fn read_url(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Start a service-side copy of `source_url` onto `dst_path`.
    fn start_copy_from_url(
        &self,
        dst_path: &str,
        source_url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CopyStarted>> + Send + '_>>;

    /// Current copy status of `dst_path`; `None` if the blob is absent.
    fn copy_status(
        &self,
        dst_path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CopyStatus>>> + Send + '_>>;

    /// Cancel the pending copy `copy_id` onto `dst_path`.  A copy that has
    /// already finished is not an error.
    fn abort_copy(
        &self,
        dst_path: &str,
        copy_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_status_parse() {
        assert_eq!(CopyStatus::parse("success"), Some(CopyStatus::Success));
        assert_eq!(CopyStatus::parse("Pending"), Some(CopyStatus::Pending));
        assert_eq!(CopyStatus::parse(" aborted "), Some(CopyStatus::Aborted));
        assert_eq!(CopyStatus::parse("failed"), Some(CopyStatus::Failed));
        assert_eq!(CopyStatus::parse("unknown"), None);
    }

    #[test]
    fn test_copy_status_round_trips_through_str() {
        for status in [
            CopyStatus::Pending,
            CopyStatus::Success,
            CopyStatus::Aborted,
            CopyStatus::Failed,
        ] {
            assert_eq!(CopyStatus::parse(status.as_str()), Some(status));
        }
    }
}

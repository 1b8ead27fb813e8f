//! Blob operations behind the HTTP surface.
//!
//! [`BlobService`] turns the primitive [`BlobStore`] calls into the
//! portal's operations: folder/file listings under a virtual prefix,
//! streamed uploads, copy and move with a service-side fast path, and
//! version history.  Everything is recomputed per call; nothing is cached.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::errors::ApiError;
use crate::metrics::record_copy_outcome;
use crate::paths::normalize_prefix;
use crate::storage::backend::{
    BlobDownload, BlobStore, ByteStream, CopyStatus, ListOptions, UploadOptions,
};

// -- Response types -----------------------------------------------------------

/// A virtual folder derived from blob keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Folder {
    pub name: String,
    /// Prefix of the folder, ending in "/".
    pub path: String,
}

/// A blob directly under the listed prefix.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// ISO-8601 UTC with milliseconds, or "" when unknown.
    pub last_modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One version of a blob.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlobVersion {
    pub id: String,
    pub last_modified: String,
    pub size: u64,
    pub is_current: bool,
}

/// Folders and files directly under `prefix`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Listing {
    pub prefix: String,
    pub folders: Vec<Folder>,
    pub files: Vec<FileRow>,
}

/// Properties of a blob's current version.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// How a copy or move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CopyOutcome {
    /// The blob service copied the bytes itself.
    ServiceCopy,
    /// Bytes were streamed through this process.
    StreamCopy,
    /// Source and destination were the same key.
    Noop,
}

impl CopyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyOutcome::ServiceCopy => "service-copy",
            CopyOutcome::StreamCopy => "stream-copy",
            CopyOutcome::Noop => "noop",
        }
    }
}

fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// -- Settings -----------------------------------------------------------------

/// Transfer tuning for uploads and copies.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub upload_concurrency: usize,
    pub copy_concurrency: usize,
    pub copy_poll_interval: Duration,
    /// Upper bound on a service-side copy, polling included.
    pub copy_timeout: Duration,
    /// Lifetime of signed read URLs handed to the copy.
    pub sas_ttl: Duration,
}

impl TransferSettings {
    pub fn from_config(config: &Config) -> Self {
        let transfer = &config.transfer;
        Self {
            chunk_size: transfer.chunk_size,
            upload_concurrency: transfer.upload_concurrency,
            copy_concurrency: transfer.copy_concurrency,
            copy_poll_interval: Duration::from_millis(transfer.copy_poll_interval_ms),
            copy_timeout: Duration::from_secs(transfer.copy_timeout_secs),
            sas_ttl: Duration::from_secs(config.storage.azure.sas_minutes * 60),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// -- Service ------------------------------------------------------------------

/// Blob operations over one container.
#[derive(Clone)]
pub struct BlobService {
    store: Arc<dyn BlobStore>,
    settings: TransferSettings,
}

impl BlobService {
    pub fn new(store: Arc<dyn BlobStore>, settings: TransferSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// List folders and files directly under `raw_prefix`.
    ///
    /// Blobs deeper than one level collapse into a folder named by the
    /// first segment after the prefix.
    pub async fn list_prefix(&self, raw_prefix: Option<&str>) -> anyhow::Result<Listing> {
        let prefix = normalize_prefix(raw_prefix);
        let items = self
            .store
            .list_flat(&prefix, ListOptions::default())
            .await?;

        let mut folder_names = BTreeSet::new();
        let mut files = Vec::new();
        for item in items {
            let Some(rel) = item.name.strip_prefix(&prefix) else {
                continue;
            };
            match rel.split_once('/') {
                Some((folder, _)) => {
                    folder_names.insert(folder.to_string());
                }
                None => files.push(FileRow {
                    name: rel.to_string(),
                    path: item.name.clone(),
                    size: item.size,
                    last_modified: item.last_modified.map(iso_millis).unwrap_or_default(),
                    content_type: item.content_type,
                }),
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let folders = folder_names
            .into_iter()
            .map(|name| Folder {
                path: format!("{}{}/", prefix, name),
                name,
            })
            .collect();

        Ok(Listing {
            prefix,
            folders,
            files,
        })
    }

    /// Stream `body` into `prefix + name`; returns the blob key.
    pub async fn upload(
        &self,
        raw_prefix: Option<&str>,
        name: &str,
        content_type: &str,
        body: ByteStream,
    ) -> anyhow::Result<String> {
        let path = format!("{}{}", normalize_prefix(raw_prefix), name);
        self.store
            .upload_stream(
                &path,
                body,
                Some(content_type.to_string()),
                UploadOptions {
                    chunk_size: self.settings.chunk_size,
                    concurrency: self.settings.upload_concurrency,
                },
            )
            .await?;
        info!("Uploaded blob {} ({})", path, content_type);
        Ok(path)
    }

    /// Replace the blob at `path` in one write.
    pub async fn put_blob(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> anyhow::Result<()> {
        let len = data.len();
        self.store.put(path, data, content_type).await?;
        info!("Replaced blob {} ({} bytes)", path, len);
        Ok(())
    }

    /// Delete `path` and its snapshots; `false` when it did not exist.
    pub async fn delete_blob(&self, path: &str) -> anyhow::Result<bool> {
        let deleted = self.store.delete_if_exists(path).await?;
        if deleted {
            info!("Deleted blob {}", path);
        }
        Ok(deleted)
    }

    pub async fn metadata(&self, path: &str) -> anyhow::Result<Option<BlobMetadata>> {
        let props = self.store.properties(path).await?;
        Ok(props.map(|p| BlobMetadata {
            path: path.to_string(),
            content_type: p.content_type,
            size: p.size,
            created_on: p.created_on.map(iso_millis),
            last_modified: p.last_modified.map(iso_millis),
            metadata: p.metadata,
        }))
    }

    pub async fn download(&self, path: &str) -> anyhow::Result<Option<BlobDownload>> {
        self.store.download(path).await
    }

    /// Copy `src` onto `dst`.
    ///
    /// Tries a service-side copy from a signed read URL first; anything but
    /// a clean `success` (errors and timeouts included) falls back to
    /// streaming the bytes through this process.
    pub async fn copy_blob(
        &self,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<CopyOutcome, ApiError> {
        if src.is_empty() || dst.is_empty() {
            return Err(ApiError::bad_request("Source and destination are required"));
        }
        if src == dst {
            record_copy_outcome(CopyOutcome::Noop);
            return Ok(CopyOutcome::Noop);
        }
        if self.store.properties(src).await?.is_none() {
            return Err(ApiError::NotFound {
                path: src.to_string(),
            });
        }
        if !overwrite && self.store.properties(dst).await?.is_some() {
            return Err(ApiError::DestinationExists {
                path: dst.to_string(),
            });
        }

        let outcome = match self.service_copy(src, dst).await {
            Ok(Some(CopyStatus::Success)) => CopyOutcome::ServiceCopy,
            other => {
                match other {
                    Ok(Some(status)) => warn!(
                        "Service copy {} -> {} ended with status {}, streaming instead",
                        src,
                        dst,
                        status.as_str()
                    ),
                    Err(e) => warn!(
                        "Service copy {} -> {} failed, streaming instead: {:#}",
                        src, dst, e
                    ),
                    Ok(None) => warn!(
                        "Service copy {} -> {} timed out after {:?}, streaming instead",
                        src, dst, self.settings.copy_timeout
                    ),
                }
                self.stream_copy(src, dst).await?;
                CopyOutcome::StreamCopy
            }
        };

        info!("Copied blob {} -> {} ({})", src, dst, outcome.as_str());
        record_copy_outcome(outcome);
        Ok(outcome)
    }

    /// Copy, then delete the source unless the copy was a no-op.
    pub async fn move_blob(
        &self,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<CopyOutcome, ApiError> {
        let outcome = self.copy_blob(src, dst, overwrite).await?;
        if outcome != CopyOutcome::Noop {
            self.store.delete_if_exists(src).await?;
            info!("Moved blob {} -> {}", src, dst);
        }
        Ok(outcome)
    }

    /// Service-side copy bounded by `copy_timeout`; `None` when it ran out.
    ///
    /// A copy still pending at the deadline is aborted so the stream copy
    /// that follows owns the destination.
    async fn service_copy(&self, src: &str, dst: &str) -> anyhow::Result<Option<CopyStatus>> {
        let deadline = tokio::time::Instant::now() + self.settings.copy_timeout;
        let url = self.store.read_url(src, self.settings.sas_ttl).await?;

        let started =
            match tokio::time::timeout_at(deadline, self.store.start_copy_from_url(dst, &url))
                .await
            {
                Ok(started) => started?,
                Err(_) => return Ok(None),
            };

        match tokio::time::timeout_at(deadline, self.poll_copy(src, dst, started.status)).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                self.abort_copy(dst, started.copy_id.as_deref()).await;
                Ok(None)
            }
        }
    }

    async fn abort_copy(&self, dst: &str, copy_id: Option<&str>) {
        let Some(copy_id) = copy_id else {
            warn!("Pending copy onto {} has no copy id, cannot abort", dst);
            return;
        };
        match self.store.abort_copy(dst, copy_id).await {
            Ok(()) => info!("Aborted pending copy {} onto {}", copy_id, dst),
            Err(e) => warn!("Failed to abort copy {} onto {}: {:#}", copy_id, dst, e),
        }
    }

    async fn poll_copy(
        &self,
        src: &str,
        dst: &str,
        mut status: CopyStatus,
    ) -> anyhow::Result<CopyStatus> {
        while status == CopyStatus::Pending {
            tokio::time::sleep(self.settings.copy_poll_interval).await;
            status = self
                .store
                .copy_status(dst)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Copy destination {} disappeared", dst))?;
            debug!("Copy {} -> {} status {}", src, dst, status.as_str());
        }
        Ok(status)
    }

    async fn stream_copy(&self, src: &str, dst: &str) -> anyhow::Result<()> {
        let download = self
            .store
            .download(src)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Copy source {} disappeared", src))?;
        self.store
            .upload_stream(
                dst,
                download.body,
                download.content_type,
                UploadOptions {
                    chunk_size: self.settings.chunk_size,
                    concurrency: self.settings.copy_concurrency,
                },
            )
            .await
    }

    /// Versions of exactly `path`, newest first.
    pub async fn list_versions(&self, path: &str) -> anyhow::Result<Vec<BlobVersion>> {
        let options = ListOptions {
            include_versions: true,
            include_metadata: true,
        };
        let mut items: Vec<_> = self
            .store
            .list_flat(path, options)
            .await?
            .into_iter()
            .filter(|item| item.name == path && item.version_id.is_some())
            .collect();
        items.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.version_id.cmp(&a.version_id))
        });

        Ok(items
            .into_iter()
            .map(|item| BlobVersion {
                id: item.version_id.unwrap_or_default(),
                last_modified: item.last_modified.map(iso_millis).unwrap_or_default(),
                size: item.size,
                is_current: item.is_current_version,
            })
            .collect())
    }
}

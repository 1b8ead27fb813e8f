//! In-memory blob store.
//!
//! Blobs are held in a `tokio::sync::RwLock<BTreeMap<...>>` keyed by blob
//! name, so flat listings come back in key order the way the Azure service
//! returns them.  Every write appends a new version; deleting a blob keeps
//! its history but leaves it without a current version, mirroring a
//! container with versioning enabled.
//!
//! Read URLs take the form `memory://{path}` and are the only sources
//! [`BlobStore::start_copy_from_url`] accepts.  A few switches let tests
//! make the service-side copy fail, stay pending for a number of polls, or
//! reject uploads outright.  Aborted copy ids are recorded for inspection.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::backend::{
    BlobDownload, BlobItem, BlobProperties, BlobStore, ByteStream, CopyStarted, CopyStatus,
    ListOptions, UploadOptions,
};
use super::stream::{once, rechunk};

const URL_SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    data: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CopyRecord {
    id: String,
    status: CopyStatus,
}

#[derive(Debug, Clone)]
struct BlobEntry {
    created_on: DateTime<Utc>,
    versions: Vec<StoredVersion>,
    /// False once the blob is deleted; history stays listable.
    live: bool,
    metadata: HashMap<String, String>,
    copy: Option<CopyRecord>,
}

impl BlobEntry {
    fn current(&self) -> Option<&StoredVersion> {
        if self.live {
            self.versions.last()
        } else {
            None
        }
    }
}

/// Versioned in-process blob store.
pub struct MemoryBlobStore {
    blobs: tokio::sync::RwLock<BTreeMap<String, BlobEntry>>,
    /// Last timestamp handed out; keeps versions strictly ordered.
    clock: Mutex<DateTime<Utc>>,
    fail_service_copy: AtomicBool,
    fail_uploads: AtomicBool,
    pending_polls: AtomicU32,
    aborted_copies: Mutex<Vec<String>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: tokio::sync::RwLock::new(BTreeMap::new()),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
            fail_service_copy: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            pending_polls: AtomicU32::new(0),
            aborted_copies: Mutex::new(Vec::new()),
        }
    }

    /// Make `start_copy_from_url` return an error.
    pub fn set_service_copy_fails(&self, fail: bool) {
        self.fail_service_copy.store(fail, Ordering::SeqCst);
    }

    /// Make `upload_stream` and `put` return an error.
    pub fn set_uploads_fail(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Report the next service-side copy as pending for `polls` status checks.
    pub fn set_copy_pending_polls(&self, polls: u32) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    /// Copy ids passed to a successful `abort_copy`, oldest first.
    pub fn aborted_copies(&self) -> Vec<String> {
        self.aborted_copies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current bytes of `path`, if live.
    pub async fn contents(&self, path: &str) -> Option<Bytes> {
        let blobs = self.blobs.read().await;
        blobs
            .get(path)
            .and_then(|entry| entry.current())
            .map(|version| version.data.clone())
    }

    /// Strictly increasing wall-clock timestamp.
    fn tick(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().max(*last + chrono::Duration::milliseconds(1));
        *last = now;
        now
    }

    async fn write_version(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<String>,
        copy: Option<CopyRecord>,
    ) {
        let now = self.tick();
        let version = StoredVersion {
            version_id: now.to_rfc3339_opts(SecondsFormat::Nanos, true),
            data,
            content_type,
            last_modified: now,
        };

        let mut blobs = self.blobs.write().await;
        let entry = blobs.entry(path.to_string()).or_insert_with(|| BlobEntry {
            created_on: now,
            versions: Vec::new(),
            live: false,
            metadata: HashMap::new(),
            copy: None,
        });
        if !entry.live {
            entry.created_on = now;
        }
        entry.versions.push(version);
        entry.live = true;
        entry.copy = copy;
    }

    fn check_uploads(&self) -> anyhow::Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            anyhow::bail!("upload rejected by memory store");
        }
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn list_flat(
        &self,
        prefix: &str,
        options: ListOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BlobItem>>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            let mut items = Vec::new();

            for (name, entry) in blobs.range(prefix.clone()..) {
                if !name.starts_with(&prefix) {
                    break;
                }
                let newest = entry.versions.len().saturating_sub(1);
                for (idx, version) in entry.versions.iter().enumerate() {
                    let is_current = entry.live && idx == newest;
                    if !options.include_versions && !is_current {
                        continue;
                    }
                    items.push(BlobItem {
                        name: name.clone(),
                        size: version.data.len() as u64,
                        last_modified: Some(version.last_modified),
                        content_type: version.content_type.clone(),
                        version_id: options
                            .include_versions
                            .then(|| version.version_id.clone()),
                        is_current_version: is_current,
                    });
                }
            }

            debug!("Memory list_flat: prefix='{}' items={}", prefix, items.len());
            Ok(items)
        })
    }

    fn properties(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobProperties>>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            let Some(entry) = blobs.get(&path) else {
                return Ok(None);
            };
            Ok(entry.current().map(|version| BlobProperties {
                content_type: version.content_type.clone(),
                size: version.data.len() as u64,
                created_on: Some(entry.created_on),
                last_modified: Some(version.last_modified),
                metadata: entry.metadata.clone(),
                copy_status: entry.copy.as_ref().map(|c| c.status),
            }))
        })
    }

    fn download(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobDownload>>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            Ok(blobs
                .get(&path)
                .and_then(|entry| entry.current())
                .map(|version| BlobDownload {
                    content_type: version.content_type.clone(),
                    content_length: Some(version.data.len() as u64),
                    body: once(version.data.clone()),
                }))
        })
    }

    fn upload_stream(
        &self,
        path: &str,
        body: ByteStream,
        content_type: Option<String>,
        options: UploadOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            self.check_uploads()?;
            let data = rechunk(body, options.chunk_size)
                .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await?
                .freeze();

            debug!("Memory upload_stream: path={} bytes={}", path, data.len());
            self.write_version(&path, data, content_type, None).await;
            Ok(())
        })
    }

    fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            self.check_uploads()?;
            debug!("Memory put: path={} bytes={}", path, data.len());
            self.write_version(&path, data, content_type, None).await;
            Ok(())
        })
    }

    fn delete_if_exists(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let mut blobs = self.blobs.write().await;
            match blobs.get_mut(&path) {
                Some(entry) if entry.live => {
                    entry.live = false;
                    debug!("Memory delete: path={}", path);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn read_url(
        &self,
        path: &str,
        _ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let url = format!("{URL_SCHEME}{path}");
        Box::pin(async move { Ok(url) })
    }

    fn start_copy_from_url(
        &self,
        dst_path: &str,
        source_url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CopyStarted>> + Send + '_>> {
        let dst_path = dst_path.to_string();
        let source_url = source_url.to_string();
        Box::pin(async move {
            if self.fail_service_copy.load(Ordering::SeqCst) {
                anyhow::bail!("service-side copy unavailable");
            }
            let src_path = source_url
                .strip_prefix(URL_SCHEME)
                .ok_or_else(|| anyhow::anyhow!("Unsupported copy source: {}", source_url))?;

            let (data, content_type) = {
                let blobs = self.blobs.read().await;
                let version = blobs
                    .get(src_path)
                    .and_then(|entry| entry.current())
                    .ok_or_else(|| anyhow::anyhow!("Copy source not found: {}", src_path))?;
                (version.data.clone(), version.content_type.clone())
            };

            let status = if self.pending_polls.load(Ordering::SeqCst) > 0 {
                CopyStatus::Pending
            } else {
                CopyStatus::Success
            };
            let copy_id = uuid::Uuid::new_v4().to_string();
            let record = CopyRecord {
                id: copy_id.clone(),
                status,
            };
            self.write_version(&dst_path, data, content_type, Some(record))
                .await;
            Ok(CopyStarted {
                copy_id: Some(copy_id),
                status,
            })
        })
    }

    fn copy_status(
        &self,
        dst_path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CopyStatus>>> + Send + '_>> {
        let dst_path = dst_path.to_string();
        Box::pin(async move {
            let mut blobs = self.blobs.write().await;
            let Some(entry) = blobs.get_mut(&dst_path).filter(|e| e.live) else {
                return Ok(None);
            };
            let Some(copy) = entry.copy.as_mut() else {
                return Ok(Some(CopyStatus::Success));
            };
            if copy.status == CopyStatus::Pending {
                let remaining = self.pending_polls.load(Ordering::SeqCst);
                if remaining <= 1 {
                    self.pending_polls.store(0, Ordering::SeqCst);
                    copy.status = CopyStatus::Success;
                } else {
                    self.pending_polls.store(remaining - 1, Ordering::SeqCst);
                }
            }
            Ok(Some(copy.status))
        })
    }

    fn abort_copy(
        &self,
        dst_path: &str,
        copy_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let dst_path = dst_path.to_string();
        let copy_id = copy_id.to_string();
        Box::pin(async move {
            let mut blobs = self.blobs.write().await;
            let copy = blobs
                .get_mut(&dst_path)
                .and_then(|entry| entry.copy.as_mut())
                .filter(|copy| copy.id == copy_id)
                .ok_or_else(|| anyhow::anyhow!("No copy {} on {}", copy_id, dst_path))?;
            if copy.status == CopyStatus::Pending {
                copy.status = CopyStatus::Aborted;
                self.pending_polls.store(0, Ordering::SeqCst);
                debug!("Memory store aborted copy {} on {}", copy_id, dst_path);
            }
            self.aborted_copies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(copy_id);
            Ok(())
        })
    }
}

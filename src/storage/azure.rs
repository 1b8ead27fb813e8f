//! Azure Blob Storage store.
//!
//! Talks to a single container through the Azure Blob REST API using
//! `reqwest`.  Only the calls the portal needs are implemented:
//!
//!   `list_flat()`           -> List Blobs (`NextMarker` pages merged)
//!   `properties()`          -> Get Blob Properties (HEAD)
//!   `download()`            -> Get Blob, body streamed through
//!   `upload_stream()`       -> Put Block per chunk, then Put Block List
//!   `put()`                 -> Put Blob
//!   `delete_if_exists()`    -> Delete Blob with `x-ms-delete-snapshots: include`
//!   `read_url()`            -> Service SAS (`sp=r`, `sr=b`) signed locally
//!   `start_copy_from_url()` -> Copy Blob from a URL
//!   `copy_status()`         -> `x-ms-copy-status` from Get Blob Properties
//!   `abort_copy()`          -> Abort Copy Blob
//!
//! Block IDs: `base64(format!("{upload_id}:{index:06}"))` -- one random
//! upload id per stream so concurrent uploads to the same key never share
//! uncommitted blocks, and every ID has the same length as the API requires.
//!
//! Credentials are resolved, in order, from:
//!   - the configured or `AZURE_STORAGE_CONNECTION_STRING` connection string
//!   - `storage.azure.account_key` / `storage.azure.sas_token`
//!   - `AZURE_STORAGE_KEY` (Shared Key auth)
//!   - `AZURE_STORAGE_SAS_TOKEN` (SAS token auth)

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{
    BlobDownload, BlobItem, BlobProperties, BlobStore, ByteStream, CopyStarted, CopyStatus,
    ListOptions, UploadOptions,
};
use super::stream::rechunk;
use crate::config::AzureStorageConfig;
use crate::retry::{send_with_retry, RetryPolicy};

/// Azure REST API version used for all requests and signed URLs.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Account name and key of the local storage emulator (Azurite).
const DEV_STORAGE_ACCOUNT: &str = "devstoreaccount1";
const DEV_STORAGE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_STORAGE_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Signed URLs start this many seconds in the past to tolerate clock skew.
const SAS_CLOCK_SKEW_SECS: i64 = 60;

/// Percent-encoding set for blob names in URLs: encode everything except
/// unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encoding set for query values (SAS fields, signatures).
const QUERY_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Azure authentication method.
#[derive(Clone, PartialEq)]
pub enum AzureAuth {
    /// Shared Key authentication using the storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureAuth::SharedKey { .. } => f.write_str("SharedKey(..)"),
            AzureAuth::SasToken { .. } => f.write_str("SasToken(..)"),
        }
    }
}

/// Fields of an Azure storage connection string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub blob_endpoint: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub protocol: Option<String>,
    pub shared_access_signature: Option<String>,
}

/// Parse `Key=Value;Key=Value` pairs.  Values may themselves contain `=`
/// (base64 account keys do).
pub fn parse_connection_string(raw: &str) -> anyhow::Result<ConnectionString> {
    let mut parsed = ConnectionString::default();
    for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Malformed connection string: segment without '='"))?;
        let value = value.trim().to_string();
        match key.trim() {
            "AccountName" => parsed.account_name = Some(value),
            "AccountKey" => parsed.account_key = Some(value),
            "BlobEndpoint" => parsed.blob_endpoint = Some(value),
            "EndpointSuffix" => parsed.endpoint_suffix = Some(value),
            "DefaultEndpointsProtocol" => parsed.protocol = Some(value),
            "SharedAccessSignature" => parsed.shared_access_signature = Some(value),
            "UseDevelopmentStorage" if value.eq_ignore_ascii_case("true") => {
                parsed.account_name = Some(DEV_STORAGE_ACCOUNT.to_string());
                parsed.account_key = Some(DEV_STORAGE_KEY.to_string());
                parsed.blob_endpoint = Some(DEV_STORAGE_ENDPOINT.to_string());
            }
            _ => {}
        }
    }
    Ok(parsed)
}

/// Resolved connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AzureSettings {
    pub account: String,
    pub container: String,
    /// Blob service endpoint, without trailing slash.
    pub endpoint: String,
    pub auth: AzureAuth,
}

impl AzureSettings {
    /// Resolve settings from config, falling back to `lookup` for the
    /// `AZURE_STORAGE_KEY` / `AZURE_STORAGE_SAS_TOKEN` variables.
    pub fn resolve<F>(config: &AzureStorageConfig, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let conn = if config.connection_string.is_empty() {
            ConnectionString::default()
        } else {
            parse_connection_string(&config.connection_string)?
        };

        let container = config.container.trim().to_string();
        if container.is_empty() {
            anyhow::bail!("AZURE_STORAGE_CONTAINER is not set");
        }

        let account = non_empty(&config.account)
            .or(conn.account_name.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No Azure storage account configured. Set storage.azure.account \
                     or AZURE_STORAGE_CONNECTION_STRING."
                )
            })?;

        let endpoint = non_empty(&config.endpoint)
            .or(conn.blob_endpoint.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}://{}.blob.{}",
                    conn.protocol.as_deref().unwrap_or("https"),
                    account,
                    conn.endpoint_suffix.as_deref().unwrap_or("core.windows.net")
                )
            })
            .trim_end_matches('/')
            .to_string();

        let key = non_empty(&config.account_key)
            .or(conn.account_key.clone())
            .or_else(|| lookup("AZURE_STORAGE_KEY"));
        let sas = non_empty(&config.sas_token)
            .or(conn.shared_access_signature.clone())
            .or_else(|| lookup("AZURE_STORAGE_SAS_TOKEN"));

        let auth = if let Some(key) = key {
            let key_bytes = BASE64_STANDARD
                .decode(key.trim())
                .map_err(|e| anyhow::anyhow!("Invalid Azure account key (not valid base64): {}", e))?;
            AzureAuth::SharedKey { key_bytes }
        } else if let Some(sas) = sas {
            let token = sas.strip_prefix('?').unwrap_or(&sas).to_string();
            AzureAuth::SasToken { token }
        } else {
            anyhow::bail!(
                "No Azure credentials found. Set AZURE_STORAGE_CONNECTION_STRING, \
                 AZURE_STORAGE_KEY, or AZURE_STORAGE_SAS_TOKEN."
            );
        };

        Ok(Self {
            account,
            container,
            endpoint,
            auth,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Body of a write request.
struct RequestBody {
    data: Bytes,
    content_type: String,
    content_md5: Option<String>,
}

/// Store backed by one Azure Blob Storage container.
pub struct AzureBlobStore {
    /// HTTP client for Azure Blob REST API calls.
    client: reqwest::Client,
    /// Retry policy for idempotent calls.
    retry: RetryPolicy,
    account: String,
    container: String,
    /// Blob service endpoint, without trailing slash.
    endpoint: String,
    /// Path part of the endpoint: empty for the public cloud,
    /// `/devstoreaccount1` for the emulator.
    endpoint_path: String,
    auth: AzureAuth,
}

impl AzureBlobStore {
    /// Create a store from already-resolved settings.
    pub fn new(settings: AzureSettings, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint_path = reqwest::Url::parse(&settings.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid blob endpoint '{}': {}", settings.endpoint, e))?
            .path()
            .trim_end_matches('/')
            .to_string();

        info!(
            "Azure blob store initialized: account={} container={} endpoint={}",
            settings.account, settings.container, settings.endpoint
        );

        Ok(Self {
            client,
            retry,
            account: settings.account,
            container: settings.container,
            endpoint: settings.endpoint,
            endpoint_path,
            auth: settings.auth,
        })
    }

    /// Resolve settings from config plus the process environment.
    pub fn from_config(config: &AzureStorageConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let settings = AzureSettings::resolve(config, |key| std::env::var(key).ok())?;
        Self::new(settings, retry)
    }

    /// Generate a block ID for a staged block.
    fn block_id(upload_id: &str, index: usize) -> String {
        let raw = format!("{}:{:06}", upload_id, index);
        BASE64_STANDARD.encode(raw.as_bytes())
    }

    /// Base64 MD5 digest, as sent in `Content-MD5`.
    fn content_md5(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize())
    }

    fn container_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.container)
    }

    /// Build the full URL for a blob.
    fn blob_url(&self, blob_name: &str) -> String {
        let encoded_blob =
            percent_encoding::utf8_percent_encode(blob_name, &AZURE_BLOB_ENCODE_SET).to_string();
        format!("{}/{}/{}", self.endpoint, self.container, encoded_blob)
    }

    /// Canonicalized resource for Shared Key signing.
    ///
    /// Uses the un-encoded blob name, prefixed with the account and the
    /// endpoint path (so emulator URLs carry the account twice).
    fn canonical_resource(&self, blob_name: Option<&str>) -> String {
        match blob_name {
            Some(name) => format!(
                "/{}{}/{}/{}",
                self.account, self.endpoint_path, self.container, name
            ),
            None => format!("/{}{}/{}", self.account, self.endpoint_path, self.container),
        }
    }

    /// Build the Shared Key string-to-sign.
    ///
    /// ```text
    /// VERB\n
    /// Content-Encoding\n
    /// Content-Language\n
    /// Content-Length\n
    /// Content-MD5\n
    /// Content-Type\n
    /// Date\n
    /// If-Modified-Since\n
    /// If-Match\n
    /// If-None-Match\n
    /// If-Unmodified-Since\n
    /// Range\n
    /// CanonicalizedHeaders\n
    /// CanonicalizedResource
    /// ```
    fn string_to_sign(
        method: &str,
        content_length: Option<usize>,
        content_md5: &str,
        content_type: &str,
        canonicalized_headers: &str,
        canonicalized_resource: &str,
    ) -> String {
        // Content-Length: empty for 0 or if not provided.
        let content_length_str = match content_length {
            Some(0) | None => String::new(),
            Some(len) => len.to_string(),
        };
        format!(
            "{}\n\n\n{}\n{}\n{}\n\n\n\n\n\n\n{}\n{}",
            method,
            content_length_str,
            content_md5,
            content_type,
            canonicalized_headers,
            canonicalized_resource
        )
    }

    /// Sign a request using Azure Shared Key authentication and return
    /// the Authorization header value.
    #[allow(clippy::too_many_arguments)]
    fn sign_request(
        &self,
        method: &str,
        blob_name: Option<&str>,
        content_length: Option<usize>,
        content_md5: &str,
        content_type: &str,
        date: &str,
        ms_headers: &[(&str, String)],
        query_params: &[(&str, String)],
    ) -> anyhow::Result<String> {
        let key_bytes = match &self.auth {
            AzureAuth::SharedKey { key_bytes } => key_bytes,
            AzureAuth::SasToken { .. } => {
                return Err(anyhow::anyhow!("Cannot sign with SAS token auth"));
            }
        };

        // Canonicalized headers: every x-ms-* header, lowercased and sorted.
        let mut headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), date.to_string()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        for (k, v) in ms_headers {
            let lk = k.to_lowercase();
            if lk.starts_with("x-ms-") && lk != "x-ms-date" && lk != "x-ms-version" {
                headers.push((lk, v.trim().to_string()));
            }
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        // Canonicalized resource plus query parameters sorted by key.
        let mut canonicalized_resource = self.canonical_resource(blob_name);
        let mut sorted_params: Vec<(String, &str)> = query_params
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in &sorted_params {
            canonicalized_resource.push_str(&format!("\n{}:{}", k, v));
        }

        let string_to_sign = Self::string_to_sign(
            method,
            content_length,
            content_md5,
            content_type,
            &canonicalized_headers,
            &canonicalized_resource,
        );

        let signature = hmac_sha256_base64(key_bytes, &string_to_sign)?;
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(std::time::SystemTime::now())
    }

    /// Append SAS token to a URL if using SAS auth.
    fn maybe_append_sas(&self, url: &str) -> String {
        match &self.auth {
            AzureAuth::SasToken { token } => {
                if url.contains('?') {
                    format!("{}&{}", url, token)
                } else {
                    format!("{}?{}", url, token)
                }
            }
            AzureAuth::SharedKey { .. } => url.to_string(),
        }
    }

    /// Check if a status code indicates "not found" (404).
    fn is_not_found(status: StatusCode) -> bool {
        status == StatusCode::NOT_FOUND
    }

    /// Map an Azure HTTP error to an anyhow error with context.
    fn map_azure_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        anyhow::anyhow!("Azure {}: HTTP {} - {}", context, status, body)
    }

    /// Build a signed request.  Query values and `x-ms-*` headers are passed
    /// raw; `reqwest` encodes the query while the signature uses raw values.
    fn build_request(
        &self,
        method: Method,
        blob_name: Option<&str>,
        query: &[(&str, String)],
        ms_headers: &[(&str, String)],
        body: Option<&RequestBody>,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let url = match blob_name {
            Some(name) => self.blob_url(name),
            None => self.container_url(),
        };
        let date = Self::rfc1123_date();

        let mut req = self
            .client
            .request(method.clone(), self.maybe_append_sas(&url))
            .query(query)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION);
        for (k, v) in ms_headers {
            req = req.header(*k, v.as_str());
        }

        let (content_length, content_md5, content_type) = match body {
            Some(body) => {
                req = req
                    .header(CONTENT_TYPE, body.content_type.as_str())
                    .body(body.data.clone());
                if let Some(md5) = &body.content_md5 {
                    req = req.header("Content-MD5", md5.as_str());
                }
                (
                    Some(body.data.len()),
                    body.content_md5.as_deref().unwrap_or(""),
                    body.content_type.as_str(),
                )
            }
            None => {
                if method == Method::PUT {
                    req = req.body(Bytes::new());
                }
                (None, "", "")
            }
        };

        if let AzureAuth::SharedKey { .. } = &self.auth {
            let auth_header = self.sign_request(
                method.as_str(),
                blob_name,
                content_length,
                content_md5,
                content_type,
                &date,
                ms_headers,
                query,
            )?;
            req = req.header(AUTHORIZATION, auth_header);
        }

        Ok(req)
    }

    /// Abort Copy Blob: `PUT ?comp=copy&copyid=...` with `x-ms-copy-action: abort`.
    fn abort_copy_request(
        &self,
        blob_name: &str,
        copy_id: &str,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let query = [
            ("comp", "copy".to_string()),
            ("copyid", copy_id.to_string()),
        ];
        let ms_headers = [("x-ms-copy-action", "abort".to_string())];
        self.build_request(Method::PUT, Some(blob_name), &query, &ms_headers, None)
    }

    // -- Azure Blob REST API operations ----------------------------------------

    /// Fetch one page of List Blobs.
    async fn azure_list_page(
        &self,
        prefix: &str,
        include: &str,
        marker: Option<&str>,
    ) -> anyhow::Result<ListPage> {
        let mut query = vec![
            ("restype", "container".to_string()),
            ("comp", "list".to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix", prefix.to_string()));
        }
        if !include.is_empty() {
            query.push(("include", include.to_string()));
        }
        if let Some(marker) = marker {
            query.push(("marker", marker.to_string()));
        }

        let resp = send_with_retry(&self.retry, "Azure list_blobs", || {
            self.build_request(Method::GET, None, &query, &[], None)
        })
        .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_azure_error("list_blobs", status, &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Azure list_blobs body read failed: {}", e))?;
        parse_list_page(&body)
    }

    /// Get Blob Properties; `None` on 404.
    async fn azure_properties(&self, blob_name: &str) -> anyhow::Result<Option<BlobProperties>> {
        let resp = send_with_retry(&self.retry, "Azure get_properties", || {
            self.build_request(Method::HEAD, Some(blob_name), &[], &[], None)
        })
        .await?;

        let status = resp.status();
        if Self::is_not_found(status) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::map_azure_error("get_properties", status, ""));
        }
        Ok(Some(properties_from_headers(resp.headers())))
    }

    /// Stage a block on a blob (Put Block).
    async fn azure_put_block(
        &self,
        blob_name: &str,
        block_id: &str,
        data: Bytes,
    ) -> anyhow::Result<()> {
        let query = [
            ("comp", "block".to_string()),
            ("blockid", block_id.to_string()),
        ];
        let body = RequestBody {
            content_md5: Some(Self::content_md5(&data)),
            data,
            content_type: "application/octet-stream".to_string(),
        };

        let resp = send_with_retry(&self.retry, "Azure put_block", || {
            self.build_request(Method::PUT, Some(blob_name), &query, &[], Some(&body))
        })
        .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_azure_error("put_block", status, &body));
        }
        Ok(())
    }

    /// Commit a block list (Put Block List) to finalize a block blob.
    async fn azure_put_block_list(
        &self,
        blob_name: &str,
        block_ids: &[String],
        content_type: Option<&str>,
    ) -> anyhow::Result<()> {
        let query = [("comp", "blocklist".to_string())];
        let mut ms_headers = Vec::new();
        if let Some(ct) = content_type {
            ms_headers.push(("x-ms-blob-content-type", ct.to_string()));
        }
        let body = RequestBody {
            data: Bytes::from(block_list_xml(block_ids)),
            content_type: "application/xml".to_string(),
            content_md5: None,
        };

        let resp = send_with_retry(&self.retry, "Azure put_block_list", || {
            self.build_request(Method::PUT, Some(blob_name), &query, &ms_headers, Some(&body))
        })
        .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_azure_error("put_block_list", status, &body));
        }
        Ok(())
    }

    /// Build a Service SAS granting read access to one blob.
    fn blob_read_sas(
        &self,
        blob_name: &str,
        key_bytes: &[u8],
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let start = starts_on.to_rfc3339_opts(SecondsFormat::Secs, true);
        let expiry = expires_on.to_rfc3339_opts(SecondsFormat::Secs, true);
        let protocol = if self.endpoint.starts_with("https://") {
            "https"
        } else {
            "https,http"
        };
        let canonical = format!("/blob/{}/{}/{}", self.account, self.container, blob_name);
        let string_to_sign = sas_string_to_sign("r", &start, &expiry, &canonical, protocol, "b");
        let signature = hmac_sha256_base64(key_bytes, &string_to_sign)?;

        let encode = |v: &str| percent_encoding::utf8_percent_encode(v, &QUERY_ENCODE_SET).to_string();
        Ok(format!(
            "sv={}&st={}&se={}&sr=b&sp=r&spr={}&sig={}",
            AZURE_API_VERSION,
            encode(&start),
            encode(&expiry),
            encode(protocol),
            encode(&signature)
        ))
    }
}

/// HMAC-SHA256 of `message` under `key`, base64-encoded.
fn hmac_sha256_base64(key: &[u8], message: &str) -> anyhow::Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| anyhow::anyhow!("HMAC key error: {}", e))?;
    mac.update(message.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Service SAS string-to-sign for blob resources (versions 2020-12-06+).
///
/// Fields in order: permissions, start, expiry, canonicalized resource,
/// identifier, IP, protocol, version, resource, snapshot time, encryption
/// scope, then the five response-header overrides.
fn sas_string_to_sign(
    permissions: &str,
    start: &str,
    expiry: &str,
    canonical_resource: &str,
    protocol: &str,
    resource: &str,
) -> String {
    [
        permissions,
        start,
        expiry,
        canonical_resource,
        "",
        "",
        protocol,
        AZURE_API_VERSION,
        resource,
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n")
}

/// XML body for Put Block List.
fn block_list_xml(block_ids: &[String]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<BlockList>\n");
    for id in block_ids {
        xml.push_str(&format!("  <Latest>{}</Latest>\n", id));
    }
    xml.push_str("</BlockList>");
    xml
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value).ok().map(DateTime::<Utc>::from)
}

/// Read blob properties from Get Blob / Get Blob Properties headers.
fn properties_from_headers(headers: &HeaderMap) -> BlobProperties {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-ms-meta-")?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    BlobProperties {
        content_type: text("content-type").map(str::to_string),
        size: text("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        created_on: text("x-ms-creation-time").and_then(parse_http_date),
        last_modified: text("last-modified").and_then(parse_http_date),
        metadata,
        copy_status: text("x-ms-copy-status").and_then(CopyStatus::parse),
    }
}

/// Copy id and status from a Copy Blob response.  A missing status means
/// the copy was accepted and has not finished.
fn copy_started_from_headers(headers: &HeaderMap) -> CopyStarted {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    CopyStarted {
        copy_id: text("x-ms-copy-id").map(str::to_string),
        status: text("x-ms-copy-status")
            .and_then(CopyStatus::parse)
            .unwrap_or(CopyStatus::Pending),
    }
}

// -- List Blobs XML -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobsXml,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobsXml {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobXml>,
}

#[derive(Debug, Deserialize)]
struct BlobXml {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "VersionId", default)]
    version_id: Option<String>,
    #[serde(rename = "IsCurrentVersion", default)]
    is_current_version: Option<bool>,
    #[serde(rename = "Properties", default)]
    properties: BlobPropertiesXml,
}

#[derive(Debug, Default, Deserialize)]
struct BlobPropertiesXml {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
}

/// One page of List Blobs results.
#[derive(Debug)]
struct ListPage {
    items: Vec<BlobItem>,
    next_marker: Option<String>,
}

fn parse_list_page(xml: &str) -> anyhow::Result<ListPage> {
    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| anyhow::anyhow!("Azure list_blobs: malformed XML: {}", e))?;

    let items = results
        .blobs
        .blob
        .into_iter()
        .map(|blob| {
            let version_id = blob.version_id.filter(|v| !v.is_empty());
            BlobItem {
                name: blob.name,
                size: blob.properties.content_length.unwrap_or(0),
                last_modified: blob
                    .properties
                    .last_modified
                    .as_deref()
                    .and_then(parse_http_date),
                content_type: blob.properties.content_type.filter(|c| !c.is_empty()),
                // Without versioning every listed blob is current.
                is_current_version: blob
                    .is_current_version
                    .unwrap_or(version_id.is_none()),
                version_id,
            }
        })
        .collect();

    Ok(ListPage {
        items,
        next_marker: results.next_marker.filter(|m| !m.is_empty()),
    })
}

impl BlobStore for AzureBlobStore {
    fn list_flat(
        &self,
        prefix: &str,
        options: ListOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BlobItem>>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut include = Vec::new();
            if options.include_metadata {
                include.push("metadata");
            }
            if options.include_versions {
                include.push("versions");
            }
            let include = include.join(",");

            let mut items = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let page = self
                    .azure_list_page(&prefix, &include, marker.as_deref())
                    .await?;
                items.extend(page.items);
                match page.next_marker {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }

            debug!(
                "Azure list_flat: container={} prefix='{}' items={}",
                self.container,
                prefix,
                items.len()
            );
            Ok(items)
        })
    }

    fn properties(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobProperties>>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            debug!("Azure properties: container={} blob={}", self.container, path);
            self.azure_properties(&path).await
        })
    }

    fn download(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobDownload>>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            debug!("Azure download: container={} blob={}", self.container, path);

            let resp = send_with_retry(&self.retry, "Azure download", || {
                self.build_request(Method::GET, Some(&path), &[], &[], None)
            })
            .await?;

            let status = resp.status();
            if Self::is_not_found(status) {
                return Ok(None);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_azure_error("download", status, &body));
            }

            let props = properties_from_headers(resp.headers());
            let body = resp
                .bytes_stream()
                .map_err(|e| anyhow::anyhow!("Azure download body read failed: {}", e))
                .boxed();

            Ok(Some(BlobDownload {
                content_type: props.content_type,
                content_length: Some(props.size),
                body,
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
            let upload_id = uuid::Uuid::new_v4().simple().to_string();
            debug!(
                "Azure upload_stream: container={} blob={} upload_id={} chunk_size={} concurrency={}",
                self.container, path, upload_id, options.chunk_size, options.concurrency
            );

            let blob_name = path.as_str();
            let upload = upload_id.as_str();
            let block_ids: Vec<String> = rechunk(body, options.chunk_size)
                .enumerate()
                .map(move |(index, chunk)| async move {
                    let chunk = chunk?;
                    let block_id = Self::block_id(upload, index);
                    self.azure_put_block(blob_name, &block_id, chunk).await?;
                    Ok::<String, anyhow::Error>(block_id)
                })
                .buffered(options.concurrency.max(1))
                .try_collect()
                .await?;

            self.azure_put_block_list(&path, &block_ids, content_type.as_deref())
                .await?;

            debug!(
                "Azure upload_stream committed: blob={} blocks={}",
                path,
                block_ids.len()
            );
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
            debug!(
                "Azure put: container={} blob={} bytes={}",
                self.container,
                path,
                data.len()
            );

            let ms_headers = [("x-ms-blob-type", "BlockBlob".to_string())];
            let body = RequestBody {
                content_md5: Some(Self::content_md5(&data)),
                data,
                content_type: content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            };

            let resp = send_with_retry(&self.retry, "Azure put_blob", || {
                self.build_request(Method::PUT, Some(&path), &[], &ms_headers, Some(&body))
            })
            .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_azure_error("put_blob", status, &body));
            }
            Ok(())
        })
    }

    fn delete_if_exists(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            debug!("Azure delete: container={} blob={}", self.container, path);

            let ms_headers = [("x-ms-delete-snapshots", "include".to_string())];
            let resp = send_with_retry(&self.retry, "Azure delete", || {
                self.build_request(Method::DELETE, Some(&path), &[], &ms_headers, None)
            })
            .await?;

            let status = resp.status();
            if Self::is_not_found(status) {
                return Ok(false);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_azure_error("delete", status, &body));
            }
            Ok(true)
        })
    }

    fn read_url(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let url = self.blob_url(&path);
            match &self.auth {
                AzureAuth::SharedKey { key_bytes } => {
                    let now = Utc::now();
                    let ttl = chrono::Duration::from_std(ttl)
                        .map_err(|e| anyhow::anyhow!("Invalid SAS lifetime: {}", e))?;
                    let sas = self.blob_read_sas(
                        &path,
                        key_bytes,
                        now - chrono::Duration::seconds(SAS_CLOCK_SKEW_SECS),
                        now + ttl,
                    )?;
                    Ok(format!("{}?{}", url, sas))
                }
                // Only the configured token is available to hand out.
                AzureAuth::SasToken { .. } => Ok(self.maybe_append_sas(&url)),
            }
        })
    }

    fn start_copy_from_url(
        &self,
        dst_path: &str,
        source_url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CopyStarted>> + Send + '_>> {
        let dst_path = dst_path.to_string();
        let source_url = source_url.to_string();
        Box::pin(async move {
            debug!("Azure copy: container={} dst={}", self.container, dst_path);

            let ms_headers = [("x-ms-copy-source", source_url)];
            let resp = send_with_retry(&self.retry, "Azure copy", || {
                self.build_request(Method::PUT, Some(&dst_path), &[], &ms_headers, None)
            })
            .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_azure_error("copy", status, &body));
            }

            Ok(copy_started_from_headers(resp.headers()))
        })
    }

    fn copy_status(
        &self,
        dst_path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CopyStatus>>> + Send + '_>> {
        let dst_path = dst_path.to_string();
        Box::pin(async move {
            let props = self.azure_properties(&dst_path).await?;
            // A blob with no copy record holds settled content.
            Ok(props.map(|p| p.copy_status.unwrap_or(CopyStatus::Success)))
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
            debug!(
                "Azure abort copy: container={} dst={} copy_id={}",
                self.container, dst_path, copy_id
            );

            let resp = send_with_retry(&self.retry, "Azure abort_copy", || {
                self.abort_copy_request(&dst_path, &copy_id)
            })
            .await?;

            let status = resp.status();
            // 409 NoPendingCopyOperation: the copy already finished.
            if status == StatusCode::CONFLICT {
                debug!("Azure copy {} on {} was no longer pending", copy_id, dst_path);
                return Ok(());
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_azure_error("abort_copy", status, &body));
            }
            info!("Azure copy {} on {} aborted", copy_id, dst_path);
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "a2V5LWJ5dGVzLWZvci10ZXN0aW5nLW9ubHk=";

    fn settings(endpoint: &str) -> AzureSettings {
        AzureSettings {
            account: "acct".to_string(),
            container: "files".to_string(),
            endpoint: endpoint.to_string(),
            auth: AzureAuth::SharedKey {
                key_bytes: BASE64_STANDARD.decode(TEST_KEY).unwrap(),
            },
        }
    }

    fn store() -> AzureBlobStore {
        AzureBlobStore::new(
            settings("https://acct.blob.core.windows.net"),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_connection_string() {
        let parsed = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=abc==;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(parsed.account_name.as_deref(), Some("acct"));
        assert_eq!(parsed.account_key.as_deref(), Some("abc=="));
        assert_eq!(parsed.protocol.as_deref(), Some("https"));
        assert_eq!(parsed.endpoint_suffix.as_deref(), Some("core.windows.net"));
        assert!(parsed.blob_endpoint.is_none());
    }

    #[test]
    fn test_parse_connection_string_dev_storage() {
        let parsed = parse_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(parsed.account_name.as_deref(), Some(DEV_STORAGE_ACCOUNT));
        assert_eq!(parsed.blob_endpoint.as_deref(), Some(DEV_STORAGE_ENDPOINT));
    }

    #[test]
    fn test_parse_connection_string_malformed() {
        assert!(parse_connection_string("AccountName=a;garbage").is_err());
    }

    #[test]
    fn test_resolve_from_connection_string() {
        let config = AzureStorageConfig {
            connection_string: format!("AccountName=acct;AccountKey={}", TEST_KEY),
            container: "files".to_string(),
            ..AzureStorageConfig::default()
        };
        let resolved = AzureSettings::resolve(&config, no_env).unwrap();
        assert_eq!(resolved.account, "acct");
        assert_eq!(resolved.endpoint, "https://acct.blob.core.windows.net");
        assert!(matches!(resolved.auth, AzureAuth::SharedKey { .. }));
    }

    #[test]
    fn test_resolve_requires_container() {
        let config = AzureStorageConfig {
            connection_string: format!("AccountName=acct;AccountKey={}", TEST_KEY),
            ..AzureStorageConfig::default()
        };
        let err = AzureSettings::resolve(&config, no_env).unwrap_err();
        assert_eq!(err.to_string(), "AZURE_STORAGE_CONTAINER is not set");
    }

    #[test]
    fn test_resolve_sas_token_from_env() {
        let config = AzureStorageConfig {
            account: "acct".to_string(),
            container: "files".to_string(),
            ..AzureStorageConfig::default()
        };
        let resolved = AzureSettings::resolve(&config, |key| {
            (key == "AZURE_STORAGE_SAS_TOKEN").then(|| "?sv=2023-11-03&sig=xyz".to_string())
        })
        .unwrap();
        assert_eq!(
            resolved.auth,
            AzureAuth::SasToken {
                token: "sv=2023-11-03&sig=xyz".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_without_credentials_fails() {
        let config = AzureStorageConfig {
            account: "acct".to_string(),
            container: "files".to_string(),
            ..AzureStorageConfig::default()
        };
        assert!(AzureSettings::resolve(&config, no_env).is_err());
    }

    #[test]
    fn test_block_id_uniform_length() {
        let a = AzureBlobStore::block_id("0123456789abcdef0123456789abcdef", 0);
        let b = AzureBlobStore::block_id("0123456789abcdef0123456789abcdef", 123_456);
        assert_eq!(a.len(), b.len());
        let decoded = String::from_utf8(BASE64_STANDARD.decode(&a).unwrap()).unwrap();
        assert_eq!(decoded, "0123456789abcdef0123456789abcdef:000000");
    }

    #[test]
    fn test_content_md5() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(AzureBlobStore::content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_blob_url_encoding() {
        let store = store();
        assert_eq!(
            store.blob_url("docs/key with spaces.txt"),
            "https://acct.blob.core.windows.net/files/docs/key%20with%20spaces.txt"
        );
    }

    #[test]
    fn test_canonical_resource_public_cloud() {
        let store = store();
        assert_eq!(store.canonical_resource(Some("a/b.txt")), "/acct/files/a/b.txt");
        assert_eq!(store.canonical_resource(None), "/acct/files");
    }

    #[test]
    fn test_canonical_resource_emulator_path() {
        let store = AzureBlobStore::new(
            settings("http://127.0.0.1:10000/devstoreaccount1"),
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            store.canonical_resource(Some("x.txt")),
            "/acct/devstoreaccount1/files/x.txt"
        );
    }

    #[test]
    fn test_string_to_sign_layout() {
        let sts = AzureBlobStore::string_to_sign(
            "PUT",
            Some(11),
            "md5==",
            "text/plain",
            "x-ms-date:d\nx-ms-version:v",
            "/acct/files/a.txt",
        );
        let lines: Vec<&str> = sts.split('\n').collect();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[3], "11");
        assert_eq!(lines[4], "md5==");
        assert_eq!(lines[5], "text/plain");
        assert_eq!(lines[14], "/acct/files/a.txt");
    }

    #[test]
    fn test_string_to_sign_zero_length_is_empty() {
        let sts = AzureBlobStore::string_to_sign("PUT", Some(0), "", "", "h", "/r");
        assert_eq!(sts.split('\n').nth(3), Some(""));
    }

    #[test]
    fn test_sign_request_is_deterministic() {
        let store = store();
        let query = [("comp", "list".to_string()), ("restype", "container".to_string())];
        let a = store
            .sign_request("GET", None, None, "", "", "Mon, 01 Jan 2024 00:00:00 GMT", &[], &query)
            .unwrap();
        let b = store
            .sign_request("GET", None, None, "", "", "Mon, 01 Jan 2024 00:00:00 GMT", &[], &query)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("SharedKey acct:"));
    }

    #[test]
    fn test_sas_string_to_sign_has_sixteen_fields() {
        let sts = sas_string_to_sign("r", "s", "e", "/blob/a/c/b", "https", "b");
        let fields: Vec<&str> = sts.split('\n').collect();
        assert_eq!(fields.len(), 16);
        assert_eq!(fields[0], "r");
        assert_eq!(fields[3], "/blob/a/c/b");
        assert_eq!(fields[6], "https");
        assert_eq!(fields[7], AZURE_API_VERSION);
        assert_eq!(fields[8], "b");
    }

    #[tokio::test]
    async fn test_read_url_carries_read_only_sas() {
        let store = store();
        let url = store
            .read_url("docs/a b.txt", Duration::from_secs(15 * 60))
            .await
            .unwrap();
        assert!(url.starts_with("https://acct.blob.core.windows.net/files/docs/a%20b.txt?"));
        assert!(url.contains("sp=r"));
        assert!(url.contains("sr=b"));
        assert!(url.contains("spr=https&"));
        assert!(url.contains(&format!("sv={}", AZURE_API_VERSION)));
        assert!(url.contains("&sig="));
    }

    #[tokio::test]
    async fn test_read_url_with_sas_token_auth() {
        let mut s = settings("https://acct.blob.core.windows.net");
        s.auth = AzureAuth::SasToken {
            token: "sv=1&sig=abc".to_string(),
        };
        let store = AzureBlobStore::new(s, RetryPolicy::default()).unwrap();
        let url = store.read_url("a.txt", Duration::from_secs(60)).await.unwrap();
        assert_eq!(url, "https://acct.blob.core.windows.net/files/a.txt?sv=1&sig=abc");
    }

    #[test]
    fn test_block_list_xml_format() {
        let xml = block_list_xml(&["YQ==".to_string(), "Yg==".to_string()]);
        assert!(xml.starts_with("<?xml"));
        assert_eq!(xml.matches("<Latest>").count(), 2);
        assert!(xml.ends_with("</BlockList>"));
    }

    #[test]
    fn test_parse_list_page() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="files">
  <Prefix>a/</Prefix>
  <Blobs>
    <Blob>
      <Name>a/x.txt</Name>
      <VersionId>2024-01-02T03:04:05.0000000Z</VersionId>
      <IsCurrentVersion>true</IsCurrentVersion>
      <Properties>
        <Creation-Time>Tue, 02 Jan 2024 03:04:05 GMT</Creation-Time>
        <Last-Modified>Tue, 02 Jan 2024 03:04:05 GMT</Last-Modified>
        <Etag>0x8DC0B3</Etag>
        <Content-Length>42</Content-Length>
        <Content-Type>text/plain</Content-Type>
        <BlobType>BlockBlob</BlobType>
      </Properties>
      <OrMetadata />
    </Blob>
    <Blob>
      <Name>a/c/y.txt</Name>
      <Properties>
        <Last-Modified>Wed, 03 Jan 2024 00:00:00 GMT</Last-Modified>
        <Content-Length>0</Content-Length>
        <Content-Type />
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker>page-2</NextMarker>
</EnumerationResults>"#;

        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.next_marker.as_deref(), Some("page-2"));
        assert_eq!(page.items.len(), 2);

        let first = &page.items[0];
        assert_eq!(first.name, "a/x.txt");
        assert_eq!(first.size, 42);
        assert_eq!(first.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            first.version_id.as_deref(),
            Some("2024-01-02T03:04:05.0000000Z")
        );
        assert!(first.is_current_version);
        assert_eq!(
            first.last_modified.unwrap().to_rfc3339(),
            "2024-01-02T03:04:05+00:00"
        );

        let second = &page.items[1];
        assert_eq!(second.name, "a/c/y.txt");
        assert!(second.version_id.is_none());
        assert!(second.is_current_version);
        assert!(second.content_type.is_none());
    }

    #[test]
    fn test_parse_list_page_last_page() {
        let xml = r#"<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>"#;
        let page = parse_list_page(xml).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_properties_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "image/png".parse().unwrap());
        headers.insert("content-length", "1024".parse().unwrap());
        headers.insert("last-modified", "Tue, 02 Jan 2024 03:04:05 GMT".parse().unwrap());
        headers.insert("x-ms-creation-time", "Mon, 01 Jan 2024 00:00:00 GMT".parse().unwrap());
        headers.insert("x-ms-meta-owner", "ops".parse().unwrap());
        headers.insert("x-ms-copy-status", "pending".parse().unwrap());

        let props = properties_from_headers(&headers);
        assert_eq!(props.content_type.as_deref(), Some("image/png"));
        assert_eq!(props.size, 1024);
        assert!(props.created_on.unwrap() < props.last_modified.unwrap());
        assert_eq!(props.metadata.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(props.copy_status, Some(CopyStatus::Pending));
    }

    #[test]
    fn test_copy_started_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-copy-id", "c0ffee".parse().unwrap());
        let started = copy_started_from_headers(&headers);
        assert_eq!(started.copy_id.as_deref(), Some("c0ffee"));
        assert_eq!(started.status, CopyStatus::Pending);

        headers.insert("x-ms-copy-status", "success".parse().unwrap());
        assert_eq!(copy_started_from_headers(&headers).status, CopyStatus::Success);
        assert_eq!(copy_started_from_headers(&HeaderMap::new()).copy_id, None);
    }

    #[test]
    fn test_abort_copy_request() {
        let req = store()
            .abort_copy_request("dir/a.txt", "c0ffee")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.method(), Method::PUT);
        assert_eq!(req.url().path(), "/files/dir/a.txt");
        assert_eq!(req.url().query(), Some("comp=copy&copyid=c0ffee"));
        assert_eq!(req.headers()["x-ms-copy-action"], "abort");
        assert!(req.headers()[AUTHORIZATION]
            .to_str()
            .unwrap()
            .starts_with("SharedKey acct:"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(AzureBlobStore::is_not_found(StatusCode::NOT_FOUND));
        assert!(!AzureBlobStore::is_not_found(StatusCode::OK));
        assert!(!AzureBlobStore::is_not_found(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_sas_token_appended() {
        let mut s = settings("https://acct.blob.core.windows.net");
        s.auth = AzureAuth::SasToken {
            token: "sv=1".to_string(),
        };
        let store = AzureBlobStore::new(s, RetryPolicy::default()).unwrap();
        assert_eq!(store.maybe_append_sas("https://x/y"), "https://x/y?sv=1");
        assert_eq!(store.maybe_append_sas("https://x/y?a=b"), "https://x/y?a=b&sv=1");
    }
}

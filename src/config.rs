//! Configuration loading and types for blob-portal.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct, then a handful of environment variables are layered
//! on top (connection string, container, SAS lifetime, API tokens).  Each
//! subsection governs a different part of the system: networking, the API
//! token gate, the storage backend, transfer tuning, the outbound HTTP
//! retry policy, and logging.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bearer-token gate settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Blob storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload / copy tuning.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry policy for outbound HTTP calls.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Answer CORS preflights permissively (browser UI served elsewhere).
    #[serde(default)]
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            cors: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Bearer-token gate.
///
/// Sign-in itself happens at the identity provider in front of the portal;
/// this gate only checks that API callers present one of the known tokens.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Whether requests must carry `Authorization: Bearer <token>`.
    #[serde(default)]
    pub enabled: bool,

    /// Accepted tokens.
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Blob storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `azure` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Azure Blob Storage configuration.
    #[serde(default)]
    pub azure: AzureStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            azure: AzureStorageConfig::default(),
        }
    }
}

/// Azure Blob Storage configuration.
///
/// Either `connection_string` or `account` plus a credential
/// (`account_key` / `sas_token`) must resolve.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureStorageConfig {
    /// Full connection string (`AccountName=...;AccountKey=...`).
    #[serde(default)]
    pub connection_string: String,
    /// Container all blob keys live in.
    #[serde(default)]
    pub container: String,
    /// Storage account name (when no connection string is given).
    #[serde(default)]
    pub account: String,
    /// Base64 account key for Shared Key auth.
    #[serde(default)]
    pub account_key: String,
    /// Account or container SAS token (alternative to a key).
    #[serde(default)]
    pub sas_token: String,
    /// Explicit blob endpoint, e.g. an Azurite URL.
    #[serde(default)]
    pub endpoint: String,
    /// Lifetime of signed read URLs in minutes.
    #[serde(default = "default_sas_minutes")]
    pub sas_minutes: u64,
}

impl Default for AzureStorageConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            container: String::new(),
            account: String::new(),
            account_key: String::new(),
            sas_token: String::new(),
            endpoint: String::new(),
            sas_minutes: default_sas_minutes(),
        }
    }
}

/// Upload and copy tuning.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferConfig {
    /// Block size for streamed uploads and stream copies, in bytes.
    #[serde(default = "default_chunk_size")]
    #[garde(range(min = 1, max = 4_000 * 1024 * 1024))]
    pub chunk_size: usize,

    /// Blocks in flight for direct uploads.
    #[serde(default = "default_upload_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub upload_concurrency: usize,

    /// Blocks in flight for the stream-copy fallback.
    #[serde(default = "default_copy_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub copy_concurrency: usize,

    /// Delay between service-side copy status polls, in milliseconds.
    #[serde(default = "default_copy_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub copy_poll_interval_ms: u64,

    /// Give up on a pending service-side copy after this many seconds.
    #[serde(default = "default_copy_timeout_secs")]
    #[garde(range(min = 1))]
    pub copy_timeout_secs: u64,

    /// Whether renames may replace an existing destination.
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub overwrite_on_move: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            upload_concurrency: default_upload_concurrency(),
            copy_concurrency: default_copy_concurrency(),
            copy_poll_interval_ms: default_copy_poll_interval_ms(),
            copy_timeout_secs: default_copy_timeout_secs(),
            overwrite_on_move: true,
        }
    }
}

/// Outbound HTTP retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_http_retries")]
    pub retries: u32,

    /// Linear backoff base in milliseconds (base, 2x base, 3x base, ...).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Response statuses worth retrying.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            retries: default_http_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            retry_on: default_retry_on(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_storage_backend() -> String {
    "azure".to_string()
}

fn default_sas_minutes() -> u64 {
    15
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_upload_concurrency() -> usize {
    8
}

fn default_copy_concurrency() -> usize {
    5
}

fn default_copy_poll_interval_ms() -> u64 {
    500
}

fn default_copy_timeout_secs() -> u64 {
    300
}

fn default_http_timeout_ms() -> u64 {
    20_000
}

fn default_http_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    400
}

fn default_retry_on() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Environment overrides -----------------------------------------------------

/// Split a comma- or whitespace-separated list, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Layer environment variables over the file values.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(conn) = lookup("AZURE_STORAGE_CONNECTION_STRING") {
            self.storage.azure.connection_string = conn;
        }
        if let Some(container) = lookup("AZURE_STORAGE_CONTAINER") {
            self.storage.azure.container = container;
        }
        if let Some(minutes) = lookup("AZURE_BLOB_SAS_MINUTES") {
            self.storage.azure.sas_minutes = minutes.trim().parse().map_err(|e| {
                anyhow::anyhow!("Invalid AZURE_BLOB_SAS_MINUTES '{}': {}", minutes, e)
            })?;
        }
        if let Some(tokens) = lookup("BLOB_PORTAL_API_TOKENS") {
            let tokens = split_list(&tokens);
            if !tokens.is_empty() {
                self.auth.enabled = true;
                self.auth.tokens = tokens;
            }
        }
        Ok(())
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.transfer
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid transfer settings: {}", e))?;
        if self.auth.enabled && self.auth.tokens.is_empty() {
            anyhow::bail!("auth.enabled is set but auth.tokens is empty");
        }
        match self.storage.backend.as_str() {
            "azure" | "memory" => Ok(()),
            other => Err(anyhow::anyhow!(
                "Unknown storage.backend '{}' (expected 'azure' or 'memory')",
                other
            )),
        }
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`, apply the
/// process environment and validate the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Configuration when no file is given: defaults plus the environment.
pub fn config_from_env() -> anyhow::Result<Config> {
    let mut config = Config::default();
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "azure");
        assert_eq!(config.storage.azure.sas_minutes, 15);
        assert_eq!(config.transfer.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.transfer.upload_concurrency, 8);
        assert_eq!(config.transfer.copy_concurrency, 5);
        assert!(config.transfer.overwrite_on_move);
        assert_eq!(config.http.retries, 2);
        assert_eq!(config.http.backoff_base_ms, 400);
        assert_eq!(config.http.retry_on, vec![408, 429, 500, 502, 503, 504]);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9000\nstorage:\n  backend: memory\ntransfer:\n  chunk_size: 1024\nlogging:\n  format: json\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.transfer.copy_concurrency, 5);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("AZURE_STORAGE_CONNECTION_STRING", "AccountName=a;AccountKey=a2V5"),
                ("AZURE_STORAGE_CONTAINER", "files"),
                ("AZURE_BLOB_SAS_MINUTES", "30"),
                ("BLOB_PORTAL_API_TOKENS", "one, two three"),
            ]))
            .unwrap();

        assert_eq!(
            config.storage.azure.connection_string,
            "AccountName=a;AccountKey=a2V5"
        );
        assert_eq!(config.storage.azure.container, "files");
        assert_eq!(config.storage.azure.sas_minutes, 30);
        assert!(config.auth.enabled);
        assert_eq!(config.auth.tokens, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_invalid_sas_minutes_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(env(&[("AZURE_BLOB_SAS_MINUTES", "soon")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = Config::default();
        config.storage.backend = "ftp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_enabled_auth_without_tokens() {
        let mut config = Config::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a,b  c,,"), vec!["a", "b", "c"]);
        assert!(split_list(" , ").is_empty());
    }
}

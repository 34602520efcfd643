//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:7445").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public base URL used when building preauth links. When unset, the
    /// request's Host header is used.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Chunk size used by virtual indexes when the request does not override it.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
    /// Largest accepted upload in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:7445".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_upload_size() -> u64 {
    8 * 1024 * 1024 * 1024 // 8 GiB
}

fn default_metrics_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Whether preauth links are built from the client-supplied Host header,
    /// which lets a caller choose the host the link points at.
    pub fn links_from_host_header(&self) -> bool {
        self.api_url.is_none()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_url: None,
            default_chunk_size: default_chunk_size(),
            max_upload_size: default_max_upload_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration for payloads and node snapshots.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Primary document store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds to wait for the connection pool before reporting the
        /// store as unavailable.
        #[serde(default = "default_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

/// Authentication policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Let anonymous requesters read nodes whose read set is empty.
    #[serde(default = "default_anonymous_read")]
    pub anonymous_read: bool,
    /// Let anonymous requesters create nodes. Such nodes get a fresh,
    /// unclaimed owner ID and are only reachable through the public rule.
    #[serde(default)]
    pub anonymous_write: bool,
}

fn default_anonymous_read() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_read: default_anonymous_read(),
            anonymous_write: false,
        }
    }
}

/// Preauth token policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreauthConfig {
    /// Token lifetime in seconds (default: 24 hours).
    #[serde(default = "default_preauth_ttl_secs")]
    pub ttl_secs: u64,
    /// Consume tokens on first redemption instead of allowing reuse until expiry.
    #[serde(default)]
    pub single_use: bool,
    /// Interval between sweeps of expired tokens in seconds (0 disables).
    #[serde(default = "default_preauth_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_preauth_ttl_secs() -> u64 {
    86400
}

fn default_preauth_purge_interval_secs() -> u64 {
    3600
}

impl Default for PreauthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_preauth_ttl_secs(),
            single_use: false,
            purge_interval_secs: default_preauth_purge_interval_secs(),
        }
    }
}

impl PreauthConfig {
    /// Get the token lifetime as a Duration.
    pub fn ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Interval of the expired-token sweep, `None` when disabled.
    pub fn purge_interval(&self) -> Option<std::time::Duration> {
        (self.purge_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.purge_interval_secs))
    }
}

/// External region filter configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Path to the samtools binary used for `index=bai` region queries.
    #[serde(default = "default_samtools_path")]
    pub samtools_path: PathBuf,
}

fn default_samtools_path() -> PathBuf {
    PathBuf::from("samtools")
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            samtools_path: default_samtools_path(),
        }
    }
}

/// Admin account configuration.
///
/// The admin user is created on first start. Its API token is configured by
/// hash only; if the hash changes between restarts, the previous admin token
/// is revoked and a new one is registered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Username of the admin account.
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The matching secret is `test-admin-token`.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            username: default_admin_username(),
            token_description: Some("Test admin token".to_string()),
        }
    }
}

/// Full application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub preauth: PreauthConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    /// Admin account configuration (required).
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            auth: AuthConfig::default(),
            preauth: PreauthConfig::default(),
            filter: FilterConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }
}

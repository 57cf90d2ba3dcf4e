//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Attachment platform configuration.
    pub platform: PlatformConfig,
    /// Credential pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Attachment platform configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call HTTP timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Timeout for attachment uploads, which can carry large bodies.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    /// Fallback TTL for cached messages when the URL expiry cannot be parsed.
    #[serde(default = "default_cache_ttl")]
    pub fallback_cache_ttl_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            http_timeout_secs: default_http_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            fallback_cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_upload_timeout() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    86_400 // 24 hours
}

/// Credential pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Concurrent-use slots per credential.
    #[serde(default = "default_max_slots")]
    pub max_slots_per_credential: u32,
    /// Maximum total wait for a credential before giving up, in milliseconds.
    #[serde(default = "default_acquire_wait")]
    pub acquire_wait_ms: u64,
    /// Sleep interval between acquisition attempts, in milliseconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_slots_per_credential: default_max_slots(),
            acquire_wait_ms: default_acquire_wait(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

fn default_max_slots() -> u32 {
    3
}

fn default_acquire_wait() -> u64 {
    5_000
}

fn default_retry_interval() -> u64 {
    500
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("SHARDBOX").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_slots_per_credential, 3);
        assert_eq!(pool.acquire_wait_ms, 5_000);
        assert_eq!(pool.retry_interval_ms, 500);
    }
}

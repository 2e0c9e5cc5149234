//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! HTTP cache headers, pagination budgets, job retention, member caching and
//! default paths. `AppConfig` is the root configuration struct containing all settings.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Progress and result payloads change on every poll and must never be cached
pub const CACHE_CONTROL_NO_STORE: &str = "no-store";

/// Guild/channel listings - short cache, the bot's membership rarely changes
pub const HTTP_CACHE_LISTING_MAX_AGE: u32 = 30;

pub const CACHE_CONTROL_LISTING: &str =
    formatcp!("private, max-age={}", HTTP_CACHE_LISTING_MAX_AGE);

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// =============================================================================
// Pagination Constants
// =============================================================================

/// Messages requested per page; the chat platform caps pages at 100
pub const MESSAGE_PAGE_SIZE: usize = 100;

/// Default per-channel message budget when the request does not specify one
pub const DEFAULT_MESSAGE_LIMIT: usize = 10_000;

/// Emit a progress log line every this many fetched messages in a channel
pub const FETCH_LOG_INTERVAL: usize = 1_000;

/// Number of entries shown in the end-of-run summary log
pub const SUMMARY_TOP_N: usize = 10;

// =============================================================================
// Job Constants
// =============================================================================

/// Capacity of a job's log ring buffer
pub const JOB_LOG_CAPACITY: usize = 100;

/// Seconds a terminal job is retained before eviction (5 minutes)
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 300;

/// Polling interval advertised to clients
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Maximum number of jobs processing at the same time across all guilds
pub const DEFAULT_MAX_RUNNING_JOBS: usize = 4;

/// Concurrent member lookups during enrichment
pub const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 4;

/// Seconds to wait for in-flight connections during graceful shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// =============================================================================
// Chat Platform Constants
// =============================================================================

/// Discord REST API base URL (v10)
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord CDN base URL for avatars
pub const DISCORD_CDN_BASE: &str = "https://cdn.discordapp.com";

/// Avatar size requested from the CDN
pub const AVATAR_SIZE: u32 = 64;

/// Environment variable that overrides the configured bot token
pub const DISCORD_TOKEN_ENV: &str = "DISCORD_TOKEN";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Member Cache Constants
// =============================================================================

/// TTL for resolved member profiles (1 hour)
pub const DEFAULT_MEMBER_TTL_SECS: u64 = 3600;

/// TTL for negative cache (member not found)
pub const DEFAULT_MEMBER_NEGATIVE_TTL_SECS: u64 = 60;

pub const DEFAULT_MAX_CACHED_MEMBERS: u64 = 50_000;

/// Divisor for negative cache size (relative to member cache)
pub const NEGATIVE_CACHE_SIZE_DIVISOR: u64 = 4;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "rollcall=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    pub http: HttpServerConfig,
    /// Chat platform connection
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Aggregation defaults
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Job tracking and admission
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. `DISCORD_TOKEN` in the environment takes precedence.
    pub token: Option<String>,
    #[serde(default = "DiscordConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "DiscordConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: Self::default_api_base(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

impl DiscordConfig {
    fn default_api_base() -> String {
        DEFAULT_DISCORD_API_BASE.to_string()
    }

    fn default_request_timeout() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_SECS
    }

    /// Check if a non-empty token is configured
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// Per-channel message budget used when a request omits `limit`
    #[serde(default = "RankingConfig::default_limit")]
    pub default_limit: usize,
    #[serde(default = "RankingConfig::default_page_size")]
    pub page_size: usize,
    #[serde(default = "RankingConfig::default_log_interval")]
    pub log_interval: usize,
    #[serde(default = "RankingConfig::default_enrichment_concurrency")]
    pub enrichment_concurrency: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_limit: Self::default_limit(),
            page_size: Self::default_page_size(),
            log_interval: Self::default_log_interval(),
            enrichment_concurrency: Self::default_enrichment_concurrency(),
        }
    }
}

impl RankingConfig {
    fn default_limit() -> usize {
        DEFAULT_MESSAGE_LIMIT
    }

    fn default_page_size() -> usize {
        MESSAGE_PAGE_SIZE
    }

    fn default_log_interval() -> usize {
        FETCH_LOG_INTERVAL
    }

    fn default_enrichment_concurrency() -> usize {
        DEFAULT_ENRICHMENT_CONCURRENCY
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Seconds a finished or failed job stays readable (default: 5 minutes)
    #[serde(default = "JobsConfig::default_retention")]
    pub retention_seconds: u64,
    #[serde(default = "JobsConfig::default_max_running")]
    pub max_running: usize,
    #[serde(default = "JobsConfig::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_seconds: Self::default_retention(),
            max_running: Self::default_max_running(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl JobsConfig {
    fn default_retention() -> u64 {
        DEFAULT_JOB_RETENTION_SECS
    }

    fn default_max_running() -> usize {
        DEFAULT_MAX_RUNNING_JOBS
    }

    fn default_poll_interval() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for resolved members in seconds (default: 1 hour)
    #[serde(default = "CacheConfig::default_member_ttl")]
    pub member_ttl_seconds: u64,
    /// TTL for members that could not be resolved (default: 1 minute)
    #[serde(default = "CacheConfig::default_negative_ttl")]
    pub member_negative_ttl_seconds: u64,
    #[serde(default = "CacheConfig::default_max_members")]
    pub max_members: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            member_ttl_seconds: Self::default_member_ttl(),
            member_negative_ttl_seconds: Self::default_negative_ttl(),
            max_members: Self::default_max_members(),
        }
    }
}

impl CacheConfig {
    fn default_member_ttl() -> u64 {
        DEFAULT_MEMBER_TTL_SECS
    }
    fn default_negative_ttl() -> u64 {
        DEFAULT_MEMBER_NEGATIVE_TTL_SECS
    }
    fn default_max_members() -> u64 {
        DEFAULT_MAX_CACHED_MEMBERS
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;

        if let Ok(token) = std::env::var(DISCORD_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.discord.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration text without consulting the environment
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ranking.page_size == 0 || self.ranking.page_size > MESSAGE_PAGE_SIZE {
            return Err(ConfigError::Validation(format!(
                "ranking.page_size must be between 1 and {}",
                MESSAGE_PAGE_SIZE
            )));
        }
        if self.ranking.default_limit == 0 {
            return Err(ConfigError::Validation(
                "ranking.default_limit must be at least 1".to_string(),
            ));
        }
        if self.ranking.enrichment_concurrency == 0 {
            return Err(ConfigError::Validation(
                "ranking.enrichment_concurrency must be at least 1".to_string(),
            ));
        }
        if self.jobs.max_running == 0 {
            return Err(ConfigError::Validation(
                "jobs.max_running must be at least 1".to_string(),
            ));
        }
        match self.logging.format.to_ascii_lowercase().as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "logging.format must be \"text\" or \"json\", got \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[http]
host = "127.0.0.1"
port = 3000
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.ranking.default_limit, DEFAULT_MESSAGE_LIMIT);
        assert_eq!(config.ranking.page_size, MESSAGE_PAGE_SIZE);
        assert_eq!(config.jobs.retention_seconds, 300);
        assert_eq!(config.jobs.poll_interval_ms, 500);
        assert_eq!(config.discord.api_base, DEFAULT_DISCORD_API_BASE);
        assert!(!config.discord.has_token());
        assert!(!config.logging.is_json());
        assert!(config.http.allowed_origins.is_empty());
    }

    #[test]
    fn test_page_size_above_platform_cap_is_rejected() {
        let text = format!("{}\n[ranking]\npage_size = 500\n", MINIMAL);
        let err = AppConfig::parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let text = format!("{}\n[logging]\nformat = \"yaml\"\n", MINIMAL);
        assert!(matches!(
            AppConfig::parse(&text),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_token_is_not_a_token() {
        let text = format!("{}\n[discord]\ntoken = \"  \"\n", MINIMAL);
        let config = AppConfig::parse(&text).unwrap();
        assert!(!config.discord.has_token());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, format!("{}\n[jobs]\nmax_running = 2\n", MINIMAL)).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.jobs.max_running, 2);
        assert_eq!(config.http.port, 3000);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = AppConfig::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.http.port, 3000);
        assert_eq!(config.jobs.max_running, DEFAULT_MAX_RUNNING_JOBS);
        assert_eq!(config.cache.max_members, DEFAULT_MAX_CACHED_MEMBERS);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = AppConfig::load("/nonexistent/rollcall.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

/*!
 * Configuration types for Roster
 *
 * A single TOML file with one section per component. Every field has a
 * default, so an empty file is a valid configuration. Each section converts
 * into the config type of the crate it drives.
 */

use crate::error::{Result, RosterError};
use roster_bulk::BulkConfig;
use roster_connect::{ConnectionConfig, HttpEngineConfig};
use roster_core_cache::CacheConfig;
use roster_core_resilience::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub bulk: BulkSection,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub audit: AuditSection,
}

/// `[connection]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// Base URL of the command gateway
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Principal to connect as
    #[serde(default)]
    pub principal: Option<String>,

    /// Permission scopes requested on connect
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Command run right after a session opens
    #[serde(default = "default_identity_check")]
    pub identity_check_command: String,

    #[serde(default = "default_token_refresh_skew")]
    pub token_refresh_skew_secs: u64,
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// `[circuit_breaker]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    #[serde(default = "default_open_duration")]
    pub open_duration_secs: u64,

    #[serde(default = "default_sampling_window")]
    pub sampling_window_secs: u64,
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_volatile_ttl")]
    pub volatile_ttl_secs: u64,
}

/// `[bulk]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,
}

/// `[logging]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// JSON output on stdout; file output is always JSON
    #[serde(default)]
    pub json: bool,
}

/// `[audit]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON Lines journal
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = RosterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(RosterError::Config(format!("Invalid log level: {}", s))),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://localhost:8443".to_string()
}

fn default_token_env() -> String {
    "ROSTER_ACCESS_TOKEN".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_identity_check() -> String {
    "Get-ConnectedIdentity".to_string()
}

fn default_token_refresh_skew() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_failure_threshold() -> usize {
    5
}

fn default_open_duration() -> u64 {
    60
}

fn default_sampling_window() -> u64 {
    120
}

fn default_ttl() -> u64 {
    30 * 60
}

fn default_volatile_ttl() -> u64 {
    5 * 60
}

fn default_chunk_size() -> usize {
    50
}

fn default_max_concurrent_chunks() -> usize {
    3
}

fn default_inter_chunk_delay_ms() -> u64 {
    1_000
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("roster-audit.jsonl")
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            principal: None,
            scopes: Vec::new(),
            token_env: default_token_env(),
            command_timeout_secs: default_command_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            identity_check_command: default_identity_check(),
            token_refresh_skew_secs: default_token_refresh_skew(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration(),
            sampling_window_secs: default_sampling_window(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl(),
            volatile_ttl_secs: default_volatile_ttl(),
        }
    }
}

impl Default for BulkSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
        }
    }
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            journal_path: default_journal_path(),
        }
    }
}

impl From<&ConnectionSection> for ConnectionConfig {
    fn from(section: &ConnectionSection) -> Self {
        Self {
            scopes: section.scopes.clone(),
            command_timeout: Duration::from_secs(section.command_timeout_secs),
            connect_timeout: Duration::from_secs(section.connect_timeout_secs),
            identity_check_command: section.identity_check_command.clone(),
            token_refresh_skew: Duration::from_secs(section.token_refresh_skew_secs),
        }
    }
}

impl From<&ConnectionSection> for HttpEngineConfig {
    fn from(section: &ConnectionSection) -> Self {
        let mut config = HttpEngineConfig::new(section.endpoint.as_str());
        config.request_timeout = Duration::from_secs(section.command_timeout_secs);
        config
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            jitter: Duration::from_millis(section.jitter_ms),
        }
    }
}

impl From<&CircuitBreakerSection> for CircuitBreakerConfig {
    fn from(section: &CircuitBreakerSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold,
            open_duration: Duration::from_secs(section.open_duration_secs),
            sampling_window: Duration::from_secs(section.sampling_window_secs),
        }
    }
}

impl From<&CacheSection> for CacheConfig {
    fn from(section: &CacheSection) -> Self {
        Self {
            default_ttl: Duration::from_secs(section.default_ttl_secs),
            volatile_ttl: Duration::from_secs(section.volatile_ttl_secs),
        }
    }
}

impl From<&BulkSection> for BulkConfig {
    fn from(section: &BulkSection) -> Self {
        Self {
            chunk_size: section.chunk_size,
            max_concurrent_chunks: section.max_concurrent_chunks,
            inter_chunk_delay: Duration::from_millis(section.inter_chunk_delay_ms),
        }
    }
}

impl RosterConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RosterConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default location: `~/.roster/roster.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| RosterError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".roster").join("roster.toml"))
    }

    /// Check every section against the rules of the component it configures
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.connection.endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(RosterError::Config(format!(
                "connection.endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        if self.connection.command_timeout_secs == 0 || self.connection.connect_timeout_secs == 0 {
            return Err(RosterError::Config(
                "connection timeouts must be greater than zero".into(),
            ));
        }
        if self.connection.token_env.trim().is_empty() {
            return Err(RosterError::Config("connection.token_env must not be empty".into()));
        }
        if self.cache.default_ttl_secs == 0 || self.cache.volatile_ttl_secs == 0 {
            return Err(RosterError::Config("cache TTLs must be greater than zero".into()));
        }

        RetryPolicy::from(&self.retry).validate()?;
        CircuitBreakerConfig::from(&self.circuit_breaker).validate()?;
        BulkConfig::from(&self.bulk).validate()?;
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.connection)
    }

    pub fn engine_config(&self) -> HttpEngineConfig {
        HttpEngineConfig::from(&self.connection)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::from(&self.circuit_breaker)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }

    pub fn bulk_config(&self) -> BulkConfig {
        BulkConfig::from(&self.bulk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_matches_component_defaults() {
        let config = RosterConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.breaker_config(), CircuitBreakerConfig::default());
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.bulk_config(), BulkConfig::default());
        assert_eq!(config.connection_config(), ConnectionConfig::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: RosterConfig = toml::from_str("").unwrap();
        assert_eq!(config, RosterConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[connection]
endpoint = "https://gateway.school.edu"
principal = "admin@school.edu"
scopes = ["Group.ReadWrite.All"]

[bulk]
chunk_size = 20

[logging]
level = "debug"
json = true

[audit]
journal_path = "/var/log/roster/audit.jsonl"
"#;

        let config: RosterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.principal.as_deref(), Some("admin@school.edu"));
        assert_eq!(config.connection.command_timeout_secs, 120);
        assert_eq!(config.bulk.chunk_size, 20);
        assert_eq!(config.bulk.max_concurrent_chunks, 3);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.json);
        assert!(config.audit.enabled);
        assert_eq!(
            config.audit.journal_path,
            PathBuf::from("/var/log/roster/audit.jsonl")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RosterConfig::default();
        config.connection.endpoint = "gateway.school.edu".into();
        assert!(config.validate().is_err());

        let mut config = RosterConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RosterConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = RosterConfig::default();
        config.bulk.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("roster.toml");

        let mut config = RosterConfig::default();
        config.connection.principal = Some("admin@school.edu".into());
        config.bulk.inter_chunk_delay_ms = 250;
        config.to_file(&path).unwrap();

        let loaded = RosterConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.bulk_config().inter_chunk_delay,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
    }
}

//! Configuration types for Burrow

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Metadata store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Chunk store configuration
    #[serde(default)]
    pub chunk: ChunkConfig,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver ("sqlite" is the supported driver)
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Database host (reserved for server drivers)
    #[serde(default)]
    pub host: String,

    /// Database port (reserved for server drivers)
    #[serde(default)]
    pub port: u16,

    /// Database user (reserved for server drivers)
    #[serde(default)]
    pub user: String,

    /// Database password (reserved for server drivers)
    #[serde(default)]
    pub password: String,

    /// Database name (reserved for server drivers)
    #[serde(default)]
    pub db_name: String,

    /// Database file path for the sqlite driver
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_db_file() -> PathBuf {
    PathBuf::from("storage/burrow.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            db_name: String::new(),
            db_file: default_db_file(),
        }
    }
}

/// Console log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default = "default_console_level")]
    pub level: String,
}

fn default_console_level() -> String {
    "debug".to_string()
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            level: default_console_level(),
        }
    }
}

/// File log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_file_level")]
    pub level: String,

    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

fn default_file_level() -> String {
    "warn".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("storage/logs/burrow.log")
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            enable: false,
            level: default_file_level(),
            path: default_log_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub console: ConsoleLogConfig,

    #[serde(default)]
    pub file: FileLogConfig,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind the HTTP listener
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Prefix under which all routes are mounted
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Access log file (empty = console only)
    #[serde(default)]
    pub access_log_file: String,

    /// Enable the per-IP token-bucket rate limiter
    #[serde(default)]
    pub limit_rate_by_ip_enable: bool,

    /// Refill interval of the limiter in milliseconds
    #[serde(default = "default_limit_interval")]
    pub limit_rate_by_ip_interval: u64,

    /// Burst size of the limiter
    #[serde(default = "default_limit_max_num")]
    pub limit_rate_by_ip_max_num: u32,

    /// Enable CORS handling
    #[serde(default)]
    pub cors_enable: bool,

    #[serde(default)]
    pub cors_allow_all_origins: bool,

    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: Vec<String>,

    #[serde(default = "default_cors_methods")]
    pub cors_allow_methods: Vec<String>,

    #[serde(default = "default_cors_headers")]
    pub cors_allow_headers: Vec<String>,

    #[serde(default)]
    pub cors_expose_headers: Vec<String>,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// CORS preflight max age in seconds
    #[serde(default = "default_cors_max_age")]
    pub cors_max_age: u64,
}

fn default_bind() -> String {
    "0.0.0.0:9600".to_string()
}

fn default_api_prefix() -> String {
    "/api/burrow".to_string()
}

fn default_limit_interval() -> u64 {
    1000
}

fn default_limit_max_num() -> u32 {
    100
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_methods() -> Vec<String> {
    vec!["PUT".to_string(), "DELETE".to_string(), "PATCH".to_string()]
}

fn default_cors_headers() -> Vec<String> {
    vec!["Origin".to_string()]
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
            access_log_file: String::new(),
            limit_rate_by_ip_enable: false,
            limit_rate_by_ip_interval: default_limit_interval(),
            limit_rate_by_ip_max_num: default_limit_max_num(),
            cors_enable: false,
            cors_allow_all_origins: false,
            cors_allow_origins: default_cors_origins(),
            cors_allow_methods: default_cors_methods(),
            cors_allow_headers: default_cors_headers(),
            cors_expose_headers: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age: default_cors_max_age(),
        }
    }
}

/// Chunk store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Root directory of the hash-sharded chunk tree
    #[serde(default = "default_chunk_root")]
    pub root_path: PathBuf,
}

fn default_chunk_root() -> PathBuf {
    PathBuf::from("storage/chunks")
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            root_path: default_chunk_root(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.driver != "sqlite" {
            return Err(Error::Config(format!(
                "unsupported database driver: {}",
                self.database.driver
            )));
        }
        Ok(())
    }

    /// Locate the configuration file.
    ///
    /// Search order: explicit path, `BURROW_CONFIG`, `./burrow.toml`,
    /// `$HOME/burrow.toml`, `/etc/burrow/burrow.toml`.
    pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("BURROW_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let mut candidates = vec![PathBuf::from("burrow.toml")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join("burrow.toml"));
        }
        candidates.push(PathBuf::from("/etc/burrow/burrow.toml"));

        candidates.into_iter().find(|p| p.is_file())
    }
}

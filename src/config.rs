use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::policy::RolePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub quota: RolePolicy,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root under which uploads, pages and covers are written.
    pub root_path: PathBuf,
    /// Scratch space for archive extraction. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_path
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// Extensions accepted at intake (lowercase, no dot).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Pages whose larger side exceeds this are downscaled.
    #[serde(default = "default_max_page_dimension_px")]
    pub max_page_dimension_px: u32,
    #[serde(default = "default_page_jpeg_quality")]
    pub page_jpeg_quality: u8,
    #[serde(default = "default_cover_width_px")]
    pub cover_width_px: u32,
    #[serde(default = "default_cover_height_px")]
    pub cover_height_px: u32,
    #[serde(default = "default_cover_jpeg_quality")]
    pub cover_jpeg_quality: u8,
    /// Archives with more image entries than this are refused.
    #[serde(default = "default_max_archive_entries")]
    pub max_archive_entries: usize,
    /// Decompressed size cap for a single archive entry.
    #[serde(default = "default_max_entry_size_mb")]
    pub max_entry_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Length of one rate-limit window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    /// Entries kept per activity list.
    #[serde(default = "default_activity_max_entries")]
    pub max_entries: usize,
    /// Entries older than this are pruned.
    #[serde(default = "default_activity_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_page_dimension_px: default_max_page_dimension_px(),
            page_jpeg_quality: default_page_jpeg_quality(),
            cover_width_px: default_cover_width_px(),
            cover_height_px: default_cover_height_px(),
            cover_jpeg_quality: default_cover_jpeg_quality(),
            max_archive_entries: default_max_archive_entries(),
            max_entry_size_mb: default_max_entry_size_mb(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            max_entries: default_activity_max_entries(),
            max_age_secs: default_activity_max_age_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Largest per-file size any role may upload; used to size the HTTP body limit.
    pub fn max_upload_bytes(&self) -> u64 {
        self.quota.max_file_bytes_any_role()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_url() -> String {
    "sqlite://manga-ingest.db?mode=rwc".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["zip", "cbz", "rar", "cbr"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_page_dimension_px() -> u32 {
    2000
}

fn default_page_jpeg_quality() -> u8 {
    85
}

fn default_cover_width_px() -> u32 {
    300
}

fn default_cover_height_px() -> u32 {
    450
}

fn default_cover_jpeg_quality() -> u8 {
    92
}

fn default_max_archive_entries() -> usize {
    2000
}

fn default_max_entry_size_mb() -> u64 {
    64
}

fn default_window_secs() -> u64 {
    60
}

fn default_activity_max_entries() -> usize {
    100
}

fn default_activity_max_age_secs() -> u64 {
    3600
}

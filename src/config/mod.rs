//! Configuration module for witt-pipeline
//!
//! This module handles the runtime configuration of the pipeline core:
//! - Scheduler worker count
//! - Result cache memory budget and failure retry policy
//! - Preview row count, undo depth, fingerprint algorithm
//! - Script sandbox limits
//!
//! # Config Location
//!
//! The configuration file is looked up in this order:
//! 1. An explicit path (e.g. `--config` on the command line)
//! 2. The `WITT_PIPELINE_CONFIG` environment variable
//! 3. `pipeline.toml` in the platform data directory:
//!    - **Linux**: `~/.local/share/witt/pipeline.toml`
//!    - **macOS**: `~/Library/Application Support/witt/pipeline.toml`
//!    - **Windows**: `%APPDATA%\witt\pipeline.toml`
//! 4. Built-in defaults
//!
//! Every field is optional; missing fields take their default.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! workers = 4
//!
//! [cache]
//! memory_budget_bytes = 268435456
//! retry_failed = false
//!
//! [preview]
//! rows = 50
//!
//! [fingerprint]
//! algorithm = "sha256"
//! ```

use crate::error::{Result, WittError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "witt";

/// Config filename inside the app data directory
pub const CONFIG_FILE: &str = "pipeline.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV_VAR: &str = "WITT_PIPELINE_CONFIG";

/// Default result cache budget (512 MiB)
pub const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// Default number of preview rows
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

/// Default undo depth
pub const DEFAULT_HISTORY_DEPTH: usize = 200;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| WittError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            WittError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Resolve which config file to read, if any.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Pipeline Config ====================

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub preview: PreviewConfig,
    pub history: HistoryConfig,
    pub fingerprint: FingerprintConfig,
    pub scripting: ScriptLimits,
}

impl PipelineConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            WittError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| WittError::Config(format!("Failed to parse config {:?}: {}", path, e)))
    }

    /// Load following the lookup order: explicit path, environment variable,
    /// app data directory, defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match config_path(explicit) {
            Some(path) => {
                tracing::debug!("Loading pipeline config from {:?}", path);
                Self::load_from(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Load config, returning defaults on any error
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        Self::load(explicit).unwrap_or_else(|e| {
            tracing::warn!("Failed to load pipeline config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to `path` as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WittError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| WittError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| WittError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }

    /// Save to the default location in the app data directory
    pub fn save_default(&self) -> Result<PathBuf> {
        let path = ensure_app_data_dir()?.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }
}

// ==================== Scheduler Config ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; 0 uses the number of logical CPUs
    pub workers: usize,
}

impl SchedulerConfig {
    /// Effective worker count, at least one.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

// ==================== Cache Config ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Budget for materialised results, in bytes
    pub memory_budget_bytes: usize,

    /// Recompute failed entries on the next evaluation instead of reusing the
    /// recorded error until the node is edited
    pub retry_failed: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            retry_failed: false,
        }
    }
}

// ==================== Preview / History ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub rows: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of undoable edits
    pub depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

// ==================== Fingerprint Config ====================

/// Hash function used for node fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl std::fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintAlgorithm::Blake3 => write!(f, "blake3"),
            FingerprintAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub algorithm: FingerprintAlgorithm,
}

// ==================== Script Limits ====================

/// Resource limits applied to every custom script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum operations per run (0 = unlimited)
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 50_000_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 1_000_000,
            max_array_size: 10_000_000,
            max_map_size: 10_000,
        }
    }
}

// ==================== Utilities ====================

/// Helper to format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

// ==================== Tests ====================

//! Runtime configuration.
//!
//! Every field has a default so hosts only pass what they want to override,
//! e.g. `{"api": {"baseUrl": "https://intel.example"}, "sync": {"debounceMs": 800}}`.

use serde::Deserialize;

use crate::constants::{
    CACHE_PREFIX, DEFAULT_DEBOUNCE_MS, DEFAULT_LOG_LEVEL, DEFAULT_MAX_LAYOUT_BACKUPS,
    DEFAULT_RECONCILE_INTERVAL_MS, GRID_COLUMNS, PLACEMENT_STEP,
};
use crate::network::config::ApiConfig;
use crate::scheduling::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub grid: GridConfig,
    pub cache: CacheConfig,
    pub log_level: LogLevel,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Quiet period after the last change before a key is written.
    pub debounce_ms: u64,
    /// How often the remote layout version is compared with ours.
    pub reconcile_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GridConfig {
    pub columns: u32,
    /// Stride of next-free-cell placement on both axes.
    pub step: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { columns: GRID_COLUMNS, step: PLACEMENT_STEP }
    }
}

impl GridConfig {
    /// Guard against a zero-width grid or zero stride from a bad config.
    pub fn normalized(self) -> Self {
        Self { columns: self.columns.max(1), step: self.step.max(1) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub prefix: String,
    pub max_layout_backups: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { prefix: CACHE_PREFIX.to_string(), max_layout_backups: DEFAULT_MAX_LAYOUT_BACKUPS }
    }
}

/// Verbosity of the browser console log sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel(DEFAULT_LOG_LEVEL.to_string())
    }
}

impl LogLevel {
    pub fn to_level(&self) -> tracing::Level {
        self.0.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Config schema types (remote store, autosave, local storage).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default store location when nothing is configured.
pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:3001/";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub remote: RemoteConfig,
    pub autosave: AutosaveConfig,
    pub storage: StorageConfig,
}

/// Where the project store lives and how it is polled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// Interval between reachability checks.
    pub health_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_URL.into(),
            request_timeout_ms: 10_000,
            health_interval_ms: 5_000,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Debounced write-back of the working copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    /// Quiet period after the last edit before the write fires.
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 1_000,
        }
    }
}

impl AutosaveConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Local durable storage (last opened project, etc.).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
}

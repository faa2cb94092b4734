use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// `[snapshot]` section
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minutes between periodic snapshots; values below 1 are treated as 1
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Newest files retained after each write
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

impl SnapshotConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_minutes: default_interval_minutes(),
            directory: default_directory(),
            keep_count: default_keep_count(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_directory() -> PathBuf {
    PathBuf::from("/var/lib/dispatch/snapshots")
}

fn default_keep_count() -> usize {
    10
}

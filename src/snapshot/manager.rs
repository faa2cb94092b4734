use crate::agent::AgentRegistry;
use crate::request::RequestStore;
use crate::snapshot::recovery::{list_snapshots, SnapshotFile};
use crate::snapshot::{config::SnapshotConfig, DispatchSnapshot};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};


/// Writes dispatch state to disk on a timer and keeps the newest `keep_count` files
pub struct SnapshotManager {
    requests: Arc<RequestStore>,
    agents: Arc<AgentRegistry>,
    config: SnapshotConfig,
    sequence: AtomicU64,
}

impl SnapshotManager {
    pub fn new(
        requests: Arc<RequestStore>,
        agents: Arc<AgentRegistry>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            requests,
            agents,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    /// Snapshot every `interval_minutes` until the task is aborted.
    ///
    /// Returns immediately when snapshots are disabled. A failed write is
    /// logged and retried on the next tick.
    pub async fn run_snapshot_loop(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Snapshots disabled");
            return Ok(());
        }

        self.ensure_directory()?;
        let period = self.config.period();
        info!(
            every_secs = period.as_secs(),
            directory = %self.config.directory.display(),
            keep = self.config.keep_count,
            "Snapshot loop started"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.create_and_save_snapshot() {
                error!(error = %e, "Snapshot failed");
            }
        }
    }

    /// Capture both stores, write the file, prune old ones. Returns the new path.
    pub fn create_and_save_snapshot(&self) -> Result<PathBuf> {
        self.ensure_directory()?;

        let snapshot = DispatchSnapshot::capture(&self.requests, &self.agents);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self.snapshot_path(sequence);
        snapshot.save_to_file(&path)?;

        let pruned = self.prune()?;
        info!(
            sequence,
            requests = snapshot.request_count(),
            agents = snapshot.agent_count(),
            pruned,
            path = %path.display(),
            "Snapshot written"
        );

        Ok(path)
    }

    fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.config.directory).with_context(|| {
            format!(
                "Failed to create snapshot directory {}",
                self.config.directory.display()
            )
        })
    }

    fn snapshot_path(&self, sequence: u64) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        self.config
            .directory
            .join(SnapshotFile::file_name(&stamp, sequence))
    }

    /// Remove all but the newest `keep_count` snapshots. Returns how many went.
    fn prune(&self) -> Result<usize> {
        let files = list_snapshots(&self.config.directory)?;
        let excess = files.len().saturating_sub(self.config.keep_count);

        let mut removed = 0;
        for file in files.into_iter().take(excess) {
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %file.path.display(), "Pruned snapshot");
                }
                Err(e) => error!(
                    error = %e,
                    path = %file.path.display(),
                    "Failed to prune snapshot"
                ),
            }
        }
        Ok(removed)
    }
}

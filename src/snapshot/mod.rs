use crate::agent::{Agent, AgentRegistry};
use crate::request::{Request, RequestStore};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub mod config;
pub mod manager;
pub mod recovery;

#[cfg(test)]
mod tests;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: &str = "1";

/// Point-in-time copy of every request and agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    /// Snapshot format version (for future schema evolution)
    pub snapshot_version: String,

    /// Timestamp when snapshot was created
    pub created_at: DateTime<Utc>,

    pub requests: Vec<Request>,

    pub agents: Vec<Agent>,

    /// (agent_id, request_id) pairs of completed missions
    #[serde(default)]
    pub completed: Vec<(String, String)>,
}

impl DispatchSnapshot {
    /// Capture the current contents of both stores
    pub fn capture(requests: &RequestStore, agents: &AgentRegistry) -> Self {
        let agent_rows = agents.all();
        let completed = agent_rows
            .iter()
            .flat_map(|agent| {
                agents
                    .completed_missions(&agent.id)
                    .into_iter()
                    .map(move |request_id| (agent.id.clone(), request_id))
            })
            .collect();

        Self {
            snapshot_version: SNAPSHOT_VERSION.to_string(),
            created_at: Utc::now(),
            requests: requests.all(),
            agents: agent_rows,
            completed,
        }
    }

    /// Replace store contents with this snapshot.
    ///
    /// Agents come back offline; presence must be re-announced.
    pub fn restore_into(self, requests: &RequestStore, agents: &AgentRegistry) {
        requests.restore(self.requests);
        agents.restore(self.agents, self.completed);
    }

    /// Write gzip JSON to `path` through a sibling `.tmp` file that is
    /// fsynced and renamed into place, so readers never see a partial file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");

        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self).context("Failed to encode snapshot")?;

        let file = encoder
            .finish()
            .context("Failed to finish snapshot compression")?
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush snapshot")?;
        file.sync_all().context("Failed to sync snapshot to disk")?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))
    }

    /// Read a gzip JSON snapshot. Unknown format versions are rejected.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let snapshot: Self = serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
            .with_context(|| format!("Failed to decode {}", path.display()))?;

        if snapshot.snapshot_version != SNAPSHOT_VERSION {
            bail!(
                "Unsupported snapshot version {} in {}",
                snapshot.snapshot_version,
                path.display()
            );
        }
        Ok(snapshot)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

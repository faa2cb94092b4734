use crate::snapshot::DispatchSnapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".json.gz";

/// A snapshot file on disk, named `snapshot-{stamp}-seq{n}.json.gz`.
///
/// Ordered by stamp, then by sequence, so a restart whose sequence starts over
/// at 1 still sorts after an older run's seq 10.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotFile {
    pub stamp: String,
    pub sequence: u64,
    pub path: PathBuf,
}

impl SnapshotFile {
    pub fn file_name(stamp: &str, sequence: u64) -> String {
        format!("{}{}-seq{}{}", PREFIX, stamp, sequence, SUFFIX)
    }

    /// Parse a directory entry; `None` for anything that isn't a finished snapshot
    pub fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let body = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        let (stamp, sequence) = body.rsplit_once("-seq")?;
        let sequence = sequence.parse().ok()?;

        Some(Self {
            stamp: stamp.to_string(),
            sequence,
            path,
        })
    }
}

/// Snapshot files in `snapshot_dir`, oldest first
pub fn list_snapshots(snapshot_dir: &Path) -> Result<Vec<SnapshotFile>> {
    let entries = fs::read_dir(snapshot_dir)
        .with_context(|| format!("Failed to read snapshot directory {}", snapshot_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.context("Failed to read directory entry")?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(file) = SnapshotFile::parse(path) {
            files.push(file);
        }
    }

    files.sort();
    Ok(files)
}

/// Load the newest snapshot that decodes.
///
/// Unreadable files are skipped with a warning; `None` when the directory is
/// missing, empty, or holds nothing usable.
pub fn load_latest_snapshot(snapshot_dir: &Path) -> Result<Option<DispatchSnapshot>> {
    if !snapshot_dir.exists() {
        info!(directory = %snapshot_dir.display(), "No snapshot directory, nothing to recover");
        return Ok(None);
    }

    let files = list_snapshots(snapshot_dir)?;
    if files.is_empty() {
        info!(directory = %snapshot_dir.display(), "No snapshots to recover from");
        return Ok(None);
    }

    let candidates = files.len();
    for file in files.into_iter().rev() {
        match DispatchSnapshot::load_from_file(&file.path) {
            Ok(snapshot) => {
                info!(
                    path = %file.path.display(),
                    requests = snapshot.request_count(),
                    agents = snapshot.agent_count(),
                    taken_at = %snapshot.created_at,
                    "Recovered dispatch state"
                );
                return Ok(Some(snapshot));
            }
            Err(e) => warn!(
                path = %file.path.display(),
                error = %e,
                "Skipping unreadable snapshot"
            ),
        }
    }

    error!(candidates, "No readable snapshot found");
    Ok(None)
}

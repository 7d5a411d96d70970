//! Durable record of snapshotted releases.
//!
//! The ledger is a small JSON document next to the snapshots. It is rewritten
//! atomically (temp file in the same directory, then rename) so a crash never
//! leaves a half-written ledger behind.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One snapshotted release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    /// Commit the snapshot was taken for
    pub commit: String,
    /// SHA-256 over the snapshotted tree
    pub tree_digest: String,
    /// When the snapshot was recorded
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    releases: Vec<ReleaseEntry>,
}

/// File-backed release ledger
#[derive(Debug, Clone)]
pub struct ReleaseLedger {
    path: PathBuf,
}

impl ReleaseLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries in recording order. A missing ledger is empty.
    pub fn load(&self) -> Result<Vec<ReleaseEntry>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let file: LedgerFile = serde_json::from_slice(&bytes)?;
                Ok(file.releases)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the entry for `commit`.
    pub fn get(&self, commit: &str) -> Result<Option<ReleaseEntry>> {
        Ok(self.load()?.into_iter().find(|e| e.commit == commit))
    }

    /// Record `entry`. Re-recording a commit replaces its entry in place.
    pub fn record(&self, entry: ReleaseEntry) -> Result<()> {
        let mut releases = self.load()?;
        match releases.iter_mut().find(|e| e.commit == entry.commit) {
            Some(existing) => *existing = entry,
            None => releases.push(entry),
        }
        self.write(&LedgerFile { releases })
    }

    fn write(&self, file: &LedgerFile) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, file)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(commit: &str, digest: &str) -> ReleaseEntry {
        ReleaseEntry {
            commit: commit.to_string(),
            tree_digest: digest.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_ledger_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = ReleaseLedger::new(dir.path().join("releases.json"));
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn record_keeps_order_and_replaces_duplicates() {
        let dir = tempdir().unwrap();
        let ledger = ReleaseLedger::new(dir.path().join("releases.json"));

        ledger.record(entry("c1", "d1")).unwrap();
        ledger.record(entry("c2", "d2")).unwrap();
        ledger.record(entry("c1", "d3")).unwrap();

        let releases = ledger.load().unwrap();
        let commits: Vec<_> = releases.iter().map(|e| e.commit.as_str()).collect();
        assert_eq!(commits, vec!["c1", "c2"]);
        assert_eq!(ledger.get("c1").unwrap().unwrap().tree_digest, "d3");
        assert!(ledger.get("c9").unwrap().is_none());
    }

    #[test]
    fn corrupt_ledger_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("releases.json");
        fs::write(&path, b"{not json").unwrap();

        let ledger = ReleaseLedger::new(path);
        assert!(matches!(ledger.load(), Err(crate::EnvError::Ledger(_))));
    }
}

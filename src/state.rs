// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Resumable processing state: JSON checkpoint and append-only done ledger

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::Result;

/// Batch checkpoint persisted as pretty JSON after every batch.
///
/// A crash loses at most the current batch's index advance; the done ledger
/// already covers each processed photo, so re-runs stay idempotent by UUID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub last_index: usize,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub batches_processed: u64,
}

impl Checkpoint {
    /// Load a checkpoint. Missing or corrupt files start a fresh session.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|content| {
            serde_json::from_str::<Self>(&content).map_err(|e| e.to_string())
        }) {
            Ok(checkpoint) => {
                info!(
                    "Resumed from batch {}, index {}",
                    checkpoint.batches_processed, checkpoint.last_index
                );
                checkpoint
            }
            Err(e) => {
                warn!("Could not load state from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Append-only record of processed photo UUIDs, one per line
pub struct DoneLedger {
    path: PathBuf,
    done: HashSet<String>,
}

impl DoneLedger {
    /// Load the ledger, tolerating blank lines
    pub fn load(path: &Path) -> Self {
        let mut done = HashSet::new();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    done = content
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                Err(e) => warn!("Could not load done ledger from {}: {}", path.display(), e),
            }
        }
        Self {
            path: path.to_path_buf(),
            done,
        }
    }

    /// Mark a photo as processed. Appends to the file only on first insert,
    /// so normal operation never writes duplicate lines.
    pub fn mark(&mut self, uuid: &str) -> Result<()> {
        if !self.done.insert(uuid.to_string()) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", uuid)?;
        Ok(())
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.done.contains(uuid)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_missing_is_default() {
        let checkpoint = Checkpoint::load(Path::new("/nonexistent/state.json"));
        assert_eq!(checkpoint.last_index, 0);
        assert!(checkpoint.matches.is_empty());
    }

    #[test]
    fn test_checkpoint_corrupt_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ broken").unwrap();

        let checkpoint = Checkpoint::load(&path);
        assert_eq!(checkpoint.last_index, 0);
        assert_eq!(checkpoint.batches_processed, 0);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        let checkpoint = Checkpoint {
            last_index: 42,
            matches: vec!["u1".into(), "u2".into()],
            errors: 3,
            batches_processed: 2,
        };
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path);
        assert_eq!(loaded.last_index, 42);
        assert_eq!(loaded.matches, vec!["u1", "u2"]);
        assert_eq!(loaded.errors, 3);
        assert_eq!(loaded.batches_processed, 2);
    }

    #[test]
    fn test_ledger_mark_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.txt");

        let mut ledger = DoneLedger::load(&path);
        assert!(ledger.is_empty());

        ledger.mark("uuid-1").unwrap();
        ledger.mark("uuid-1").unwrap();
        ledger.mark("uuid-2").unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("uuid-1"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_ledger_reload_tolerates_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.txt");
        std::fs::write(&path, "uuid-1\n\n  \nuuid-2\n").unwrap();

        let ledger = DoneLedger::load(&path);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("uuid-2"));
    }
}

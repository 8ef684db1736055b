// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! State integrity checks and repairs
//!
//! Verifies that the checkpoint, done ledger, temp exports, library and album
//! agree with each other, and can repair the two recoverable problems:
//! duplicate ledger lines and orphaned temp files.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::library::{album_size, FsLibrary, PhotoLibrary};
use crate::processor::temp_file_pattern;
use crate::state::Checkpoint;
use crate::Result;

#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    pub timestamp: String,
    pub task: String,
    pub checks: ReportChecks,
    pub summary: ReportSummary,
}

#[derive(Debug, Default, Serialize)]
pub struct ReportChecks {
    pub state_file: Value,
    pub done_file: Value,
    pub temp_files: Value,
    pub consistency: Value,
    pub library: Value,
    pub album: Value,
}

#[derive(Debug, Default, Serialize)]
pub struct ReportSummary {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct IntegrityChecker {
    config: AppConfig,
}

impl IntegrityChecker {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run every check and collect the results into one report
    pub fn run_all_checks(&self) -> IntegrityReport {
        let mut summary = ReportSummary::default();

        let (state_file, checkpoint) = self.check_state_file(&mut summary);
        let (done_file, done_count) = self.check_done_file(&mut summary);
        let temp_files = self.check_temp_files(&mut summary);
        let consistency = self.check_consistency(&checkpoint, done_count, &mut summary);
        let (library, total_photos) = self.check_library(&mut summary);
        let album = self.check_album(&checkpoint, &mut summary);

        if let (Some(total), Some(count)) = (total_photos, done_count) {
            if count > total {
                summary.warnings.push(format!(
                    "Done ledger has {} entries but the library holds only {} photos",
                    count, total
                ));
            }
        }

        IntegrityReport {
            timestamp: Utc::now().to_rfc3339(),
            task: self.config.task.name.clone(),
            checks: ReportChecks {
                state_file,
                done_file,
                temp_files,
                consistency,
                library,
                album,
            },
            summary,
        }
    }

    fn check_state_file(&self, summary: &mut ReportSummary) -> (Value, Option<Checkpoint>) {
        let path = self.config.state_path();
        if !path.exists() {
            return (
                json!({"status": "missing", "path": path.display().to_string()}),
                None,
            );
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Checkpoint>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(checkpoint) => {
                let report = json!({
                    "status": "ok",
                    "path": path.display().to_string(),
                    "last_index": checkpoint.last_index,
                    "matches": checkpoint.matches.len(),
                    "errors": checkpoint.errors,
                    "batches_processed": checkpoint.batches_processed,
                });
                (report, Some(checkpoint))
            }
            Err(e) => {
                summary
                    .issues
                    .push(format!("State file is unreadable: {}", e));
                (
                    json!({"status": "corrupt", "path": path.display().to_string(), "error": e}),
                    None,
                )
            }
        }
    }

    fn check_done_file(&self, summary: &mut ReportSummary) -> (Value, Option<usize>) {
        let path = self.config.done_path();
        if !path.exists() {
            return (
                json!({"status": "missing", "path": path.display().to_string()}),
                None,
            );
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                summary
                    .issues
                    .push(format!("Done ledger is unreadable: {}", e));
                return (
                    json!({"status": "unreadable", "error": e.to_string()}),
                    None,
                );
            }
        };

        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        let mut invalid: Vec<String> = Vec::new();

        for line in &lines {
            if !seen.insert(*line) {
                duplicates += 1;
            }
            if !looks_like_uuid(line) && invalid.len() < 5 {
                invalid.push(line.to_string());
            }
        }

        if duplicates > 0 {
            summary.warnings.push(format!(
                "Done ledger contains {} duplicate entries (run with --fix-duplicates)",
                duplicates
            ));
        }
        if !invalid.is_empty() {
            summary.issues.push(format!(
                "Done ledger contains malformed UUIDs, e.g. {:?}",
                invalid
            ));
        }

        let report = json!({
            "status": if invalid.is_empty() { "ok" } else { "invalid_entries" },
            "path": path.display().to_string(),
            "total_lines": lines.len(),
            "unique": seen.len(),
            "duplicates": duplicates,
            "invalid_samples": invalid,
        });
        (report, Some(seen.len()))
    }

    fn check_temp_files(&self, summary: &mut ReportSummary) -> Value {
        let pattern = temp_file_pattern(&self.config.storage.work_dir);
        let mut count = 0usize;
        let mut total_bytes = 0u64;
        let mut samples: Vec<String> = Vec::new();

        if let Ok(paths) = glob::glob(&pattern) {
            for path in paths.flatten() {
                count += 1;
                if let Ok(meta) = std::fs::metadata(&path) {
                    total_bytes += meta.len();
                }
                if samples.len() < 5 {
                    samples.push(path.display().to_string());
                }
            }
        }

        if count > 0 {
            summary.warnings.push(format!(
                "{} orphaned temp files ({:.1} MB) in {} (run with --clean-temp)",
                count,
                total_bytes as f64 / 1_048_576.0,
                self.config.storage.work_dir.display()
            ));
        }

        json!({
            "status": if count == 0 { "clean" } else { "orphans" },
            "count": count,
            "total_mb": total_bytes as f64 / 1_048_576.0,
            "samples": samples,
        })
    }

    /// The done ledger and the checkpoint index should agree. The ledger
    /// runs ahead of the index after a mid-batch interruption; the index
    /// runs ahead when ledger lines were lost.
    fn check_consistency(
        &self,
        checkpoint: &Option<Checkpoint>,
        done_count: Option<usize>,
        summary: &mut ReportSummary,
    ) -> Value {
        let (Some(checkpoint), Some(done_count)) = (checkpoint, done_count) else {
            return json!({"status": "skipped", "reason": "state or ledger unavailable"});
        };

        let status = if done_count < checkpoint.last_index {
            summary.warnings.push(format!(
                "Checkpoint index {} is ahead of the done ledger ({} entries); some photos may be re-processed",
                checkpoint.last_index, done_count
            ));
            "mismatch"
        } else if done_count > checkpoint.last_index {
            summary.warnings.push(format!(
                "Done ledger ({} entries) is ahead of checkpoint index {}; a run was likely interrupted mid-batch",
                done_count, checkpoint.last_index
            ));
            "mismatch"
        } else {
            "ok"
        };

        json!({
            "status": status,
            "last_index": checkpoint.last_index,
            "done_entries": done_count,
        })
    }

    fn check_library(&self, summary: &mut ReportSummary) -> (Value, Option<usize>) {
        match FsLibrary::open(&self.config.library) {
            Ok(library) => {
                let total = library.photos().map(|p| p.len()).unwrap_or(0);
                let done = done_count(&self.config.done_path());
                let progress = if total > 0 {
                    done.min(total) as f64 / total as f64 * 100.0
                } else {
                    100.0
                };
                (
                    json!({
                        "status": "ok",
                        "root": self.config.library.root.display().to_string(),
                        "total_photos": total,
                        "processed": done,
                        "progress_percent": format!("{:.1}", progress),
                    }),
                    Some(total),
                )
            }
            Err(e) => {
                summary
                    .issues
                    .push(format!("Photo library is not accessible: {}", e));
                (
                    json!({"status": "inaccessible", "error": e.to_string()}),
                    None,
                )
            }
        }
    }

    fn check_album(&self, checkpoint: &Option<Checkpoint>, summary: &mut ReportSummary) -> Value {
        let name = &self.config.album.name;
        let Some(count) = album_size(&self.config.library.albums_dir, name) else {
            summary
                .warnings
                .push(format!("Album {} does not exist yet", name));
            return json!({"status": "missing", "name": name});
        };

        let expected = checkpoint.as_ref().map(|c| c.matches.len());
        if let Some(expected) = expected {
            if count < expected {
                summary.warnings.push(format!(
                    "Album {} holds {} photos but the checkpoint records {} matches",
                    name, count, expected
                ));
            }
        }

        json!({
            "status": "ok",
            "name": name,
            "photo_count": count,
            "checkpoint_matches": expected,
        })
    }

    /// Rewrite the done ledger without duplicate lines, preserving first-seen
    /// order. Returns how many lines were removed.
    pub fn fix_duplicates(&self) -> Result<usize> {
        let path = self.config.done_path();
        if !path.exists() {
            return Ok(0);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut seen = HashSet::new();
        let mut unique: Vec<&str> = Vec::new();
        let mut removed = 0usize;

        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if seen.insert(line) {
                unique.push(line);
            } else {
                removed += 1;
            }
        }

        if removed > 0 {
            let mut output = unique.join("\n");
            output.push('\n');
            std::fs::write(&path, output)?;
            info!("Removed {} duplicate entries from {}", removed, path.display());
        }
        Ok(removed)
    }

    /// Delete orphaned temp exports. Returns how many files were removed.
    pub fn clean_temp(&self) -> Result<usize> {
        let pattern = temp_file_pattern(&self.config.storage.work_dir);
        let mut removed = 0usize;

        if let Ok(paths) = glob::glob(&pattern) {
            for path in paths.flatten() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Could not remove {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned temp files", removed);
        }
        Ok(removed)
    }
}

/// Hyphenated-UUID shape: 36 chars with 4 hyphens in the standard positions
fn looks_like_uuid(line: &str) -> bool {
    line.len() == 36
        && line.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

fn done_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<HashSet<_>>()
                .len()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.library = LibraryConfig {
            root: dir.join("photos"),
            albums_dir: dir.join("albums"),
        };
        config.storage.work_dir = dir.join("work");
        config
    }

    fn write_png(path: &PathBuf) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let img = ImageBuffer::from_pixel(8, 8, Rgb::<u8>([10, 20, 30]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_looks_like_uuid() {
        assert!(looks_like_uuid("a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab"));
        assert!(!looks_like_uuid("not-a-uuid"));
        assert!(!looks_like_uuid("a1b2c3d4e5f64a1b9c8d0123456789ab"));
        assert!(!looks_like_uuid("a1b2c3d4-e5f6-4a1b-9c8d-0123456789ag"));
    }

    #[test]
    fn test_clean_run_has_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_png(&config.library.root.join("a.png"));

        let checkpoint = Checkpoint {
            last_index: 1,
            matches: vec![],
            errors: 0,
            batches_processed: 1,
        };
        checkpoint.save(&config.state_path()).unwrap();
        std::fs::write(
            config.done_path(),
            "a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab\n",
        )
        .unwrap();

        let report = IntegrityChecker::new(config).run_all_checks();
        assert!(report.summary.issues.is_empty());
        assert_eq!(report.checks.state_file["status"], "ok");
        assert_eq!(report.checks.done_file["duplicates"], 0);
        assert_eq!(report.checks.consistency["status"], "ok");
    }

    #[test]
    fn test_corrupt_state_is_an_issue() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.storage.work_dir).unwrap();
        std::fs::write(config.state_path(), "{ broken").unwrap();

        let report = IntegrityChecker::new(config).run_all_checks();
        assert_eq!(report.checks.state_file["status"], "corrupt");
        assert!(!report.summary.issues.is_empty());
    }

    #[test]
    fn test_duplicates_warned_and_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.storage.work_dir).unwrap();
        std::fs::write(
            config.done_path(),
            "a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab\n\
             b1b2c3d4-e5f6-4a1b-9c8d-0123456789ab\n\
             a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab\n",
        )
        .unwrap();

        let checker = IntegrityChecker::new(config.clone());
        let report = checker.run_all_checks();
        assert_eq!(report.checks.done_file["duplicates"], 1);
        assert!(report
            .summary
            .warnings
            .iter()
            .any(|w| w.contains("duplicate")));

        let removed = checker.fix_duplicates().unwrap();
        assert_eq!(removed, 1);

        let content = std::fs::read_to_string(config.done_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab");
    }

    #[test]
    fn test_invalid_ledger_entries_are_issues() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.storage.work_dir).unwrap();
        std::fs::write(config.done_path(), "totally-wrong\n").unwrap();

        let report = IntegrityChecker::new(config).run_all_checks();
        assert_eq!(report.checks.done_file["status"], "invalid_entries");
        assert!(report
            .summary
            .issues
            .iter()
            .any(|i| i.contains("malformed")));
    }

    #[test]
    fn test_orphaned_temp_files_detected_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.storage.work_dir).unwrap();
        std::fs::write(config.storage.work_dir.join("temp_abc.jpg"), b"x").unwrap();
        std::fs::write(config.storage.work_dir.join("temp_def.jpg"), b"y").unwrap();
        std::fs::write(config.storage.work_dir.join("keep.txt"), b"z").unwrap();

        let checker = IntegrityChecker::new(config.clone());
        let report = checker.run_all_checks();
        assert_eq!(report.checks.temp_files["count"], 2);

        let removed = checker.clean_temp().unwrap();
        assert_eq!(removed, 2);
        assert!(config.storage.work_dir.join("keep.txt").exists());
    }

    #[test]
    fn test_checkpoint_ahead_of_ledger_is_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let checkpoint = Checkpoint {
            last_index: 10,
            ..Default::default()
        };
        checkpoint.save(&config.state_path()).unwrap();
        std::fs::write(
            config.done_path(),
            "a1b2c3d4-e5f6-4a1b-9c8d-0123456789ab\n",
        )
        .unwrap();

        let report = IntegrityChecker::new(config).run_all_checks();
        assert_eq!(report.checks.consistency["status"], "mismatch");
    }
}

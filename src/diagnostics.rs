// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Session diagnostics: counters, event log, snapshots and the final report

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

use crate::classify::Verdict;
use crate::config::AppConfig;
use crate::Result;

/// Counters for one processing session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub total_in_library: usize,
    pub previously_processed: usize,
    pub to_process: usize,
    pub processed_this_session: usize,
    pub matched_this_session: usize,
    pub errors_this_session: usize,
    pub skipped_this_session: usize,
    pub skipped_by_type: HashMap<String, usize>,
    pub errors_by_type: HashMap<String, usize>,
    pub processing_times: Vec<f64>,
}

impl SessionStats {
    pub fn average_processing_time(&self) -> f64 {
        if self.processing_times.is_empty() {
            return 0.0;
        }
        self.processing_times.iter().sum::<f64>() / self.processing_times.len() as f64
    }

    /// Overall library coverage. Skipped photos count as covered: they were
    /// looked at and deliberately advanced past.
    pub fn completion_percentage(&self) -> f64 {
        if self.total_in_library == 0 {
            return 100.0;
        }
        let covered = self.previously_processed
            + self.processed_this_session
            + self.skipped_this_session;
        covered as f64 / self.total_in_library as f64 * 100.0
    }

    fn remaining(&self) -> i64 {
        self.total_in_library as i64
            - (self.previously_processed + self.processed_this_session + self.skipped_this_session)
                as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    PhotoProcessed,
    PhotoSkipped,
    BatchComplete,
    Error,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
    pub details: serde_json::Value,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    timestamp: DateTime<Utc>,
    stats: &'a SessionStats,
    events: &'a [TrackerEvent],
}

/// Tracks one processing run and writes per-run JSON snapshots
pub struct DiagnosticsTracker {
    stats: SessionStats,
    events: Vec<TrackerEvent>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    snapshot_path: PathBuf,
}

impl DiagnosticsTracker {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let dir = config.diagnostics_dir();
        std::fs::create_dir_all(&dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let snapshot_path = dir.join(format!("diagnostic_{}.json", stamp));
        info!("Diagnostics tracker initialized. Logging to: {}", snapshot_path.display());

        Ok(Self {
            stats: SessionStats::default(),
            events: Vec::new(),
            start_time: None,
            end_time: None,
            snapshot_path,
        })
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    pub fn start_processing(&mut self, total_photos: usize, already_done: usize) {
        let now = Utc::now();
        self.start_time = Some(now);
        self.stats.total_in_library = total_photos;
        self.stats.previously_processed = already_done;
        self.stats.to_process = total_photos.saturating_sub(already_done);

        self.events.push(TrackerEvent {
            timestamp: now,
            kind: EventKind::Start,
            photo_uuid: None,
            batch: None,
            details: json!({
                "total_photos": total_photos,
                "previously_processed": already_done,
                "to_process": self.stats.to_process,
            }),
        });

        info!("{}", "=".repeat(60));
        info!("PROCESSING STARTED - DIAGNOSTIC INFO");
        info!("{}", "-".repeat(60));
        info!("Total photos in library: {}", total_photos);
        info!("Previously processed: {}", already_done);
        info!("Photos to process: {}", self.stats.to_process);
        info!("Start time: {}", now);
        info!("{}", "=".repeat(60));

        self.save_snapshot();
    }

    pub fn record_photo_processed(
        &mut self,
        photo_uuid: &str,
        verdict: Verdict,
        seconds: f64,
        batch: u64,
    ) {
        self.stats.processed_this_session += 1;
        self.stats.processing_times.push(seconds);

        match verdict {
            Verdict::Match => self.stats.matched_this_session += 1,
            Verdict::Error => self.stats.errors_this_session += 1,
            Verdict::NoMatch => {}
        }

        self.events.push(TrackerEvent {
            timestamp: Utc::now(),
            kind: EventKind::PhotoProcessed,
            photo_uuid: Some(photo_uuid.to_string()),
            batch: Some(batch),
            details: json!({
                "verdict": verdict,
                "processing_time": seconds,
                "session_progress": format!(
                    "{}/{}",
                    self.stats.processed_this_session, self.stats.to_process
                ),
            }),
        });

        if self.stats.processed_this_session % 10 == 0 {
            self.log_progress();
        }
    }

    pub fn record_skip(&mut self, photo_uuid: &str, reason: &str) {
        self.stats.skipped_this_session += 1;
        *self.stats.skipped_by_type.entry(reason.to_string()).or_default() += 1;

        self.events.push(TrackerEvent {
            timestamp: Utc::now(),
            kind: EventKind::PhotoSkipped,
            photo_uuid: Some(photo_uuid.to_string()),
            batch: None,
            details: json!({ "reason": reason }),
        });
    }

    pub fn record_error(&mut self, photo_uuid: Option<&str>, error_type: &str, message: &str) {
        self.stats.errors_this_session += 1;
        *self.stats.errors_by_type.entry(error_type.to_string()).or_default() += 1;

        self.events.push(TrackerEvent {
            timestamp: Utc::now(),
            kind: EventKind::Error,
            photo_uuid: photo_uuid.map(str::to_string),
            batch: None,
            details: json!({
                "error_type": error_type,
                "error_message": message,
            }),
        });

        error!("Error recorded: {} - {}", error_type, message);
    }

    pub fn record_batch_complete(&mut self, batch: u64, batch_size: usize, matches_in_batch: usize) {
        self.events.push(TrackerEvent {
            timestamp: Utc::now(),
            kind: EventKind::BatchComplete,
            photo_uuid: None,
            batch: Some(batch),
            details: json!({
                "batch_size": batch_size,
                "matches_in_batch": matches_in_batch,
                "total_session_matches": self.stats.matched_this_session,
            }),
        });

        info!(
            "Batch {} complete: {} photos, {} matches",
            batch, batch_size, matches_in_batch
        );
        self.save_snapshot();
    }

    pub fn complete_processing(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);

        self.events.push(TrackerEvent {
            timestamp: now,
            kind: EventKind::Complete,
            photo_uuid: None,
            batch: None,
            details: json!({
                "processed_this_session": self.stats.processed_this_session,
                "matched_this_session": self.stats.matched_this_session,
                "errors_this_session": self.stats.errors_this_session,
                "skipped_this_session": self.stats.skipped_this_session,
                "completion_percentage": format!("{:.1}%", self.stats.completion_percentage()),
                "average_time_per_photo": format!("{:.2}s", self.stats.average_processing_time()),
            }),
        });

        self.final_report();
        self.save_snapshot();
    }

    fn log_progress(&self) {
        let advanced = self.stats.processed_this_session + self.stats.skipped_this_session;
        let session_progress = if self.stats.to_process > 0 {
            advanced as f64 / self.stats.to_process as f64 * 100.0
        } else {
            100.0
        };

        info!(
            "Progress: Session {:.1}% ({}/{}) | Overall {:.1}% ({}/{})",
            session_progress,
            advanced,
            self.stats.to_process,
            self.stats.completion_percentage(),
            self.stats.previously_processed + advanced,
            self.stats.total_in_library
        );
    }

    fn final_report(&self) {
        let (Some(start), Some(end)) = (self.start_time, self.end_time) else {
            return;
        };
        let duration = end - start;
        let remaining = self.stats.remaining();

        let header = if remaining <= 0 {
            "ALL PHOTOS COVERED - FINAL DIAGNOSTIC REPORT"
        } else {
            "SESSION COMPLETE - REVIEW REQUIRED - FINAL DIAGNOSTIC REPORT"
        };

        info!("{}", "=".repeat(70));
        info!("{}", header);
        info!("{}", "=".repeat(70));

        info!("LIBRARY STATUS:");
        info!("  Total photos in library:     {}", self.stats.total_in_library);
        info!("  Previously processed:        {}", self.stats.previously_processed);
        info!("  Needed processing:           {}", self.stats.to_process);

        info!("SESSION RESULTS:");
        info!("  Processed this session:      {}", self.stats.processed_this_session);
        info!("  Matches found:               {}", self.stats.matched_this_session);
        info!("  Errors encountered:          {}", self.stats.errors_this_session);
        info!("  Photos skipped:              {}", self.stats.skipped_this_session);

        info!("PERFORMANCE:");
        info!("  Total duration:              {}", duration);
        if !self.stats.processing_times.is_empty() {
            let avg = self.stats.average_processing_time();
            info!("  Average time per photo:      {:.2} seconds", avg);
            if avg > 0.0 {
                info!("  Photos per minute:           {:.1}", 60.0 / avg);
            }
        }

        info!("COMPLETION STATUS:");
        info!("  Overall completion:          {:.1}%", self.stats.completion_percentage());
        if remaining > 0 {
            info!("  Photos remaining:            {}", remaining);
            if !self.stats.processing_times.is_empty() {
                let eta_secs = remaining as f64 * self.stats.average_processing_time();
                info!(
                    "  Estimated time to complete:  {}",
                    chrono::Duration::seconds(eta_secs as i64)
                );
            }
        } else {
            info!("  All photos have been processed");
        }

        if !self.stats.skipped_by_type.is_empty() {
            info!("SKIP REASONS:");
            for (reason, count) in &self.stats.skipped_by_type {
                info!("  {:30} {}", reason, count);
            }
        }

        if !self.stats.errors_by_type.is_empty() {
            info!("ERROR SUMMARY:");
            for (error_type, count) in &self.stats.errors_by_type {
                info!("  {:30} {}", error_type, count);
            }
        }

        info!("{}", "=".repeat(70));
        info!("Diagnostic log saved to: {}", self.snapshot_path.display());
        info!("{}", "=".repeat(70));
    }

    /// Best-effort snapshot write; a failed write never aborts processing
    fn save_snapshot(&self) {
        let snapshot = Snapshot {
            timestamp: Utc::now(),
            stats: &self.stats,
            events: &self.events,
        };
        let outcome = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                std::fs::write(&self.snapshot_path, content).map_err(|e| e.to_string())
            });
        if let Err(e) = outcome {
            error!("Failed to save diagnostic snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn tracker_in(dir: &Path) -> DiagnosticsTracker {
        let mut config = AppConfig::default();
        config.storage.work_dir = dir.to_path_buf();
        DiagnosticsTracker::new(&config).unwrap()
    }

    #[test]
    fn test_counters_and_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());

        tracker.start_processing(10, 4);
        assert_eq!(tracker.stats().to_process, 6);

        tracker.record_photo_processed("u1", Verdict::Match, 1.0, 1);
        tracker.record_photo_processed("u2", Verdict::NoMatch, 3.0, 1);
        tracker.record_photo_processed("u3", Verdict::Error, 2.0, 1);
        tracker.record_skip("u4", "video_file");
        tracker.record_skip("u5", "video_file");
        tracker.record_error(Some("u6"), "export_error", "boom");

        let stats = tracker.stats();
        assert_eq!(stats.processed_this_session, 3);
        assert_eq!(stats.matched_this_session, 1);
        assert_eq!(stats.errors_this_session, 2);
        assert_eq!(stats.skipped_this_session, 2);
        assert_eq!(stats.skipped_by_type["video_file"], 2);
        assert_eq!(stats.errors_by_type["export_error"], 1);
        assert!((stats.average_processing_time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_completion_percentage() {
        let mut stats = SessionStats {
            total_in_library: 10,
            previously_processed: 4,
            processed_this_session: 2,
            skipped_this_session: 1,
            ..Default::default()
        };
        assert!((stats.completion_percentage() - 70.0).abs() < 1e-9);
        assert_eq!(stats.remaining(), 3);

        stats.total_in_library = 0;
        assert_eq!(stats.completion_percentage(), 100.0);
    }

    #[test]
    fn test_snapshot_written_and_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());

        tracker.start_processing(2, 0);
        tracker.record_photo_processed("u1", Verdict::Match, 0.5, 1);
        tracker.record_batch_complete(1, 1, 1);
        tracker.complete_processing();

        let content = std::fs::read_to_string(tracker.snapshot_path()).unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(snapshot["stats"]["matched_this_session"], 1);

        let kinds: Vec<&str> = snapshot["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["start", "photo_processed", "batch_complete", "complete"]);
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Resumable batch processor
//!
//! Walks the library in batches, classifies each new photo, buffers matches
//! for album updates and checkpoints after every batch. Idempotence comes
//! from the done ledger: re-runs skip photos by UUID, not by index.

use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::classify::{Classifier, Verdict};
use crate::config::AppConfig;
use crate::diagnostics::DiagnosticsTracker;
use crate::library::{AlbumHandle, PhotoInfo, PhotoLibrary};
use crate::state::{Checkpoint, DoneLedger};
use crate::Result;

const BATCH_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    UpToDate,
    Completed,
}

/// Final session summary printed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub total_photos: usize,
    pub previously_processed: usize,
    pub processed_this_session: usize,
    pub matches_this_session: usize,
    pub errors_this_session: usize,
    pub skipped_this_session: usize,
    pub batches_processed: u64,
}

/// Determine which photos still need work.
///
/// Resumes from the checkpoint index; photos before it count as already
/// processed, as do later photos whose UUID is in the done ledger.
pub fn analyze_work(
    checkpoint: &Checkpoint,
    done: &DoneLedger,
    photos: &[PhotoInfo],
) -> (Vec<(usize, PhotoInfo)>, usize) {
    info!("Analyzing library to determine work needed...");

    let start_index = checkpoint.last_index.min(photos.len());
    if start_index > 0 {
        info!("Resuming from index {}", start_index);
    }

    let mut already_processed = start_index;
    let mut to_process = Vec::new();

    for (index, photo) in photos.iter().enumerate().skip(start_index) {
        if done.contains(&photo.uuid) {
            already_processed += 1;
        } else {
            to_process.push((index, photo.clone()));
        }
    }

    info!("Analysis complete:");
    info!("  - Total photos: {}", photos.len());
    info!("  - Already processed: {}", already_processed);
    info!("  - Need processing: {}", to_process.len());

    (to_process, already_processed)
}

pub struct Processor {
    config: AppConfig,
    classifier: Classifier,
    library: Box<dyn PhotoLibrary>,
    checkpoint: Checkpoint,
    initial_errors: u64,
    done: DoneLedger,
    diagnostics: Option<DiagnosticsTracker>,
    current_batch: u64,
    no_album: bool,
}

impl Processor {
    pub fn new(
        config: AppConfig,
        classifier: Classifier,
        library: Box<dyn PhotoLibrary>,
        enable_diagnostics: bool,
        no_album: bool,
    ) -> Result<Self> {
        let checkpoint = Checkpoint::load(&config.state_path());
        let done = DoneLedger::load(&config.done_path());
        let diagnostics = if enable_diagnostics {
            Some(DiagnosticsTracker::new(&config)?)
        } else {
            None
        };

        Ok(Self {
            initial_errors: checkpoint.errors,
            current_batch: checkpoint.batches_processed,
            config,
            classifier,
            library,
            checkpoint,
            done,
            diagnostics,
            no_album,
        })
    }

    /// Process everything the library holds that is not yet done
    pub async fn process_library(&mut self) -> Result<RunSummary> {
        info!(
            "Starting photo processing for task: {}",
            self.config.task.name
        );
        info!("{}", self.classifier.describe());

        let album = self.resolve_album();
        let photos = self.library.photos()?;
        let total_photos = photos.len();

        let (to_process, already_processed) = analyze_work(&self.checkpoint, &self.done, &photos);

        if let Some(diagnostics) = &mut self.diagnostics {
            diagnostics.start_processing(total_photos, self.done.len());
        }

        if to_process.is_empty() {
            info!("{}", "=".repeat(60));
            info!("NO NEW PHOTOS TO PROCESS");
            info!("All {} photos have already been processed", total_photos);
            info!("{}", "=".repeat(60));

            if let Some(diagnostics) = &mut self.diagnostics {
                diagnostics.complete_processing();
            }

            return Ok(RunSummary {
                status: RunStatus::UpToDate,
                total_photos,
                previously_processed: already_processed,
                processed_this_session: 0,
                matches_this_session: 0,
                errors_this_session: 0,
                skipped_this_session: 0,
                batches_processed: 0,
            });
        }

        match self
            .run_batches(&to_process, album.as_ref(), total_photos, already_processed)
            .await
        {
            Ok(summary) => {
                if let Some(diagnostics) = &mut self.diagnostics {
                    diagnostics.complete_processing();
                }
                Ok(summary)
            }
            Err(e) => {
                error!("Critical error during processing: {}", e);
                if let Some(diagnostics) = &mut self.diagnostics {
                    diagnostics.record_error(None, "critical", &e.to_string());
                    diagnostics.complete_processing();
                }
                Err(e)
            }
        }
    }

    async fn run_batches(
        &mut self,
        to_process: &[(usize, PhotoInfo)],
        album: Option<&AlbumHandle>,
        total_photos: usize,
        previously_processed: usize,
    ) -> Result<RunSummary> {
        let batch_size = self.config.processing.batch_size.max(1);
        let total_to_process = to_process.len();

        let mut processed = 0usize;
        let mut matches = 0usize;
        let mut errors = 0usize;
        let mut skipped = 0usize;
        let mut buffer: Vec<String> = Vec::new();

        info!(
            "Processing {} photos in batches of {}",
            total_to_process, batch_size
        );

        let mut session_batches = 0u64;
        let mut batch_start_pos = 0usize;

        for batch in to_process.chunks(batch_size) {
            self.current_batch += 1;
            session_batches += 1;

            info!(
                "Processing batch {}: photos {}-{} of {}",
                self.current_batch,
                batch_start_pos + 1,
                batch_start_pos + batch.len(),
                total_to_process
            );
            batch_start_pos += batch.len();

            let batch_started = Instant::now();
            let mut batch_matches = 0usize;
            let mut stop = false;

            for (_, photo) in batch {
                let photo_started = Instant::now();

                if let Some(reason) = self.skip_reason(photo) {
                    skipped += 1;
                    self.done.mark(&photo.uuid)?;
                    if let Some(diagnostics) = &mut self.diagnostics {
                        diagnostics.record_skip(&photo.uuid, &reason);
                    }
                    continue;
                }

                let verdict = self.classify_photo(photo).await;
                let seconds = photo_started.elapsed().as_secs_f64();

                match verdict {
                    Verdict::Match => {
                        info!("  Match found: {}", photo.filename);
                        buffer.push(photo.uuid.clone());
                        matches += 1;
                        batch_matches += 1;
                    }
                    Verdict::Error => errors += 1,
                    Verdict::NoMatch => {}
                }

                processed += 1;
                self.done.mark(&photo.uuid)?;

                if let Some(diagnostics) = &mut self.diagnostics {
                    diagnostics.record_photo_processed(
                        &photo.uuid,
                        verdict,
                        seconds,
                        self.current_batch,
                    );
                }

                if buffer.len() >= self.config.processing.album_update_frequency.max(1) {
                    self.flush_matches(album, &mut buffer);
                }

                if self.should_stop_debug(matches) {
                    info!("Debug limit reached, stopping processing");
                    stop = true;
                    break;
                }
            }

            self.flush_matches(album, &mut buffer);

            // The checkpoint index is the library index, not the work-list
            // position, so resuming skips straight past untouched prefixes.
            if let Some((last_index, _)) = batch.last() {
                self.checkpoint.last_index = last_index + 1;
            }
            self.checkpoint.batches_processed = self.current_batch;
            self.checkpoint.errors = self.initial_errors + errors as u64;
            self.checkpoint.save(&self.config.state_path())?;

            if let Some(diagnostics) = &mut self.diagnostics {
                diagnostics.record_batch_complete(self.current_batch, batch.len(), batch_matches);
            }

            info!(
                "Batch {} complete in {:.1}s",
                self.current_batch,
                batch_started.elapsed().as_secs_f64()
            );
            info!("  Processed: {}, Matches: {}", batch.len(), batch_matches);

            if stop {
                break;
            }

            tokio::time::sleep(BATCH_PAUSE).await;
        }

        Ok(RunSummary {
            status: RunStatus::Completed,
            total_photos,
            previously_processed,
            processed_this_session: processed,
            matches_this_session: matches,
            errors_this_session: errors,
            skipped_this_session: skipped,
            batches_processed: session_batches,
        })
    }

    fn resolve_album(&mut self) -> Option<AlbumHandle> {
        if self.no_album {
            info!("Album updates disabled for this run");
            return None;
        }

        let name = self.config.album.name.clone();
        match self
            .library
            .ensure_album(&name, self.config.album.create_if_missing)
        {
            Ok(Some(album)) => Some(album),
            Ok(None) => {
                warn!(
                    "Album {} not found and create_if_missing is false",
                    name
                );
                None
            }
            Err(e) => {
                warn!("Error managing album {}: {}", name, e);
                None
            }
        }
    }

    /// Add buffered matches to the album and move them into the checkpoint.
    /// An album failure is logged, not fatal: the matches stay recorded.
    fn flush_matches(&mut self, album: Option<&AlbumHandle>, buffer: &mut Vec<String>) {
        if buffer.is_empty() {
            return;
        }

        if let Some(album) = album {
            info!("Adding {} photos to album", buffer.len());
            match self.library.add_to_album(&album.name, buffer) {
                Ok(added) => info!("Added {} new photos to album {}", added, album.name),
                Err(e) => warn!("Error adding photos to album {}: {}", album.name, e),
            }
        }

        self.checkpoint.matches.append(buffer);
    }

    fn skip_reason(&self, photo: &PhotoInfo) -> Option<String> {
        if self.done.contains(&photo.uuid) {
            return Some("already_processed".to_string());
        }

        if self.config.processing.skip_videos && photo.is_video {
            return Some("video_file".to_string());
        }

        if let Some(ext) = photo.path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_uppercase();
            if self.config.processing.skip_types.iter().any(|t| t.eq_ignore_ascii_case(&ext)) {
                return Some(format!("{}_file", ext));
            }
        }

        if !photo.path.exists() {
            return Some("no_accessible_file".to_string());
        }

        None
    }

    async fn classify_photo(&self, photo: &PhotoInfo) -> Verdict {
        let temp_path = match self
            .library
            .export_for_classification(photo, &self.config.storage.work_dir)
        {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to export {}: {}", photo.filename, e);
                return Verdict::Error;
            }
        };

        let verdict = self.classifier.classify(&temp_path).await;
        if let Err(e) = std::fs::remove_file(&temp_path) {
            warn!("Could not remove temp file {}: {}", temp_path.display(), e);
        }
        verdict
    }

    fn should_stop_debug(&self, match_count: usize) -> bool {
        self.config.processing.debug_mode && match_count >= self.config.processing.debug_limit
    }
}

/// Export destination for temp files, shared with integrity checks
pub fn temp_file_pattern(work_dir: &Path) -> String {
    work_dir.join("temp_*.jpg").to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RuleSet;
    use crate::config::LibraryConfig;
    use crate::library::{album_size, FsLibrary};
    use crate::providers::VisionProvider;
    use async_trait::async_trait;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Provider answering from a canned queue, in library scan order
    struct QueueProvider {
        responses: Mutex<Vec<String>>,
    }

    impl QueueProvider {
        fn new(responses: &[&str]) -> Box<Self> {
            let mut responses: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
            responses.reverse();
            Box::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl VisionProvider for QueueProvider {
        fn name(&self) -> &'static str {
            "queue"
        }

        fn model(&self) -> &str {
            "queue-model"
        }

        fn api_url(&self) -> &str {
            "http://queue"
        }

        async fn classify_image(&self, _image_path: &Path, _prompt: &str) -> Result<String> {
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }

        async fn check_server(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let img = ImageBuffer::from_pixel(width, height, Rgb::<u8>([50, 90, 200]));
        img.save(path).unwrap();
    }

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.library = LibraryConfig {
            root: dir.join("photos"),
            albums_dir: dir.join("albums"),
        };
        config.storage.work_dir = dir.join("work");
        config.album.name = "Dogs".to_string();
        config.task.rules = RuleSet::KeywordMatch {
            keywords: vec!["dog".to_string()],
            match_all: false,
        };
        config
    }

    fn processor_with(
        config: &AppConfig,
        responses: &[&str],
        enable_diagnostics: bool,
    ) -> Processor {
        let classifier =
            Classifier::new(QueueProvider::new(responses), &config.task).unwrap();
        let library = Box::new(FsLibrary::open(&config.library).unwrap());
        Processor::new(config.clone(), classifier, library, enable_diagnostics, false).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_run_matches_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // Scan order is sorted: a.png, b.png, c.png
        write_png(&config.library.root.join("a.png"), 16, 16);
        write_png(&config.library.root.join("b.png"), 16, 16);
        write_png(&config.library.root.join("c.png"), 16, 16);

        let mut processor =
            processor_with(&config, &["a dog", "a cat", "another dog"], true);
        let summary = processor.process_library().await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_photos, 3);
        assert_eq!(summary.processed_this_session, 3);
        assert_eq!(summary.matches_this_session, 2);
        assert_eq!(summary.errors_this_session, 0);
        assert_eq!(summary.batches_processed, 1);

        assert_eq!(album_size(&config.library.albums_dir, "Dogs"), Some(2));

        let checkpoint = Checkpoint::load(&config.state_path());
        assert_eq!(checkpoint.last_index, 3);
        assert_eq!(checkpoint.matches.len(), 2);
        assert_eq!(checkpoint.batches_processed, 1);

        let done = DoneLedger::load(&config.done_path());
        assert_eq!(done.len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_png(&config.library.root.join("a.png"), 16, 16);
        write_png(&config.library.root.join("b.png"), 16, 16);

        let mut first = processor_with(&config, &["a dog", "a cat"], false);
        first.process_library().await.unwrap();

        let mut second = processor_with(&config, &[], false);
        let summary = second.process_library().await.unwrap();

        assert_eq!(summary.status, RunStatus::UpToDate);
        assert_eq!(summary.processed_this_session, 0);
        assert_eq!(summary.previously_processed, 2);
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_png(&config.library.root.join("a.png"), 16, 16);
        std::fs::write(config.library.root.join("b.gif"), b"gif").unwrap();
        std::fs::write(config.library.root.join("clip.mp4"), b"video").unwrap();

        let mut processor = processor_with(&config, &["a dog"], true);
        let summary = processor.process_library().await.unwrap();

        assert_eq!(summary.processed_this_session, 1);
        assert_eq!(summary.skipped_this_session, 2);
        assert_eq!(summary.matches_this_session, 1);

        let stats = processor.diagnostics.as_ref().unwrap().stats();
        assert_eq!(stats.skipped_by_type["GIF_file"], 1);
        assert_eq!(stats.skipped_by_type["video_file"], 1);

        // Skipped photos are marked done and never revisited
        let done = DoneLedger::load(&config.done_path());
        assert_eq!(done.len(), 3);
    }

    #[tokio::test]
    async fn test_buffered_album_flush_at_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.processing.album_update_frequency = 2;
        for name in ["a.png", "b.png", "c.png"] {
            write_png(&config.library.root.join(name), 16, 16);
        }

        let mut processor = processor_with(&config, &["dog", "dog", "dog"], false);
        let summary = processor.process_library().await.unwrap();

        assert_eq!(summary.matches_this_session, 3);
        // Two flushed mid-batch, one at end of batch
        assert_eq!(album_size(&config.library.albums_dir, "Dogs"), Some(3));
        let checkpoint = Checkpoint::load(&config.state_path());
        assert_eq!(checkpoint.matches.len(), 3);
    }

    #[tokio::test]
    async fn test_debug_limit_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.processing.debug_mode = true;
        config.processing.debug_limit = 1;
        for name in ["a.png", "b.png", "c.png"] {
            write_png(&config.library.root.join(name), 16, 16);
        }

        let mut processor = processor_with(&config, &["dog", "dog", "dog"], false);
        let summary = processor.process_library().await.unwrap();

        assert_eq!(summary.matches_this_session, 1);
        assert_eq!(summary.processed_this_session, 1);

        // Checkpoint still saved for the partial batch
        let checkpoint = Checkpoint::load(&config.state_path());
        assert_eq!(checkpoint.last_index, 3);
    }

    #[tokio::test]
    async fn test_unreadable_photo_is_error_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.library.root).unwrap();
        std::fs::write(config.library.root.join("broken.jpg"), b"not an image").unwrap();
        write_png(&config.library.root.join("ok.png"), 16, 16);

        let mut processor = processor_with(&config, &["dog", "dog"], false);
        let summary = processor.process_library().await.unwrap();

        // Both photos counted; the broken one becomes an error verdict
        assert_eq!(summary.processed_this_session, 2);
        assert_eq!(summary.errors_this_session, 1);
        assert_eq!(summary.matches_this_session, 1);

        let done = DoneLedger::load(&config.done_path());
        assert_eq!(done.len(), 2);
    }

    #[tokio::test]
    async fn test_multiple_batches_advance_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.processing.batch_size = 2;
        for name in ["a.png", "b.png", "c.png", "d.png", "e.png"] {
            write_png(&config.library.root.join(name), 16, 16);
        }

        let mut processor =
            processor_with(&config, &["cat", "cat", "dog", "cat", "cat"], false);
        let summary = processor.process_library().await.unwrap();

        assert_eq!(summary.batches_processed, 3);
        assert_eq!(summary.matches_this_session, 1);
        let checkpoint = Checkpoint::load(&config.state_path());
        assert_eq!(checkpoint.last_index, 5);
        assert_eq!(checkpoint.batches_processed, 3);
    }

    #[test]
    fn test_analyze_work_resume() {
        let photos: Vec<PhotoInfo> = (0..5)
            .map(|i| PhotoInfo {
                uuid: format!("uuid-{}", i),
                filename: format!("p{}.png", i),
                path: PathBuf::from(format!("/photos/p{}.png", i)),
                is_video: false,
            })
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let mut done = DoneLedger::load(&dir.path().join("done.txt"));
        done.mark("uuid-3").unwrap();

        let checkpoint = Checkpoint {
            last_index: 2,
            ..Default::default()
        };

        let (work, already) = analyze_work(&checkpoint, &done, &photos);
        // Index 0-1 covered by checkpoint, uuid-3 by the ledger
        assert_eq!(already, 3);
        let indices: Vec<usize> = work.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![2, 4]);
    }

    #[test]
    fn test_temp_file_pattern() {
        assert_eq!(
            temp_file_pattern(Path::new("/tmp/work")),
            "/tmp/work/temp_*.jpg"
        );
    }
}

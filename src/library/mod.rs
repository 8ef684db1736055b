// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Photo library access
//!
//! The trait is the seam for photo storage; the filesystem backend scans a
//! directory tree and models albums as directories of hard links.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LibraryConfig;
use crate::{Result, VasortError};

/// Namespace for deriving stable per-photo UUIDs from relative paths
const LIBRARY_NAMESPACE: Uuid = Uuid::from_u128(0x7b1d_c0de_5afe_4a11_9e2f_3d5b_8c6a_0f42);

/// Longest side of exported classification images
const EXPORT_MAX_DIMENSION: u32 = 1024;

const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif", "heic", "heif", "avif",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm"];

/// A single item in the photo library
#[derive(Debug, Clone)]
pub struct PhotoInfo {
    pub uuid: String,
    pub filename: String,
    pub path: PathBuf,
    pub is_video: bool,
}

/// A resolved destination album
#[derive(Debug, Clone)]
pub struct AlbumHandle {
    pub name: String,
    pub dir: PathBuf,
}

/// Photo storage backend
pub trait PhotoLibrary {
    /// All photos in deterministic order (sorted by relative path) so that
    /// checkpoint indices survive restarts.
    fn photos(&self) -> Result<Vec<PhotoInfo>>;

    /// Export a photo as `temp_<uuid>.jpg` under `work_dir`, downscaled and
    /// re-encoded for classification.
    fn export_for_classification(&self, photo: &PhotoInfo, work_dir: &Path) -> Result<PathBuf>;

    /// Resolve the destination album, creating it when configured to.
    /// `None` means the album is absent and must not be created.
    fn ensure_album(&self, name: &str, create_if_missing: bool) -> Result<Option<AlbumHandle>>;

    /// Add photos to an album by UUID. Idempotent; returns how many were
    /// newly added. Unknown UUIDs are skipped with a warning.
    fn add_to_album(&self, name: &str, uuids: &[String]) -> Result<usize>;

    fn total(&self) -> Result<usize> {
        Ok(self.photos()?.len())
    }
}

/// Filesystem-backed photo library
pub struct FsLibrary {
    albums_dir: PathBuf,
    photos: Vec<PhotoInfo>,
    index: HashMap<String, PhotoInfo>,
}

impl FsLibrary {
    /// Open a library, scanning `root` recursively for media files
    pub fn open(config: &LibraryConfig) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(VasortError::Library(format!(
                "Library root not found: {}",
                config.root.display()
            )));
        }

        let mut entries: Vec<(PathBuf, PhotoInfo)> = Vec::new();
        scan_dir(&config.root, &config.root, &mut entries)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let photos: Vec<PhotoInfo> = entries.into_iter().map(|(_, p)| p).collect();
        let index = photos
            .iter()
            .map(|p| (p.uuid.clone(), p.clone()))
            .collect();

        info!(
            "Opened library at {} ({} items)",
            config.root.display(),
            photos.len()
        );

        Ok(Self {
            albums_dir: config.albums_dir.clone(),
            photos,
            index,
        })
    }

    fn album_dir(&self, name: &str) -> PathBuf {
        self.albums_dir.join(name)
    }
}

fn scan_dir(root: &Path, dir: &Path, entries: &mut Vec<(PathBuf, PhotoInfo)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            scan_dir(root, &path, entries)?;
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_lowercase();

        let is_video = VIDEO_EXTENSIONS.contains(&ext.as_str());
        if !is_video && !PHOTO_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let uuid = Uuid::new_v5(&LIBRARY_NAMESPACE, relative.to_string_lossy().as_bytes())
            .hyphenated()
            .to_string();

        entries.push((
            relative,
            PhotoInfo {
                uuid,
                filename: name.to_string(),
                path: path.clone(),
                is_video,
            },
        ));
    }
    Ok(())
}

impl PhotoLibrary for FsLibrary {
    fn photos(&self) -> Result<Vec<PhotoInfo>> {
        Ok(self.photos.clone())
    }

    fn export_for_classification(&self, photo: &PhotoInfo, work_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(work_dir)?;

        let img = image::open(&photo.path)?;
        let img = if img.width() > EXPORT_MAX_DIMENSION || img.height() > EXPORT_MAX_DIMENSION {
            img.resize(
                EXPORT_MAX_DIMENSION,
                EXPORT_MAX_DIMENSION,
                image::imageops::FilterType::Triangle,
            )
        } else {
            img
        };

        let dest = work_dir.join(format!("temp_{}.jpg", photo.uuid));
        // JPEG has no alpha channel
        img.into_rgb8().save_with_format(&dest, image::ImageFormat::Jpeg)?;

        debug!("Exported {} to {}", photo.filename, dest.display());
        Ok(dest)
    }

    fn ensure_album(&self, name: &str, create_if_missing: bool) -> Result<Option<AlbumHandle>> {
        let dir = self.album_dir(name);
        if dir.is_dir() {
            info!("Using existing album: {}", name);
            return Ok(Some(AlbumHandle {
                name: name.to_string(),
                dir,
            }));
        }

        if !create_if_missing {
            return Ok(None);
        }

        std::fs::create_dir_all(&dir)?;
        info!("Created new album: {}", name);
        Ok(Some(AlbumHandle {
            name: name.to_string(),
            dir,
        }))
    }

    fn add_to_album(&self, name: &str, uuids: &[String]) -> Result<usize> {
        if uuids.is_empty() {
            return Ok(0);
        }

        let dir = self.album_dir(name);
        std::fs::create_dir_all(&dir)?;

        let mut added = 0;
        for uuid in uuids {
            let Some(photo) = self.index.get(uuid) else {
                warn!("No library item found for UUID {}; skipping album add", uuid);
                continue;
            };

            let ext = photo
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("jpg");
            let dest = dir.join(format!("{}.{}", uuid, ext));
            if dest.exists() {
                continue;
            }

            // Hard link where possible, copy across devices
            if std::fs::hard_link(&photo.path, &dest).is_err() {
                std::fs::copy(&photo.path, &dest)?;
            }
            added += 1;
        }

        Ok(added)
    }

    fn total(&self) -> Result<usize> {
        Ok(self.photos.len())
    }
}

/// Number of entries in an album directory, or `None` if it does not exist
pub fn album_size(albums_dir: &Path, name: &str) -> Option<usize> {
    let dir = albums_dir.join(name);
    let entries = std::fs::read_dir(dir).ok()?;
    Some(entries.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count())
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Vision model provider abstraction and adapters
//!
//! Each adapter keeps its wire types private and handles its own retry loop.
//! Exhausted network retries yield an empty response rather than an error,
//! which the classifier turns into `Verdict::Error`.

pub mod lm_studio;
pub mod mlx_vlm;
pub mod ollama;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::{ProviderConfig, ProviderKind, ProviderSettings};
use crate::{Result, VasortError};

pub use lm_studio::LmStudioProvider;
pub use mlx_vlm::MlxVlmProvider;
pub use ollama::OllamaProvider;

/// A locally hosted vision-language model server
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    fn api_url(&self) -> &str;

    /// Ask the model about an image. Retries are handled internally; an
    /// empty string means retries were exhausted on network errors.
    async fn classify_image(&self, image_path: &Path, prompt: &str) -> Result<String>;

    /// Health and model availability probe
    async fn check_server(&self) -> Result<bool>;

    /// Provider summary for the CLI
    async fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: self.name().to_string(),
            model: self.model().to_string(),
            api_url: self.api_url().to_string(),
            available: self.check_server().await.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub model: String,
    pub api_url: String,
    pub available: bool,
}

/// Pre-flight image validation limits shared by adapters
#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_bytes: u64,
    pub max_dimension_px: u32,
}

impl ImageLimits {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let max_mb = if settings.max_image_size_mb > 0.0 {
            settings.max_image_size_mb
        } else {
            50.0
        };
        Self {
            max_bytes: (max_mb * 1024.0 * 1024.0) as u64,
            max_dimension_px: settings.max_image_dimension_px,
        }
    }

    /// Check that an image exists, is non-empty, decodes, and is within the
    /// configured size and dimension limits. Returns a reason on rejection.
    pub fn validate(&self, image_path: &Path) -> std::result::Result<(), String> {
        if !image_path.exists() {
            return Err("File does not exist".to_string());
        }

        let size = std::fs::metadata(image_path)
            .map_err(|e| format!("Cannot stat file: {}", e))?
            .len();
        if size == 0 {
            return Err("File is empty".to_string());
        }
        if size > self.max_bytes {
            return Err(format!(
                "File too large ({:.1}MB > {:.0}MB)",
                size as f64 / 1024.0 / 1024.0,
                self.max_bytes as f64 / 1024.0 / 1024.0
            ));
        }

        let img = image::open(image_path).map_err(|e| format!("Invalid image file: {}", e))?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err("Image has zero dimensions".to_string());
        }
        if self.max_dimension_px > 0 && (width > self.max_dimension_px || height > self.max_dimension_px) {
            return Err(format!(
                "Image too large ({}x{} > {}px limit)",
                width, height, self.max_dimension_px
            ));
        }

        Ok(())
    }
}

/// Encode an image file as base64 for JSON payloads
pub fn encode_image(image_path: &Path) -> Result<String> {
    let data = std::fs::read(image_path)?;
    Ok(general_purpose::STANDARD.encode(&data))
}

/// Linear backoff used by all adapters: 2s, 4s, 6s...
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(2 * (attempt as u64 + 1))
}

/// Create a provider from configuration without probing the server
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn VisionProvider>> {
    info!(
        "Creating {} provider with model: {}",
        config.kind, config.settings.model
    );
    let provider: Box<dyn VisionProvider> = match config.kind {
        ProviderKind::Ollama => Box::new(OllamaProvider::new(&config.settings)?),
        ProviderKind::LmStudio => Box::new(LmStudioProvider::new(&config.settings)?),
        ProviderKind::MlxVlm => Box::new(MlxVlmProvider::new(&config.settings)?),
    };
    Ok(provider)
}

/// Create a provider and verify the server is up and the model is loaded
pub async fn connect_provider(config: &ProviderConfig) -> Result<Box<dyn VisionProvider>> {
    let provider = create_provider(config)?;
    if !provider.check_server().await? {
        return Err(VasortError::ProviderUnavailable(format!(
            "{} server is not available. Ensure the server is running and the model is loaded.",
            config.kind
        )));
    }
    Ok(provider)
}

/// Provider kinds and descriptions for the CLI
pub fn list_providers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ollama", "Ollama local AI server"),
        ("lm_studio", "LM Studio with OpenAI-compatible API"),
        ("mlx_vlm", "MLX Vision Language Models for Apple Silicon"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_pixel(width, height, Rgb::<u8>([120, 80, 40]));
        img.save(path).unwrap();
    }

    fn limits(max_bytes: u64, max_dimension_px: u32) -> ImageLimits {
        ImageLimits { max_bytes, max_dimension_px }
    }

    #[test]
    fn test_validate_accepts_normal_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_png(&path, 32, 32);
        assert!(limits(50 * 1024 * 1024, 0).validate(&path).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.png");
        assert!(limits(1024, 0).validate(&missing).is_err());

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(limits(1024, 0).validate(&empty).unwrap_err(), "File is empty");
    }

    #[test]
    fn test_validate_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_png(&path, 64, 64);

        let err = limits(10, 0).validate(&path).unwrap_err();
        assert!(err.contains("File too large"));

        let err = limits(50 * 1024 * 1024, 32).validate(&path).unwrap_err();
        assert!(err.contains("64x64"));
    }

    #[test]
    fn test_validate_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_photo.png");
        std::fs::write(&path, b"plain text").unwrap();
        let err = limits(1024, 0).validate(&path).unwrap_err();
        assert!(err.contains("Invalid image file"));
    }

    #[test]
    fn test_encode_image_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(encode_image(&path).unwrap(), "YWJj");
    }

    #[test]
    fn test_retry_delay_is_linear() {
        assert_eq!(retry_delay(0), Duration::from_secs(2));
        assert_eq!(retry_delay(1), Duration::from_secs(4));
        assert_eq!(retry_delay(2), Duration::from_secs(6));
    }

    #[test]
    fn test_factory_builds_each_kind() {
        use crate::config::AppConfig;

        let mut config = AppConfig::default();
        for (kind, expected) in [
            (ProviderKind::Ollama, "ollama"),
            (ProviderKind::LmStudio, "lm_studio"),
            (ProviderKind::MlxVlm, "mlx_vlm"),
        ] {
            config.provider.kind = kind;
            let provider = create_provider(&config.provider).unwrap();
            assert_eq!(provider.name(), expected);
            assert_eq!(provider.model(), "qwen2.5vl:3b");
        }
    }

    #[test]
    fn test_list_providers() {
        let providers = list_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers.iter().any(|(name, _)| *name == "ollama"));
    }
}

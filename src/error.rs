// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for vasort

use thiserror::Error;

/// Result type alias for vasort operations
pub type Result<T> = std::result::Result<T, VasortError>;

/// vasort error types
#[derive(Error, Debug)]
pub enum VasortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider not available: {0}")]
    ProviderUnavailable(String),

    #[error("Library error: {0}")]
    Library(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! # vasort
//!
//! Sorts a local photo library into albums using a locally hosted
//! vision-language model. Photos are classified in resumable batches against
//! configurable rules; matches are hard-linked into album directories and
//! every run leaves a checkpoint, a done ledger and optional diagnostics.
//!
//! Supported model servers: Ollama, LM Studio and MLX VLM.

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod integrity;
pub mod library;
pub mod logging;
pub mod processor;
pub mod providers;
pub mod state;

pub use config::AppConfig;
pub use error::{Result, VasortError};

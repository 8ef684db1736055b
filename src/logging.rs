// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Logging initialization: console plus an append-only log file

use std::fs::OpenOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;
use crate::Result;

/// Initialize tracing. The returned guard must stay alive for the duration of
/// the program or buffered file output is lost.
pub fn init_logging(config: &AppConfig, verbose: bool, quiet: bool) -> Result<Option<WorkerGuard>> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    // HTTP internals are noisy at debug; keep them damped unless asked for
    let directives = if verbose {
        level.to_string()
    } else {
        format!("{},reqwest=warn,hyper=warn", level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let console_layer = if config.logging.console {
        Some(fmt::layer().with_target(false))
    } else {
        None
    };

    let (file_layer, guard) = if config.logging.file {
        let path = config.log_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer.map(|l| l.boxed()))
        .with(file_layer.map(|l| l.boxed()))
        .init();

    Ok(guard)
}

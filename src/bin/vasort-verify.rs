// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! vasort Integrity Utility
//!
//! Checks processing state for corruption and inconsistencies, and can repair
//! duplicate ledger entries and orphaned temp files.

use clap::Parser;
use std::path::PathBuf;

use vasort::config::AppConfig;
use vasort::integrity::IntegrityChecker;

#[derive(Parser, Debug)]
#[command(name = "vasort-verify")]
#[command(version = "1.0.0")]
#[command(about = "Verify vasort state integrity")]
struct Args {
    /// Path to configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Apply all safe repairs (equivalent to --fix-duplicates --clean-temp)
    #[arg(long)]
    repair: bool,

    /// Remove duplicate lines from the done ledger
    #[arg(long)]
    fix_duplicates: bool,

    /// Delete orphaned temp export files
    #[arg(long)]
    clean_temp: bool,

    /// Write the full report as JSON to this path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let config = AppConfig::resolve(args.config.as_deref())?;
    let checker = IntegrityChecker::new(config);

    if args.repair || args.fix_duplicates {
        let removed = checker.fix_duplicates()?;
        println!("Duplicate ledger entries removed: {}", removed);
    }
    if args.repair || args.clean_temp {
        let removed = checker.clean_temp()?;
        println!("Orphaned temp files removed: {}", removed);
    }

    let report = checker.run_all_checks();

    println!();
    println!("Integrity report for task: {}", report.task);
    println!("{}", serde_json::to_string_pretty(&report.checks)?);

    if !report.summary.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", report.summary.warnings.len());
        for warning in &report.summary.warnings {
            println!("  - {}", warning);
        }
    }

    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!();
        println!("Report saved to {}", path.display());
    }

    println!();
    if report.summary.issues.is_empty() {
        println!("No integrity issues found.");
        Ok(())
    } else {
        println!("Issues ({}):", report.summary.issues.len());
        for issue in &report.summary.issues {
            println!("  - {}", issue);
        }
        std::process::exit(1);
    }
}

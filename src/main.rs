// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! vasort: Visual Album Sorter
//!
//! Classifies photos in a local library with a locally hosted vision-language
//! model and sorts matches into albums, in resumable batches.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use vasort::classify::{parse_rules_spec, Classifier};
use vasort::config::{AppConfig, ProviderKind};
use vasort::integrity::IntegrityChecker;
use vasort::library::{album_size, FsLibrary, PhotoLibrary};
use vasort::logging::init_logging;
use vasort::processor::{analyze_work, Processor, RunStatus};
use vasort::providers::{connect_provider, create_provider, list_providers};
use vasort::state::{Checkpoint, DoneLedger};
use vasort::{Result, VasortError};

/// vasort CLI - Visual Album Sorter
#[derive(Parser, Debug)]
#[command(name = "vasort")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Sort photos into albums with a local vision-language model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process the library (default command)
    Run {
        /// Override the configured provider
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Stop after a small number of matches (for testing prompts)
        #[arg(long)]
        debug: bool,

        /// Match count at which debug mode stops
        #[arg(long)]
        debug_limit: Option<usize>,

        /// Override the destination album name
        #[arg(long)]
        album_name: Option<String>,

        /// Classify without touching any album
        #[arg(long)]
        no_album: bool,

        /// Override match rules, e.g. "keyword:dog,puppy" or "regex:^yes"
        #[arg(long, value_name = "SPEC")]
        rules: Option<String>,

        /// Disable per-run diagnostic snapshots
        #[arg(long)]
        no_diagnostics: bool,
    },

    /// Show processing progress and state
    Status,

    /// Report how much work a run would do, without processing
    Analyze {
        /// Prompt to show in the analysis instead of the configured one
        prompt: Option<String>,
    },

    /// Delete checkpoint and done ledger to start over
    Reset {
        /// Required; reset discards all processing progress
        #[arg(long)]
        force: bool,
    },

    /// Check state files, library and album for inconsistencies
    Verify,

    /// Check that the configured model server is reachable
    CheckServer,

    /// List supported providers
    Providers,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve quietly; nothing is subscribed to tracing yet
    let (config, config_source) = AppConfig::resolve_with_source(cli.config.as_deref())?;
    let _guard = init_logging(&config, cli.verbose, cli.quiet)?;

    if !cli.quiet {
        info!("vasort v1.0.0 - Visual Album Sorter");
    }
    config_source.log();

    match cli.command {
        Some(Commands::Run {
            provider,
            batch_size,
            debug,
            debug_limit,
            album_name,
            no_album,
            rules,
            no_diagnostics,
        }) => {
            let mut config = config;
            apply_run_overrides(
                &mut config,
                provider,
                batch_size,
                debug,
                debug_limit,
                album_name,
                rules,
            )?;
            run_processing(config, no_album, !no_diagnostics).await
        }
        Some(Commands::Status) => run_status(config),
        Some(Commands::Analyze { prompt }) => run_analyze(config, prompt),
        Some(Commands::Reset { force }) => run_reset(config, force),
        Some(Commands::Verify) => run_verify(config),
        Some(Commands::CheckServer) => run_check_server(config).await,
        Some(Commands::Providers) => {
            println!("Supported providers:");
            for (name, description) in list_providers() {
                println!("  {:<10} {}", name, description);
            }
            Ok(())
        }
        Some(Commands::Config { action }) => run_config_command(config, action, cli.config),
        None => run_processing(config, false, true).await,
    }
}

fn apply_run_overrides(
    config: &mut AppConfig,
    provider: Option<ProviderKind>,
    batch_size: Option<usize>,
    debug: bool,
    debug_limit: Option<usize>,
    album_name: Option<String>,
    rules: Option<String>,
) -> Result<()> {
    if let Some(kind) = provider {
        info!("Provider overridden to {}", kind);
        config.provider.kind = kind;
    }
    if let Some(size) = batch_size {
        if size == 0 {
            return Err(VasortError::Config("batch size must be at least 1".into()));
        }
        config.processing.batch_size = size;
    }
    if debug {
        config.processing.debug_mode = true;
    }
    if let Some(limit) = debug_limit {
        config.processing.debug_mode = true;
        config.processing.debug_limit = limit;
    }
    if let Some(name) = album_name {
        config.album.name = name;
    }
    if let Some(spec) = rules {
        config.task.rules = parse_rules_spec(&spec)?;
    }
    Ok(())
}

/// Main processing path: connect to the model server, then work through the
/// library in batches.
async fn run_processing(config: AppConfig, no_album: bool, diagnostics: bool) -> Result<()> {
    info!("Task: {}", config.task.name);
    info!("Library: {}", config.library.root.display());

    let provider = connect_provider(&config.provider).await?;
    let classifier = Classifier::new(provider, &config.task)?;
    let library = Box::new(FsLibrary::open(&config.library)?);

    let mut processor = Processor::new(config, classifier, library, diagnostics, no_album)?;
    let summary = processor.process_library().await?;

    println!();
    println!("{}", "=".repeat(50));
    match summary.status {
        RunStatus::UpToDate => println!("Nothing to do - library is up to date"),
        RunStatus::Completed => println!("Processing complete"),
    }
    println!("  Total photos:        {}", summary.total_photos);
    println!("  Previously done:     {}", summary.previously_processed);
    println!("  Processed:           {}", summary.processed_this_session);
    println!("  Matches:             {}", summary.matches_this_session);
    println!("  Errors:              {}", summary.errors_this_session);
    println!("  Skipped:             {}", summary.skipped_this_session);
    println!("  Batches:             {}", summary.batches_processed);
    println!("{}", "=".repeat(50));
    Ok(())
}

fn run_status(config: AppConfig) -> Result<()> {
    let checkpoint = Checkpoint::load(&config.state_path());
    let done = DoneLedger::load(&config.done_path());

    println!("Task: {}", config.task.name);
    println!("Provider: {} ({})", config.provider.kind, config.provider.settings.model);
    println!();
    println!("State:");
    println!("  Checkpoint index:    {}", checkpoint.last_index);
    println!("  Batches processed:   {}", checkpoint.batches_processed);
    println!("  Recorded matches:    {}", checkpoint.matches.len());
    println!("  Recorded errors:     {}", checkpoint.errors);
    println!("  Photos done:         {}", done.len());

    match FsLibrary::open(&config.library) {
        Ok(library) => {
            let total = library.total()?;
            let percent = if total > 0 {
                done.len().min(total) as f64 / total as f64 * 100.0
            } else {
                100.0
            };
            println!();
            println!("Library:");
            println!("  Total photos:        {}", total);
            println!("  Progress:            {:.1}%", percent);
        }
        Err(e) => warn!("Library not accessible: {}", e),
    }

    match album_size(&config.library.albums_dir, &config.album.name) {
        Some(count) => println!("  Album '{}':          {} photos", config.album.name, count),
        None => println!("  Album '{}' does not exist yet", config.album.name),
    }
    Ok(())
}

fn run_analyze(config: AppConfig, prompt: Option<String>) -> Result<()> {
    let library = FsLibrary::open(&config.library)?;
    let photos = library.photos()?;
    let checkpoint = Checkpoint::load(&config.state_path());
    let done = DoneLedger::load(&config.done_path());

    let (to_process, already_processed) = analyze_work(&checkpoint, &done, &photos);

    let batch_size = config.processing.batch_size.max(1);
    let batches = to_process.len().div_ceil(batch_size);
    // Rough planning figure; local VLMs land near this on consumer hardware
    let eta_secs = to_process.len() as f64 * 2.0;

    println!("Work analysis for task: {}", config.task.name);
    println!("  Prompt:              {}", prompt.as_deref().unwrap_or(&config.task.prompt));
    println!("  Total photos:        {}", photos.len());
    println!("  Already processed:   {}", already_processed);
    println!("  Need processing:     {}", to_process.len());
    println!("  Batches ({}/batch):  {}", batch_size, batches);
    println!("  Estimated time:      {:.0} min at ~2s/photo", eta_secs / 60.0);
    Ok(())
}

fn run_reset(config: AppConfig, force: bool) -> Result<()> {
    if !force {
        error!("Reset discards all processing progress. Re-run with --force to confirm.");
        std::process::exit(1);
    }

    for path in [config.state_path(), config.done_path()] {
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!("Removed {}", path.display());
        }
    }
    println!("State reset. The next run will process the whole library.");
    Ok(())
}

fn run_verify(config: AppConfig) -> Result<()> {
    let report = IntegrityChecker::new(config).run_all_checks();

    println!("Integrity check for task: {}", report.task);
    println!("{}", serde_json::to_string_pretty(&report.checks)?);

    if !report.summary.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &report.summary.warnings {
            println!("  - {}", warning);
        }
    }

    if report.summary.issues.is_empty() {
        println!();
        println!("No integrity issues found.");
        Ok(())
    } else {
        println!();
        println!("Issues:");
        for issue in &report.summary.issues {
            println!("  - {}", issue);
        }
        std::process::exit(1);
    }
}

async fn run_check_server(config: AppConfig) -> Result<()> {
    let provider = create_provider(&config.provider)?;
    let info = provider.info().await;

    println!("Provider: {}", info.provider);
    println!("Model:    {}", info.model);
    println!("API URL:  {}", info.api_url);
    if info.available {
        println!("Status:   available");
        Ok(())
    } else {
        println!("Status:   NOT AVAILABLE");
        std::process::exit(1);
    }
}

fn run_config_command(
    config: AppConfig,
    action: ConfigCommands,
    config_path: Option<PathBuf>,
) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(VasortError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    output.display()
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Configuration written to {}", output.display());
            Ok(())
        }
        ConfigCommands::Validate => {
            // resolve() in main already parsed it; validate the semantics
            let classifier_check = Classifier::new(
                Box::new(NullProvider),
                &config.task,
            );
            if let Err(e) = classifier_check {
                return Err(VasortError::Config(format!("Invalid rules: {}", e)));
            }
            if config.processing.batch_size == 0 {
                return Err(VasortError::Config("batch_size must be at least 1".into()));
            }
            match config_path {
                Some(path) => println!("Configuration at {} is valid.", path.display()),
                None => println!("Configuration is valid."),
            }
            Ok(())
        }
    }
}

/// Placeholder provider for validating rules without a server connection
struct NullProvider;

#[async_trait::async_trait]
impl vasort::providers::VisionProvider for NullProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn model(&self) -> &str {
        ""
    }

    fn api_url(&self) -> &str {
        ""
    }

    async fn classify_image(&self, _image_path: &std::path::Path, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn check_server(&self) -> Result<bool> {
        Ok(false)
    }
}

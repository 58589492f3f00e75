//! addon-indexer - command-line entry point.
//!
//! Loads `addons.yaml` and `settings.yaml` from the config directory, indexes every
//! configured addon once, prints progress to stdout, and exits when the run is done.
//!
//! # Execution Flow
//!
//! 1. Parse arguments and load settings
//! 2. Initialize logging → `<log-directory>/addon-indexer.<date>`
//! 3. Create a tokio runtime for the tool subprocesses
//! 4. Start the indexing run on its background thread and wait for it
//! 5. Print the indexed addons and shut the runtime down

use addon_indexer::{
    APP_NAME, AddonIndexer, AddonRegistry, ArmaTools, ConfigManager, HeaderParser, IndexingCallback,
    IndexingEvent, VERSION,
};
use anyhow::{Context, Result, anyhow, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "addon-indexer")]
#[command(version)]
#[command(about = "Extracts, converts and parses game addons into a reference cache")]
struct Cli {
    /// Directory containing addons.yaml and settings.yaml
    #[arg(short, long, default_value = "config")]
    config_dir: Utf8PathBuf,

    /// Project directory substituted for $PROJECT_DIR$ in addons.yaml
    #[arg(short, long)]
    project_dir: Option<Utf8PathBuf>,

    /// Write a plain-text log of the indexing run to this file
    #[arg(short, long)]
    log_file: Option<Utf8PathBuf>,

    /// Arma 3 Tools directory (overrides settings.yaml)
    #[arg(short, long)]
    tools_dir: Option<Utf8PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also write application logs to the console
    #[arg(long)]
    console: bool,
}

/// Prints events to stdout and counts problems for the exit summary
struct ConsoleReporter {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl IndexingCallback for ConsoleReporter {
    fn on_event(&mut self, event: IndexingEvent) {
        match event {
            IndexingEvent::StartedIndex(data) => {
                println!("Indexing {} addons", data.addons.len());
            }
            IndexingEvent::AddonStarted(handle) => println!("[{}] started", handle.addon_name()),
            IndexingEvent::StepStart { handle, step } => {
                println!("[{}] {}...", handle.addon_name(), step)
            }
            IndexingEvent::Warning {
                handle,
                message,
                detail,
            } => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
                println!("[{}] warning: {}", handle.addon_name(), message);
                if let Some(detail) = detail {
                    println!("    {}", detail);
                }
            }
            IndexingEvent::Error {
                handle,
                message,
                detail,
            } => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                let name = handle.as_ref().map_or("run", |h| h.addon_name());
                eprintln!("[{}] error: {}", name, message);
                if let Some(detail) = detail {
                    eprintln!("    {}", detail);
                }
            }
            IndexingEvent::AddonFinished(handle) => println!("[{}] finished", handle.addon_name()),
            IndexingEvent::FinishedIndex => println!("Indexing finished"),
            IndexingEvent::StepFinish { .. }
            | IndexingEvent::Message { .. }
            | IndexingEvent::TotalProgress { .. }
            | IndexingEvent::CurrentProgress { .. } => {}
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let settings = config_manager.load_settings()?;

    let _guard = addon_indexer::logging::setup_logging(
        &settings.log_directory,
        APP_NAME,
        cli.debug || settings.debug_mode,
        cli.console,
    )?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let Some(addons_config) = config_manager.load_addons_config(cli.project_dir.as_deref())? else {
        bail!(
            "No {} found in {}",
            ConfigManager::ADDONS_CONFIG_FILE,
            config_manager.config_dir()
        );
    };

    let tools_dir = cli
        .tools_dir
        .or_else(|| settings.tools_directory.clone())
        .context("No Arma 3 Tools directory configured (use --tools-dir or tools-directory in settings.yaml)")?;

    // Tool subprocesses are driven from the indexer's worker threads via block_on
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("addon-indexer-runtime")
        .build()?;

    let tools = ArmaTools::with_executables(
        tools_dir,
        &settings.extractor,
        &settings.converter,
        runtime.handle().clone(),
    );
    let indexer = AddonIndexer::new(
        AddonRegistry::new(),
        Arc::new(tools),
        Arc::new(HeaderParser::new()),
        settings,
    );

    let reporter = ConsoleReporter {
        warnings: Arc::new(AtomicUsize::new(0)),
        errors: Arc::new(AtomicUsize::new(0)),
    };
    let warnings = Arc::clone(&reporter.warnings);
    let errors = Arc::clone(&reporter.errors);

    let run = indexer
        .load_addons_async(addons_config, cli.log_file, reporter)
        .context("Failed to start the indexing thread")?;
    run.join().map_err(|_| anyhow!("Indexing thread panicked"))?;

    let addons = indexer.addons();
    println!();
    for addon in addons.iter() {
        println!(
            "{}: {} config files, {} macros{}",
            addon.name(),
            addon.config_files().len(),
            addon.define_macros().len(),
            addon
                .reference_directory()
                .map(|dir| format!(" ({})", dir))
                .unwrap_or_default()
        );
    }
    println!(
        "{} addons indexed, {} warnings, {} errors",
        addons.len(),
        warnings.load(Ordering::Relaxed),
        errors.load(Ordering::Relaxed)
    );

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Shutdown complete");
    Ok(())
}

//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use confscout_core::{Pipeline, ProgressReporter, RunOptions, RunSummary};
use confscout_shared::{
    AppConfig, CacheMode, config_file_path, init_config, load_config, load_config_from,
    validate_api_key,
};
use confscout_storage::{DatasetFile, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ConfScout: collect and enrich conference announcements.
#[derive(Parser)]
#[command(
    name = "confscout",
    version,
    about = "Collect conference announcements, enrich them, and keep a deduplicated dataset.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.confscout/confscout.toml).
    #[arg(long, global = true, env = "CONFSCOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch the listing, enrich new announcements, and append them to the dataset.
    Run {
        /// Process every listed announcement, even ones already in the dataset.
        #[arg(long)]
        force_fetch: bool,

        /// Ignore cached enrichment and ask the service again (answers are still cached).
        #[arg(long)]
        force_enrich: bool,

        /// Neither read nor write the enrichment cache.
        #[arg(long, conflicts_with = "force_enrich")]
        no_cache: bool,

        /// Cancel the run after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Write a sorted snapshot of the dataset without sample or trial entries.
    Export {
        /// Output path (defaults to output.export from the config).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Enrichment cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show cache size and recent runs.
    Stats,
    /// Delete every cached enrichment.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const LOG_TARGETS: [&str; 6] = [
    "confscout_cli",
    "confscout_core",
    "confscout_crawler",
    "confscout_discovery",
    "confscout_storage",
    "confscout_shared",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            force_fetch,
            force_enrich,
            no_cache,
            timeout,
        } => {
            let cache_mode = if no_cache {
                CacheMode::Disabled
            } else if force_enrich {
                CacheMode::Refresh
            } else {
                CacheMode::ReadWrite
            };
            let options = RunOptions {
                force_fetch,
                cache_mode,
            };
            cmd_run(config_path, options, timeout.map(Duration::from_secs)).await
        }
        Command::Export { out } => cmd_export(config_path, out),
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats(config_path).await,
            CacheAction::Clear => cmd_cache_clear(config_path).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    options: RunOptions,
    timeout: Option<Duration>,
) -> Result<()> {
    // Validate API key before doing anything
    let config = resolve_config(config_path)?;
    let api_key = validate_api_key(&config)?;

    let cancel = CancellationToken::new();
    let deadline = timeout.or_else(|| config.pipeline.deadline());
    let watcher = tokio::spawn(cancel_on_interrupt(cancel.clone(), deadline));

    info!(
        listing = %config.source.listing_url,
        force_fetch = options.force_fetch,
        cache_mode = ?options.cache_mode,
        deadline_secs = deadline.map(|d| d.as_secs()),
        "starting run"
    );

    let pipeline = Pipeline::from_config(&config, &options, api_key, cancel).await?;
    let reporter = CliProgress::new();
    let result = pipeline.run(&options, &reporter).await;
    watcher.abort();

    match result {
        Ok(summary) => {
            print_summary(&summary, &config);
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            reporter.spinner.finish_and_clear();
            Err(eyre!(
                "run cancelled; nothing was appended (cached enrichment is kept)"
            ))
        }
        Err(e) => {
            reporter.spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

/// Cancel on Ctrl-C or when the deadline passes, whichever comes first.
async fn cancel_on_interrupt(cancel: CancellationToken, deadline: Option<Duration>) {
    let expiry = async {
        match deadline {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => warn!("interrupt received, cancelling run"),
            Err(e) => {
                warn!(error = %e, "cannot listen for interrupts");
                return;
            }
        },
        () = expiry => warn!(?deadline, "run deadline reached, cancelling"),
    }
    cancel.cancel();
}

fn print_summary(summary: &RunSummary, config: &AppConfig) {
    println!();
    println!("  Run complete.");
    println!("  Listed:     {}", summary.listed);
    println!("  New:        {}", summary.candidates);
    println!(
        "  Details:    {} fetched, {} failed",
        summary.details_fetched, summary.detail_failures
    );
    println!(
        "  Enrichment: {} cached, {} fresh, {} not found",
        summary.enriched_from_cache, summary.enriched_from_service, summary.enrichment_degraded
    );
    println!("  Appended:   {}", summary.appended);
    println!("  Dataset:    {}", config.output.dataset);
    println!(
        "  Time:       {:.1}s",
        Duration::from_millis(summary.elapsed_ms).as_secs_f64()
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// export / cache / config
// ---------------------------------------------------------------------------

fn cmd_export(config_path: Option<&Path>, out: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let dataset = DatasetFile::new(&config.output.dataset);
    let out = DatasetFile::new(out.unwrap_or_else(|| PathBuf::from(&config.output.export)));

    let report = confscout_core::export(&dataset, &out)?;
    println!(
        "Exported {} of {} records to {} ({} sample/trial entries dropped)",
        report.written,
        report.total,
        out.path().display(),
        report.dropped
    );
    Ok(())
}

async fn cmd_cache_stats(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(Path::new(&config.cache.path)).await?;

    let stats = storage.cache_stats().await?;
    println!("Cache: {}", config.cache.path);
    println!("  Entries: {}", stats.entries);
    for (model, count) in &stats.by_model {
        println!("    {model}: {count}");
    }

    let runs = storage.recent_runs(5).await?;
    if !runs.is_empty() {
        println!("  Recent runs:");
        for run in runs {
            println!(
                "    {}  {}  {}",
                run.started_at,
                run.outcome.as_deref().unwrap_or("running"),
                run.stats_json.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn cmd_cache_clear(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.cache.path)).await?;
    let removed = storage.clear_cache().await?;
    println!("Removed {removed} cached enrichments from {}", config.cache.path);
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = init_config(config_path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let source = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
}

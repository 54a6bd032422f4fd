//! bpc-gi - Gender identification stage of the bot profile creator
//!
//! Classifies the avatar images of the asset store, records one outcome per
//! key and persists the run result. Downstream profile assignment consumes
//! the exported pools (`pools` subcommand).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use bpc_common::config::{RootFolderInitializer, RootFolderResolver};
use bpc_gi::config::{ClassifierKind, GiConfig, Overrides, MODULE_NAME};
use bpc_gi::models::{AssetKey, Gender, LabelPools, RunResult};
use bpc_gi::services::{
    AssetStore, ClassificationDriver, JsonLinesProgress, ProgressFanOut, ProgressSink,
    ResultLedger, ResumePolicy, TracingProgress,
};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for bpc-gi
#[derive(Parser, Debug)]
#[command(name = "bpc-gi")]
#[command(about = "Gender identification for bot profile avatars")]
#[command(version)]
struct Cli {
    /// Root folder holding assets and results
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Configuration file (default: ~/.config/bpc/bpc-gi.toml)
    #[arg(long, global = true, env = "BPC_GI_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BPC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify the asset store and persist the run result
    Classify(ClassifyArgs),

    /// Load and validate a run result, print its summary
    Inspect {
        /// Result document (default: <root>/results.json)
        results: Option<PathBuf>,
    },

    /// Export the Man/Woman pools of a run result for profile assignment
    Pools {
        /// Result document (default: <root>/results.json)
        results: Option<PathBuf>,

        /// Pools document (default: <root>/pools.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Shift asset keys by an offset before merging a new batch
    Renumber {
        #[arg(long, default_value_t = 0)]
        from: AssetKey,

        #[arg(long)]
        count: AssetKey,

        #[arg(long)]
        offset: AssetKey,

        /// Asset store directory (default: <root>/assets)
        #[arg(long, env = "BPC_GI_ASSETS_DIR")]
        assets_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    /// Asset store directory (default: <root>/assets)
    #[arg(long, env = "BPC_GI_ASSETS_DIR")]
    assets_dir: Option<PathBuf>,

    /// Classify keys 0..count (default: up to the highest key on disk)
    #[arg(long)]
    count: Option<AssetKey>,

    /// Prior run result whose outcomes are carried over
    #[arg(long)]
    resume: Option<PathBuf>,

    /// With --resume, classify the prior run's failed keys again
    #[arg(long, requires = "resume")]
    retry_failed: bool,

    /// Maximum in-flight classifier calls
    #[arg(long, env = "BPC_GI_WORKERS")]
    workers: Option<usize>,

    /// Per-item classifier timeout in seconds
    #[arg(long, env = "BPC_GI_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Classifier backend (deepface, command)
    #[arg(long, env = "BPC_GI_CLASSIFIER")]
    classifier: Option<ClassifierKind>,

    /// DeepFace server URL
    #[arg(long, env = "BPC_GI_ENDPOINT")]
    endpoint: Option<String>,

    /// Program for the command classifier
    #[arg(long, env = "BPC_GI_PROGRAM")]
    program: Option<PathBuf>,

    /// Result document (default: <root>/results.json)
    #[arg(long, env = "BPC_GI_OUTPUT")]
    output: Option<PathBuf>,

    /// JSON-lines progress log
    #[arg(long, env = "BPC_GI_PROGRESS_LOG")]
    progress_log: Option<PathBuf>,

    /// Persist the in-progress result every N assets
    #[arg(long, env = "BPC_GI_CHECKPOINT_INTERVAL")]
    checkpoint_interval: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GiConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_config_path(cli.config.clone())
        .resolve();

    let overrides = match &cli.command {
        Command::Classify(args) => Overrides {
            assets_dir: args.assets_dir.clone(),
            classifier: args.classifier,
            endpoint: args.endpoint.clone(),
            program: args.program.clone(),
            timeout_secs: args.timeout_secs,
            workers: args.workers,
            checkpoint_interval: args.checkpoint_interval,
            output: args.output.clone(),
            progress_log: args.progress_log.clone(),
            log_level: cli.log_level.clone(),
        },
        Command::Renumber { assets_dir, .. } => Overrides {
            assets_dir: assets_dir.clone(),
            log_level: cli.log_level.clone(),
            ..Default::default()
        },
        _ => Overrides {
            log_level: cli.log_level.clone(),
            ..Default::default()
        },
    };
    let config = config.apply(overrides);

    init_tracing(&config).context("Failed to initialize logging")?;

    info!("bpc-gi {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", root_folder.display());

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    match cli.command {
        Command::Classify(args) => classify(&config, &initializer, args).await,
        Command::Inspect { results } => {
            inspect(&results.unwrap_or_else(|| config.output_path(initializer.root_folder())))
        }
        Command::Pools { results, output } => export_pools(
            &config,
            &results.unwrap_or_else(|| config.output_path(initializer.root_folder())),
            &output.unwrap_or_else(|| initializer.pools_path()),
        ),
        Command::Renumber {
            from,
            count,
            offset,
            ..
        } => renumber(&config, &initializer, from, count, offset),
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over the configured level. With `logging.file` set, a
/// second plain-text layer appends to that file.
fn init_tracing(config: &GiConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bpc_gi={0},bpc_common={0}", config.logging.level).into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

async fn classify(
    config: &GiConfig,
    initializer: &RootFolderInitializer,
    args: ClassifyArgs,
) -> Result<()> {
    let assets_dir = config.assets_dir(initializer.root_folder());
    let output = config.output_path(initializer.root_folder());

    let store = AssetStore::open(&assets_dir, config.assets.layout.clone())
        .context("Failed to open asset store")?;
    let classifier = config.classifier.build().context("Failed to create classifier")?;

    let prior = match &args.resume {
        Some(path) => Some(
            ResultLedger::load(path)
                .with_context(|| format!("Failed to load prior result {}", path.display()))?,
        ),
        None => None,
    };
    let policy = if args.retry_failed {
        ResumePolicy::RetryFailed
    } else {
        ResumePolicy::Resume
    };

    let keys: Vec<AssetKey> = store
        .key_range(args.count)
        .context("Failed to list asset keys")?
        .collect();
    if keys.is_empty() {
        warn!(assets = %assets_dir.display(), "No assets to classify");
    }

    let mut progress = ProgressFanOut::new().with(Arc::new(TracingProgress));
    if let Some(path) = &config.run.progress_log {
        let log = JsonLinesProgress::append(path)
            .with_context(|| format!("Failed to open progress log {}", path.display()))?;
        progress = progress.with(Arc::new(log));
    }
    let progress: Arc<dyn ProgressSink> = Arc::new(progress);

    let driver = ClassificationDriver::new(
        store,
        classifier,
        progress,
        config.driver_options(&output),
    );

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let result = driver
        .run_classification(&keys, prior.as_ref().map(|p| (p, policy)), &cancel)
        .await
        .context("Classification run failed")?;
    watcher.abort();

    bpc_gi::services::persist_result(&result, &output)
        .with_context(|| format!("Failed to persist run result to {}", output.display()))?;

    print_summary(&result);
    Ok(())
}

fn inspect(results: &Path) -> Result<()> {
    let result = ResultLedger::load(results)
        .with_context(|| format!("Failed to load run result {}", results.display()))?;
    print_summary(&result);

    let failed = result.failed_keys();
    if !failed.is_empty() {
        println!("Failed keys:");
        for key in failed {
            if let Some(outcome) = result.outcome(key) {
                println!("  {:>6}  {}", key, outcome.summary());
            }
        }
    }
    Ok(())
}

fn export_pools(config: &GiConfig, results: &Path, output: &Path) -> Result<()> {
    let result = ResultLedger::load(results)
        .with_context(|| format!("Failed to load run result {}", results.display()))?;
    let pools = LabelPools::from_result(&result, &config.assets.layout);
    pools
        .persist(output)
        .with_context(|| format!("Failed to write pools to {}", output.display()))?;

    info!(
        men = pools.men_images.len(),
        women = pools.women_images.len(),
        path = %output.display(),
        "Pools exported"
    );
    Ok(())
}

fn renumber(
    config: &GiConfig,
    initializer: &RootFolderInitializer,
    from: AssetKey,
    count: AssetKey,
    offset: AssetKey,
) -> Result<()> {
    let Some(end) = from.checked_add(count) else {
        bail!("Key range {}+{} overflows", from, count);
    };
    let store = AssetStore::open(
        config.assets_dir(initializer.root_folder()),
        config.assets.layout.clone(),
    )
    .context("Failed to open asset store")?;

    let report = store
        .renumber(from..end, offset)
        .context("Failed to renumber assets")?;
    println!(
        "Renamed {} assets, {} keys had no file",
        report.renamed.len(),
        report.missing.len()
    );
    Ok(())
}

fn print_summary(result: &RunResult) {
    let summary = result.summary();
    println!("Run {} ({})", result.run_id(), result.status().as_str());
    println!("  Assets:    {}", result.asset_root().display());
    println!("  Processed: {}", summary.processed);
    println!("  {:<9}{}", format!("{}:", Gender::Man), summary.men);
    println!("  {:<9}{}", format!("{}:", Gender::Woman), summary.women);
    println!("  Other:     {}", summary.other);
    println!("  Failed:    {}", summary.failed);
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight assets");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing in-flight assets");
        },
    }
}

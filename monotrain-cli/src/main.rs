//! Monotrain CLI: run, resume, and inspect training jobs.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Monotrain: epoch-driven training with checkpoint/resume
#[derive(Parser, Debug)]
#[command(name = "monotrain", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./monotrain.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the reference model
    Train(TrainArgs),
    /// Show the contents of a checkpoint artifact
    Inspect {
        /// Path to a checkpoint_epoch_<N> artifact
        artifact: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct TrainArgs {
    /// Exclusive upper bound of the epoch counter
    #[arg(long)]
    max_epoch: Option<usize>,

    /// Checkpoint every N epochs
    #[arg(long)]
    save_frequency: Option<usize>,

    /// Resume from this checkpoint artifact
    #[arg(long, conflicts_with = "resume_latest")]
    resume: Option<PathBuf>,

    /// Resume from the newest artifact in the checkpoint directory
    #[arg(long)]
    resume_latest: bool,

    /// Initialize weights from this checkpoint artifact
    #[arg(long)]
    pretrain: Option<PathBuf>,

    /// Directory receiving checkpoint artifacts
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Samples in the synthetic training set
    #[arg(long, default_value_t = 256)]
    synthetic_samples: usize,

    /// Feature width of the synthetic inputs
    #[arg(long, default_value_t = 8)]
    in_features: usize,

    /// Samples per batch
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured run logs
    let log_dir = directories::ProjectDirs::from("dev", "monotrain", "monotrain")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "monotrain.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, cli.config.as_deref()).await
}

//! timebox CLI — run a simulated training job under a wall-clock time limit.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// timebox: stop training when the clock runs out
#[derive(Parser, Debug)]
#[command(name = "timebox", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (config and checkpoints live under `.timebox/`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

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
    /// Run a simulated training job under the time limit
    Run(RunArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the `[timer]` and `[trainer]` config sections.
#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Time limit as HH:MM:SS
    #[arg(short, long)]
    duration: Option<String>,

    /// When to check the limit: epoch or step
    #[arg(short, long)]
    interval: Option<String>,

    /// Maximum number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Batches per epoch
    #[arg(long)]
    steps_per_epoch: Option<usize>,

    /// Simulated work per step, in milliseconds
    #[arg(long)]
    step_ms: Option<u64>,

    /// Number of ranks to run as threads
    #[arg(long)]
    ranks: Option<usize>,

    /// Resume from the latest checkpoint
    #[arg(long)]
    resume: bool,

    /// Don't log when the time limit is reached
    #[arg(long)]
    quiet_timer: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.timebox/config.toml` into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "timebox", "timebox")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "timebox.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}

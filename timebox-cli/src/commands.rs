//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, RunArgs};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use timebox_core::config::workspace_config_path;
use timebox_core::{TimeboxConfig, TimeboxError, load_config};
use timebox_train::{
    Checkpoint, CheckpointStore, DecisionReducer, LocalGroup, SingleProcess, Timer, Trainer,
    TrainingSummary,
};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let toml_str = toml::to_string_pretty(&TimeboxConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(TimeboxError::from)
                .context("Failed to load config")?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Fold command-line overrides into the loaded configuration.
fn apply_overrides(args: &RunArgs, config: &mut TimeboxConfig) {
    if let Some(duration) = &args.duration {
        config.timer.duration = duration.clone();
    }
    if let Some(interval) = &args.interval {
        config.timer.interval = interval.clone();
    }
    if args.quiet_timer {
        config.timer.verbose = false;
    }
    if let Some(epochs) = args.epochs {
        config.trainer.max_epochs = epochs;
    }
    if let Some(steps) = args.steps_per_epoch {
        config.trainer.steps_per_epoch = steps;
    }
    if let Some(step_ms) = args.step_ms {
        config.trainer.step_delay_ms = step_ms;
    }
    if let Some(ranks) = args.ranks {
        config.trainer.ranks = ranks;
    }
}

/// Loss curve of the simulated job.
fn synthetic_loss(global_step: usize) -> f64 {
    1.0 / (1.0 + 0.01 * global_step as f64)
}

fn handle_run(args: RunArgs, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load_config(Some(workspace), None).map_err(TimeboxError::from)?;
    apply_overrides(&args, &mut config);

    // Fail on a bad duration or interval before any rank starts.
    let timer = Timer::from_config(&config.timer)?;
    tracing::info!(
        limit = %config.timer.duration,
        interval = %timer.interval(),
        ranks = config.trainer.ranks,
        "Starting time-limited run"
    );

    let store = CheckpointStore::new(workspace.join(&config.checkpoint.dir));
    let resume_from = if args.resume {
        let latest = store.latest().context("Failed to load latest checkpoint")?;
        if latest.is_none() {
            tracing::warn!(dir = %store.base_dir().display(), "No checkpoint to resume from");
        }
        latest
    } else {
        None
    };

    let summary = if config.trainer.ranks <= 1 {
        run_rank(
            &config,
            Arc::new(SingleProcess),
            store,
            resume_from.as_ref(),
        )?
    } else {
        let ranks = LocalGroup::new(config.trainer.ranks)?.into_ranks();
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|rank| {
                let config = config.clone();
                let store = store.clone();
                let resume_from = resume_from.clone();
                thread::spawn(move || {
                    run_rank(&config, Arc::new(rank), store, resume_from.as_ref())
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("rank {rank} panicked")))
            })
            .collect();
        first_failure(results)?.swap_remove(0)
    };

    print_summary(&summary);
    Ok(())
}

fn run_rank(
    config: &TimeboxConfig,
    reducer: Arc<dyn DecisionReducer>,
    store: CheckpointStore,
    resume_from: Option<&Checkpoint>,
) -> anyhow::Result<TrainingSummary> {
    let rank = reducer.rank();
    let mut trainer = match build_trainer(config, Arc::clone(&reducer), store, resume_from) {
        Ok(trainer) => trainer,
        Err(e) => {
            // Other ranks may already be waiting on this one in a reduction.
            reducer.abort();
            return Err(e.context(format!("rank {rank} failed to start")));
        }
    };

    let delay = Duration::from_millis(config.trainer.step_delay_ms);
    let steps_per_epoch = config.trainer.steps_per_epoch;
    let summary = trainer.fit(|epoch, step| {
        thread::sleep(delay);
        Ok(synthetic_loss(epoch * steps_per_epoch + step))
    })?;
    Ok(summary)
}

fn build_trainer(
    config: &TimeboxConfig,
    reducer: Arc<dyn DecisionReducer>,
    store: CheckpointStore,
    resume_from: Option<&Checkpoint>,
) -> anyhow::Result<Trainer> {
    let timer = Timer::from_config(&config.timer)?;
    let mut trainer = Trainer::new(config.trainer.clone())
        .with_callback(timer)
        .with_reducer(reducer)
        .with_checkpoint_store(store);
    if let Some(checkpoint) = resume_from {
        trainer.restore(checkpoint).context("Failed to restore checkpoint")?;
    }
    Ok(trainer)
}

/// All summaries in rank order, or the error of the rank that failed first.
///
/// Ranks released by another rank's failure report [`TimeboxError::Aborted`];
/// those are only returned when no rank has a more specific error.
fn first_failure(
    results: Vec<anyhow::Result<TrainingSummary>>,
) -> anyhow::Result<Vec<TrainingSummary>> {
    let is_aborted = |e: &anyhow::Error| {
        matches!(
            e.downcast_ref::<TimeboxError>(),
            Some(TimeboxError::Aborted { .. })
        )
    };
    let mut summaries = Vec::with_capacity(results.len());
    let mut aborted = None;
    for result in results {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) if is_aborted(&e) => {
                aborted.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    match aborted {
        Some(e) => Err(e),
        None => Ok(summaries),
    }
}

fn print_summary(summary: &TrainingSummary) {
    let outcome = if summary.stopped_early {
        "stopped by time limit"
    } else {
        "completed"
    };
    println!("Training {outcome}");
    println!("  Epochs:      {}", summary.epochs_completed);
    println!("  Global step: {}", summary.global_step);
    if let Some(loss) = summary.metrics.last_loss() {
        println!("  Last loss:   {loss:.4}");
    }
    println!(
        "  Run time:    {:.2}s",
        summary.metrics.total_training_time_secs
    );
}

//! Synchronous training loop that drives callbacks.
//!
//! The trainer owns the loop counters and the stop flag, dispatches the
//! lifecycle hooks in order and checkpoints callback state after every epoch.

use crate::callbacks::{CallbackContext, TrainerState, TrainingCallback};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::metrics::TrainingMetrics;
use crate::strategy::{DecisionReducer, SingleProcess};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use timebox_core::{Result, TimeboxError, TrainerConfig};

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Epochs finished so far, including any restored from a checkpoint.
    pub epochs_completed: usize,
    pub global_step: usize,
    /// Whether a callback stopped the run before `max_epochs`.
    pub stopped_early: bool,
    /// Metrics of this run only.
    pub metrics: TrainingMetrics,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    TrainStart,
    BatchEnd,
    EpochEnd,
    TrainEnd,
}

/// Aborts the rank group unless disarmed, so an error or panic that leaves
/// [`Trainer::fit`] never strands the other ranks in a reduction.
struct AbortOnExit {
    reducer: Arc<dyn DecisionReducer>,
    armed: bool,
}

impl Drop for AbortOnExit {
    fn drop(&mut self) {
        if self.armed {
            self.reducer.abort();
        }
    }
}

/// Training loop host.
pub struct Trainer {
    config: TrainerConfig,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    reducer: Arc<dyn DecisionReducer>,
    checkpoints: Option<CheckpointStore>,
    state: TrainerState,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
            reducer: Arc::new(SingleProcess),
            checkpoints: None,
            state: TrainerState::default(),
        }
    }

    /// Use `reducer` to agree on stop decisions with the other ranks.
    pub fn with_reducer(mut self, reducer: Arc<dyn DecisionReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    /// Save a checkpoint to `store` after every epoch (rank zero only).
    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_callback(mut self, callback: impl TrainingCallback + 'static) -> Self {
        self.add_callback(Box::new(callback));
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.push(callback);
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Look up a registered callback by name.
    pub fn callback(&self, name: &str) -> Option<&dyn TrainingCallback> {
        self.callbacks
            .iter()
            .find(|cb| cb.name() == name)
            .map(|cb| cb.as_ref())
    }

    fn dispatch(&mut self, hook: Hook) {
        let reducer = self.reducer.as_ref();
        for cb in &mut self.callbacks {
            let mut ctx = CallbackContext::new(&mut self.state, reducer);
            match hook {
                Hook::TrainStart => cb.on_train_start(&mut ctx),
                Hook::BatchEnd => cb.on_train_batch_end(&mut ctx),
                Hook::EpochEnd => cb.on_train_epoch_end(&mut ctx),
                Hook::TrainEnd => cb.on_train_end(&mut ctx),
            }
        }
    }

    /// Run the loop. `step_fn(epoch, step)` trains one batch and returns its loss.
    ///
    /// An error from `step_fn` aborts the run and is returned as is. Any error
    /// also aborts the rank group; the other ranks then fail with
    /// [`TimeboxError::Aborted`] at their next batch or epoch end.
    pub fn fit<F>(&mut self, step_fn: F) -> Result<TrainingSummary>
    where
        F: FnMut(usize, usize) -> Result<f64>,
    {
        let mut guard = AbortOnExit {
            reducer: Arc::clone(&self.reducer),
            armed: true,
        };
        let summary = self.run_loop(step_fn)?;
        guard.armed = false;
        Ok(summary)
    }

    fn run_loop<F>(&mut self, mut step_fn: F) -> Result<TrainingSummary>
    where
        F: FnMut(usize, usize) -> Result<f64>,
    {
        let started = Instant::now();
        let mut metrics = TrainingMetrics::default();
        self.state.should_stop = false;

        tracing::info!(
            rank = self.reducer.rank(),
            start_epoch = self.state.epoch,
            max_epochs = self.config.max_epochs,
            steps_per_epoch = self.config.steps_per_epoch,
            "Training started"
        );
        self.dispatch(Hook::TrainStart);

        while self.state.epoch < self.config.max_epochs && !self.state.should_stop {
            let epoch = self.state.epoch;
            let mut losses = Vec::with_capacity(self.config.steps_per_epoch);

            for step in 0..self.config.steps_per_epoch {
                losses.push(step_fn(epoch, step)?);
                self.state.global_step += 1;
                self.dispatch(Hook::BatchEnd);
                self.check_group()?;
                if self.state.should_stop {
                    tracing::debug!(epoch, step, "Stop requested mid-epoch");
                    break;
                }
            }

            metrics.record_epoch(&losses);
            self.dispatch(Hook::EpochEnd);
            self.check_group()?;
            self.state.epoch += 1;
            tracing::debug!(
                epoch,
                global_step = self.state.global_step,
                loss = metrics.last_loss(),
                "Epoch finished"
            );
            self.save_checkpoint()?;
        }

        self.dispatch(Hook::TrainEnd);
        metrics.total_training_time_secs = started.elapsed().as_secs_f64();

        let summary = TrainingSummary {
            epochs_completed: self.state.epoch,
            global_step: self.state.global_step,
            stopped_early: self.state.should_stop,
            metrics,
        };
        tracing::info!(
            rank = self.reducer.rank(),
            epochs = summary.epochs_completed,
            global_step = summary.global_step,
            stopped_early = summary.stopped_early,
            "Training finished"
        );
        Ok(summary)
    }

    fn check_group(&self) -> Result<()> {
        if self.reducer.is_aborted() {
            return Err(TimeboxError::Aborted {
                rank: self.reducer.rank(),
            });
        }
        Ok(())
    }

    /// Snapshot the loop counters and every callback's state.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        let mut callbacks = BTreeMap::new();
        for cb in &self.callbacks {
            if let Some(state) = cb.on_save_checkpoint()? {
                callbacks.insert(cb.name().to_string(), state);
            }
        }
        Checkpoint::new(self.state.epoch, self.state.global_step, callbacks)
    }

    fn save_checkpoint(&self) -> Result<()> {
        let Some(store) = &self.checkpoints else {
            return Ok(());
        };
        if !self.reducer.is_global_zero() {
            return Ok(());
        }
        store.save(&self.checkpoint()?)?;
        Ok(())
    }

    /// Resume from `checkpoint`: restore counters and hand each callback its state.
    ///
    /// Callbacks with nothing stored are left untouched.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.verify()?;
        for cb in &mut self.callbacks {
            if let Some(state) = checkpoint.callback_state(cb.name()) {
                cb.on_load_checkpoint(state)?;
            }
        }
        self.state.epoch = checkpoint.epoch;
        self.state.global_step = checkpoint.global_step;
        tracing::info!(
            id = %checkpoint.id,
            epoch = checkpoint.epoch,
            global_step = checkpoint.global_step,
            "Restored from checkpoint"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackState;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Records hook order into a shared log.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        stop_at_step: Option<usize>,
    }

    impl TrainingCallback for Recorder {
        fn name(&self) -> &'static str {
            "Recorder"
        }

        fn on_train_start(&mut self, _ctx: &mut CallbackContext<'_>) {
            self.log.lock().unwrap().push("start".into());
        }

        fn on_train_batch_end(&mut self, ctx: &mut CallbackContext<'_>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("batch {}", ctx.state.global_step));
            if self.stop_at_step == Some(ctx.state.global_step) {
                ctx.state.should_stop = true;
            }
        }

        fn on_train_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("epoch {}", ctx.state.epoch));
        }

        fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) {
            self.log.lock().unwrap().push("end".into());
        }

        fn on_save_checkpoint(&self) -> Result<Option<CallbackState>> {
            let mut state = CallbackState::new();
            state.insert("events".into(), self.log.lock().unwrap().len().into());
            Ok(Some(state))
        }
    }

    fn config(max_epochs: usize, steps_per_epoch: usize) -> TrainerConfig {
        TrainerConfig {
            max_epochs,
            steps_per_epoch,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn test_hook_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut trainer = Trainer::new(config(2, 2)).with_callback(Recorder {
            log: log.clone(),
            stop_at_step: None,
        });

        let summary = trainer.fit(|_, _| Ok(1.0)).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start", "batch 1", "batch 2", "epoch 0", "batch 3", "batch 4", "epoch 1", "end"]
        );
        assert_eq!(summary.epochs_completed, 2);
        assert_eq!(summary.global_step, 4);
        assert!(!summary.stopped_early);
    }

    #[test]
    fn test_stop_mid_epoch_runs_epoch_end_then_exits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut trainer = Trainer::new(config(5, 3)).with_callback(Recorder {
            log: log.clone(),
            stop_at_step: Some(4),
        });

        let summary = trainer.fit(|_, _| Ok(0.5)).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start", "batch 1", "batch 2", "batch 3", "epoch 0", "batch 4", "epoch 1", "end"]
        );
        assert!(summary.stopped_early);
        assert_eq!(summary.global_step, 4);
        assert_eq!(summary.epochs_completed, 2);
    }

    #[test]
    fn test_step_error_propagates() {
        let mut trainer = Trainer::new(config(3, 3));
        let err = trainer
            .fit(|epoch, step| {
                if epoch == 1 && step == 1 {
                    Err(TimeboxError::training("diverged"))
                } else {
                    Ok(0.1)
                }
            })
            .unwrap_err();
        assert!(matches!(err, TimeboxError::Training(_)));
        assert_eq!(trainer.state().global_step, 4);
    }

    #[test]
    fn test_metrics_use_step_losses() {
        let mut trainer = Trainer::new(config(2, 2));
        let summary = trainer
            .fit(|epoch, step| Ok((epoch * 2 + step) as f64))
            .unwrap();
        assert_eq!(summary.metrics.loss_history, vec![0.5, 2.5]);
        assert_eq!(summary.metrics.best_epoch, Some(1));
    }

    #[test]
    fn test_checkpoint_collects_callback_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut trainer = Trainer::new(config(1, 2)).with_callback(Recorder {
            log,
            stop_at_step: None,
        });
        trainer.fit(|_, _| Ok(0.0)).unwrap();

        let checkpoint = trainer.checkpoint().unwrap();
        assert_eq!(checkpoint.epoch, 1);
        assert_eq!(checkpoint.global_step, 2);
        let state = checkpoint.callback_state("Recorder").unwrap();
        assert_eq!(state["events"], serde_json::json!(5));
    }

    #[test]
    fn test_restore_sets_counters() {
        let checkpoint = Checkpoint::new(3, 30, BTreeMap::new()).unwrap();
        let mut trainer = Trainer::new(config(4, 10));
        trainer.restore(&checkpoint).unwrap();
        assert_eq!(trainer.state().epoch, 3);

        let summary = trainer.fit(|_, _| Ok(0.0)).unwrap();
        assert_eq!(summary.epochs_completed, 4);
        assert_eq!(summary.global_step, 40);
        assert_eq!(summary.metrics.epochs_completed, 1);
    }

    /// Single-rank reducer that records aborts.
    #[derive(Default)]
    struct AbortRecorder {
        aborts: AtomicUsize,
        aborted: AtomicBool,
    }

    impl DecisionReducer for AbortRecorder {
        fn reduce_boolean_decision(&self, decision: bool) -> bool {
            decision
        }

        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }

        fn is_aborted(&self) -> bool {
            self.aborted.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_step_error_aborts_the_group() {
        let reducer = Arc::new(AbortRecorder::default());
        let mut trainer = Trainer::new(config(2, 2)).with_reducer(reducer.clone());
        trainer
            .fit(|_, step| {
                if step == 1 {
                    Err(TimeboxError::training("nan loss"))
                } else {
                    Ok(0.1)
                }
            })
            .unwrap_err();
        assert_eq!(reducer.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checkpoint_save_error_aborts_the_group() {
        let dir = TempDir::new().unwrap();
        // A file where the checkpoint directory should be.
        let blocked = dir.path().join("ckpt");
        std::fs::write(&blocked, b"").unwrap();

        let reducer = Arc::new(AbortRecorder::default());
        let mut trainer = Trainer::new(config(2, 1))
            .with_reducer(reducer.clone())
            .with_checkpoint_store(CheckpointStore::new(&blocked));
        assert!(trainer.fit(|_, _| Ok(0.1)).is_err());
        assert_eq!(reducer.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_successful_run_does_not_abort() {
        let reducer = Arc::new(AbortRecorder::default());
        let mut trainer = Trainer::new(config(2, 2)).with_reducer(reducer.clone());
        trainer.fit(|_, _| Ok(0.1)).unwrap();
        assert_eq!(reducer.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_aborted_group_fails_at_next_batch() {
        let reducer = Arc::new(AbortRecorder::default());
        reducer.aborted.store(true, Ordering::SeqCst);
        let mut trainer = Trainer::new(config(3, 3)).with_reducer(reducer.clone());

        let err = trainer.fit(|_, _| Ok(0.1)).unwrap_err();
        assert!(matches!(err, TimeboxError::Aborted { rank: 0 }));
        assert_eq!(trainer.state().global_step, 1);
    }

    #[test]
    fn test_callback_lookup() {
        let trainer = Trainer::new(config(1, 1)).with_callback(Recorder {
            log: Arc::new(Mutex::new(Vec::new())),
            stop_at_step: None,
        });
        assert!(trainer.callback("Recorder").is_some());
        assert!(trainer.callback("Timer").is_none());
    }
}

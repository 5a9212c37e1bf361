//! Training callbacks and the context they run in.
//!
//! A callback hooks into the training loop's lifecycle events. Everything it
//! may touch on the host side (the loop counters, the stop flag and the rank
//! agreement primitive) comes in through [`CallbackContext`].

pub mod timer;

pub use timer::{INTERVAL_CHOICES, Interval, IntoTimeLimit, Timer, parse_duration};

use crate::strategy::DecisionReducer;
use serde::{Deserialize, Serialize};
use timebox_core::Result;

/// Persisted state of one callback, stored in a checkpoint under its name.
pub type CallbackState = serde_json::Map<String, serde_json::Value>;

/// Loop state owned by the trainer and shared with callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerState {
    /// Current epoch (0-indexed).
    pub epoch: usize,
    /// Steps completed across all epochs.
    pub global_step: usize,
    /// Set by callbacks to ask the loop to stop. Never cleared by a callback.
    pub should_stop: bool,
}

/// What a callback sees when a hook fires.
pub struct CallbackContext<'a> {
    pub state: &'a mut TrainerState,
    pub reducer: &'a dyn DecisionReducer,
}

impl<'a> CallbackContext<'a> {
    pub fn new(state: &'a mut TrainerState, reducer: &'a dyn DecisionReducer) -> Self {
        Self { state, reducer }
    }
}

/// Trait for training callbacks.
///
/// All hooks default to no-ops, so an implementation only overrides the
/// events it cares about.
pub trait TrainingCallback: Send {
    /// Name used in logs and as the checkpoint key for this callback's state.
    fn name(&self) -> &'static str;

    /// Called once when the run starts, after any checkpoint was restored.
    fn on_train_start(&mut self, _ctx: &mut CallbackContext<'_>) {}

    /// Called after every training batch.
    fn on_train_batch_end(&mut self, _ctx: &mut CallbackContext<'_>) {}

    /// Called after every training epoch.
    fn on_train_epoch_end(&mut self, _ctx: &mut CallbackContext<'_>) {}

    /// Called once when the run finishes, whether or not it stopped early.
    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) {}

    /// State to persist in a checkpoint, if any.
    fn on_save_checkpoint(&self) -> Result<Option<CallbackState>> {
        Ok(None)
    }

    /// Restore from state previously returned by [`Self::on_save_checkpoint`].
    fn on_load_checkpoint(&mut self, _state: &CallbackState) -> Result<()> {
        Ok(())
    }
}

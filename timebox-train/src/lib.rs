//! # timebox-train — time-limited training loops
//!
//! A [`Timer`](callbacks::Timer) callback that interrupts training once a
//! wall-clock budget is spent, together with the pieces it plugs into:
//!
//! - [`callbacks`] — the callback trait, its context, and the timer itself
//! - [`strategy`] — agreement on stop decisions across ranks
//! - [`trainer`] — a synchronous loop that dispatches lifecycle hooks
//! - [`checkpoint`] — persisted callback state for resume
//! - [`clock`] — injectable time sources

pub mod callbacks;
pub mod checkpoint;
pub mod clock;
pub mod metrics;
pub mod strategy;
pub mod trainer;

pub use callbacks::{
    CallbackContext, CallbackState, Interval, Timer, TrainerState, TrainingCallback,
};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use metrics::TrainingMetrics;
pub use strategy::{DecisionReducer, LocalGroup, LocalRank, SingleProcess};
pub use trainer::{Trainer, TrainingSummary};

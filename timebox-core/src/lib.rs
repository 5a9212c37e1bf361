//! # timebox-core
//!
//! Shared foundation for the timebox crates: the error type, layered
//! configuration loading, and the atomic JSON persistence used for
//! checkpoints.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{CheckpointConfig, TimeboxConfig, TimerConfig, TrainerConfig, load_config};
pub use error::{Result, TimeboxError};

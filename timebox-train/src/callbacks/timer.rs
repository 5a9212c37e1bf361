//! Wall-clock time limit for a training run.
//!
//! The [`Timer`] tracks time spent in the training loop and asks the trainer
//! to stop once the configured limit is reached. Elapsed time survives a
//! checkpoint resume: the saved value becomes the offset of the next run.

use super::{CallbackContext, CallbackState, TrainingCallback};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use timebox_core::{Result, TimeboxError, TimerConfig};

/// Accepted values for the timer interval.
pub const INTERVAL_CHOICES: [&str; 2] = ["epoch", "step"];

/// Checkpoint key holding the elapsed time.
const STATE_KEY: &str = "time_elapsed";

/// When the time limit is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    /// After every training epoch.
    Epoch,
    /// After every training batch.
    #[default]
    Step,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epoch => "epoch",
            Self::Step => "step",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = TimeboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "epoch" => Ok(Self::Epoch),
            "step" => Ok(Self::Step),
            other => Err(TimeboxError::config(format!(
                "Unsupported parameter value `Timer(interval={other})`. Possible choices are: {}",
                INTERVAL_CHOICES.join(", ")
            ))),
        }
    }
}

/// Parse a `HH:MM:SS` time limit.
///
/// Surrounding whitespace is ignored. Fields follow a time-of-day parse, so
/// hours run `00`-`23` and seconds `00`-`59`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let hms = NaiveTime::parse_from_str(input.trim(), "%H:%M:%S")
        .map_err(|e| TimeboxError::invalid_duration(input, e))?;
    // chrono reads `:60` as a leap second, stored as an overflowing nanosecond field.
    if hms.nanosecond() >= 1_000_000_000 {
        return Err(TimeboxError::invalid_duration(input, "second must be in 0..59"));
    }
    Ok(Duration::from_secs(u64::from(hms.num_seconds_from_midnight())))
}

/// Values accepted as a timer duration: `HH:MM:SS` text or a time span.
pub trait IntoTimeLimit {
    fn into_time_limit(self) -> Result<Duration>;
}

impl IntoTimeLimit for Duration {
    fn into_time_limit(self) -> Result<Duration> {
        Ok(self)
    }
}

impl IntoTimeLimit for &str {
    fn into_time_limit(self) -> Result<Duration> {
        parse_duration(self)
    }
}

impl IntoTimeLimit for String {
    fn into_time_limit(self) -> Result<Duration> {
        parse_duration(&self)
    }
}

impl IntoTimeLimit for &String {
    fn into_time_limit(self) -> Result<Duration> {
        parse_duration(self)
    }
}

/// Stops training once a wall-clock time limit is reached.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use timebox_train::callbacks::Timer;
///
/// // Stop after twelve hours, checked after every batch.
/// let timer = Timer::new("12:00:00", "step", true).unwrap();
/// assert_eq!(timer.duration(), Duration::from_secs(12 * 3600));
///
/// assert!(Timer::new("00:10:00", "hourly", true).is_err());
/// ```
pub struct Timer {
    duration: Duration,
    interval: Interval,
    verbose: bool,
    clock: Arc<dyn Clock>,
    start: Option<Instant>,
    start_time: Option<DateTime<Utc>>,
    offset: Duration,
}

impl Timer {
    /// Create a timer.
    ///
    /// Fails with a configuration error if `interval` is neither `epoch` nor
    /// `step`, and with [`TimeboxError::InvalidDuration`] if a duration string
    /// is malformed.
    pub fn new(duration: impl IntoTimeLimit, interval: &str, verbose: bool) -> Result<Self> {
        let duration = duration.into_time_limit()?;
        let interval = interval.parse::<Interval>()?;
        Ok(Self {
            duration,
            interval,
            verbose,
            clock: Arc::new(SystemClock),
            start: None,
            start_time: None,
            offset: Duration::ZERO,
        })
    }

    /// Build a timer from the `[timer]` config section.
    pub fn from_config(config: &TimerConfig) -> Result<Self> {
        Self::new(config.duration.as_str(), &config.interval, config.verbose)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Wall-clock time the current run started, `None` before the run starts.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Time spent training, including time carried over from a checkpoint.
    pub fn time_elapsed(&self) -> Duration {
        match self.start {
            None => self.offset,
            Some(start) => self.offset + self.clock.now().saturating_duration_since(start),
        }
    }

    /// Time left before the limit; zero once it has been reached.
    pub fn time_remaining(&self) -> Duration {
        self.duration.saturating_sub(self.time_elapsed())
    }

    fn check_time_remaining(&self, ctx: &mut CallbackContext<'_>) {
        let should_stop = self.time_elapsed() >= self.duration;
        let should_stop = ctx.reducer.reduce_boolean_decision(should_stop);
        ctx.state.should_stop = ctx.state.should_stop || should_stop;
        if should_stop && self.verbose && ctx.reducer.is_global_zero() {
            tracing::info!(
                elapsed_secs = self.time_elapsed().as_secs_f64(),
                limit_secs = self.duration.as_secs_f64(),
                "Time limit reached. Signaling Trainer to stop."
            );
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("duration", &self.duration)
            .field("interval", &self.interval)
            .field("verbose", &self.verbose)
            .field("start_time", &self.start_time)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl TrainingCallback for Timer {
    fn name(&self) -> &'static str {
        "Timer"
    }

    fn on_train_start(&mut self, _ctx: &mut CallbackContext<'_>) {
        self.start = Some(self.clock.now());
        self.start_time = Some(self.clock.wall_now());
        tracing::debug!(
            offset_secs = self.offset.as_secs_f64(),
            limit_secs = self.duration.as_secs_f64(),
            interval = %self.interval,
            "Timer started"
        );
    }

    fn on_train_batch_end(&mut self, ctx: &mut CallbackContext<'_>) {
        if self.interval != Interval::Step {
            return;
        }
        self.check_time_remaining(ctx);
    }

    fn on_train_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) {
        if self.interval != Interval::Epoch {
            return;
        }
        self.check_time_remaining(ctx);
    }

    fn on_save_checkpoint(&self) -> Result<Option<CallbackState>> {
        let mut state = CallbackState::new();
        state.insert(STATE_KEY.to_string(), serde_json::to_value(self.time_elapsed())?);
        Ok(Some(state))
    }

    fn on_load_checkpoint(&mut self, state: &CallbackState) -> Result<()> {
        self.offset = match state.get(STATE_KEY) {
            None => Duration::ZERO,
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                TimeboxError::checkpoint(format!("invalid `{STATE_KEY}` in Timer state: {e}"))
            })?,
        };
        tracing::debug!(offset_secs = self.offset.as_secs_f64(), "Timer restored");
        Ok(())
    }
}

//! Configuration system for timebox.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/timebox/config.toml` and/or `.timebox/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level timebox configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeboxConfig {
    /// Time limit settings.
    #[serde(default)]
    pub timer: TimerConfig,
    /// Training loop settings.
    #[serde(default)]
    pub trainer: TrainerConfig,
    /// Checkpoint storage settings.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Time limit configuration.
///
/// `interval` is kept as text here and validated when the timer is built,
/// so a bad value is reported with the list of allowed choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Time limit as `HH:MM:SS`.
    #[serde(default = "default_duration")]
    pub duration: String,
    /// When to check the limit: `epoch` or `step`.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Log a notice when the limit is reached.
    #[serde(default = "default_true")]
    pub verbose: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            interval: default_interval(),
            verbose: true,
        }
    }
}

fn default_duration() -> String {
    "00:05:00".to_string()
}

fn default_interval() -> String {
    "step".to_string()
}

/// Training loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Upper bound on epochs when the time limit is never reached.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Batches per epoch.
    #[serde(default = "default_steps_per_epoch")]
    pub steps_per_epoch: usize,
    /// Simulated work per step, in milliseconds (CLI only).
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    /// Number of cooperating ranks.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            steps_per_epoch: default_steps_per_epoch(),
            step_delay_ms: default_step_delay_ms(),
            ranks: default_ranks(),
        }
    }
}

fn default_max_epochs() -> usize {
    10
}

fn default_steps_per_epoch() -> usize {
    100
}

fn default_step_delay_ms() -> u64 {
    10
}

fn default_ranks() -> usize {
    1
}

/// Checkpoint storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory checkpoints are written to, relative to the workspace.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".timebox").join("checkpoints")
}

fn default_true() -> bool {
    true
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TimeboxConfig>,
) -> Result<TimeboxConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TimeboxConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "timebox", "timebox") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            tracing::debug!(path = %user_config.display(), "Loading user config");
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            tracing::debug!(path = %ws_config.display(), "Loading workspace config");
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (TIMEBOX_TIMER__DURATION, TIMEBOX_TRAINER__RANKS, etc.)
    figment = figment.merge(Env::prefixed("TIMEBOX_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".timebox").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TimeboxConfig::default();
        assert_eq!(config.timer.duration, "00:05:00");
        assert_eq!(config.timer.interval, "step");
        assert!(config.timer.verbose);
        assert_eq!(config.trainer.ranks, 1);
        assert_eq!(config.checkpoint.dir, PathBuf::from(".timebox/checkpoints"));
    }

    #[test]
    fn test_workspace_config_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[timer]\nduration = \"01:30:00\"\ninterval = \"epoch\"\n\n[trainer]\nmax_epochs = 3\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.timer.duration, "01:30:00");
        assert_eq!(config.timer.interval, "epoch");
        assert!(config.timer.verbose);
        assert_eq!(config.trainer.max_epochs, 3);
        assert_eq!(config.trainer.steps_per_epoch, 100);
    }

    #[test]
    fn test_explicit_overrides_win() {
        let mut overrides = TimeboxConfig::default();
        overrides.timer.verbose = false;
        overrides.trainer.ranks = 4;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert!(!config.timer.verbose);
        assert_eq!(config.trainer.ranks, 4);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = TimeboxConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TimeboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: TimeboxConfig =
            serde_json::from_str(r#"{"timer": {"interval": "epoch"}}"#).unwrap();
        assert_eq!(parsed.timer.interval, "epoch");
        assert_eq!(parsed.timer.duration, "00:05:00");
        assert_eq!(parsed.trainer, TrainerConfig::default());
    }
}

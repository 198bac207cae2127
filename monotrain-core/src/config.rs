//! Training configuration.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> explicit overrides. The result is validated eagerly so a
//! bad `max_epoch` or `save_frequency` fails before any model is touched.

use crate::error::{Result, TrainError};
use crate::tensor::DevicePreference;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of leading epochs driven by the warmup scheduler, when present.
pub const WARMUP_EPOCHS: usize = 5;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "monotrain.toml";

/// Immutable options that drive loop bounds and checkpoint cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Exclusive upper bound of the epoch counter.
    pub max_epoch: usize,
    /// Write a checkpoint whenever the epoch counter is a multiple of this.
    pub save_frequency: usize,
    /// Seed model weights from this artifact; epoch and optimizer untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrain_model: Option<PathBuf>,
    /// Restore weights, optimizer state, and epoch from this artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_model: Option<PathBuf>,
    /// Directory that receives `checkpoint_epoch_<N>` artifacts.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Base seed for per-epoch data shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Compute unit ids the model is replicated across.
    #[serde(default = "default_compute_units")]
    pub compute_units: Vec<usize>,
    #[serde(default)]
    pub device: DevicePreference,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epoch: 140,
            save_frequency: 10,
            pretrain_model: None,
            resume_model: None,
            checkpoint_dir: default_checkpoint_dir(),
            seed: default_seed(),
            compute_units: default_compute_units(),
            device: DevicePreference::default(),
            schedule: ScheduleConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Build a validated configuration with defaults for everything except
    /// the loop bounds.
    pub fn new(max_epoch: usize, save_frequency: usize) -> Result<Self> {
        let config = Self {
            max_epoch,
            save_frequency,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_resume(mut self, path: impl Into<PathBuf>) -> Self {
        self.resume_model = Some(path.into());
        self
    }

    pub fn with_pretrain(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrain_model = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_epoch == 0 {
            return Err(TrainError::invalid_config("max_epoch must be positive"));
        }
        if self.save_frequency == 0 {
            return Err(TrainError::invalid_config(
                "save_frequency must be positive",
            ));
        }
        if self.compute_units.is_empty() {
            return Err(TrainError::invalid_config(
                "compute_units must name at least one unit",
            ));
        }
        self.schedule.validate()?;
        self.telemetry.validate()
    }

    /// Render as TOML, e.g. for `monotrain config show`.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TrainError::invalid_config(e.to_string()))
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_seed() -> u64 {
    444
}

fn default_compute_units() -> Vec<usize> {
    vec![0]
}

/// Learning-rate schedule parameters for the reference schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_base_lr")]
    pub base_lr: f64,
    /// Multiplicative decay applied at each milestone.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Epoch milestones for step decay.
    #[serde(default = "default_decay_list")]
    pub decay_list: Vec<usize>,
    /// Enable the warmup scheduler for the first epochs.
    #[serde(default = "default_true")]
    pub warmup: bool,
    #[serde(default = "default_warmup_start_lr")]
    pub warmup_start_lr: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_lr: default_base_lr(),
            decay_rate: default_decay_rate(),
            decay_list: default_decay_list(),
            warmup: true,
            warmup_start_lr: default_warmup_start_lr(),
        }
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<()> {
        if !(self.base_lr.is_finite() && self.base_lr > 0.0) {
            return Err(TrainError::invalid_config("schedule.base_lr must be positive"));
        }
        if !(self.decay_rate.is_finite() && self.decay_rate > 0.0) {
            return Err(TrainError::invalid_config(
                "schedule.decay_rate must be positive",
            ));
        }
        if self.warmup_start_lr < 0.0 {
            return Err(TrainError::invalid_config(
                "schedule.warmup_start_lr must not be negative",
            ));
        }
        Ok(())
    }
}

fn default_base_lr() -> f64 {
    0.00125
}

fn default_decay_rate() -> f64 {
    0.1
}

fn default_decay_list() -> Vec<usize> {
    vec![90, 120]
}

fn default_warmup_start_lr() -> f64 {
    0.0
}

fn default_true() -> bool {
    true
}

/// Which telemetry sink receives per-epoch summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    #[default]
    None,
    File,
    Remote,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub kind: TelemetryKind,
    /// JSON-lines output for the `file` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Base URL for the `remote` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        match self.kind {
            TelemetryKind::File if self.path.is_none() => Err(TrainError::invalid_config(
                "telemetry.path is required for the file sink",
            )),
            TelemetryKind::Remote if self.endpoint.is_none() => Err(
                TrainError::invalid_config("telemetry.endpoint is required for the remote sink"),
            ),
            _ => Ok(()),
        }
    }
}

/// Built-in defaults minus `max_epoch` and `save_frequency`, which every
/// loaded configuration must state.
fn defaults_without_bounds() -> Result<serde_json::Value> {
    let mut defaults = serde_json::to_value(TrainingConfig::default())?;
    if let Some(map) = defaults.as_object_mut() {
        map.remove("max_epoch");
        map.remove("save_frequency");
    }
    Ok(defaults)
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (a partial document, e.g. from CLI flags)
/// 2. Environment variables (prefixed with `MONOTRAIN_`, `__` nests)
/// 3. The config file, when it exists
/// 4. Built-in defaults (`max_epoch` and `save_frequency` have none)
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<serde_json::Value>,
) -> Result<TrainingConfig> {
    let mut figment = Figment::from(Serialized::defaults(defaults_without_bounds()?));

    let file = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if file.exists() {
        figment = figment.merge(Toml::file(&file));
    } else if config_file.is_some() {
        return Err(TrainError::invalid_config(format!(
            "config file {} does not exist",
            file.display()
        )));
    }

    // MONOTRAIN_MAX_EPOCH, MONOTRAIN_SCHEDULE__BASE_LR, etc.
    figment = figment.merge(Env::prefixed("MONOTRAIN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainingConfig = figment
        .extract()
        .map_err(|e| TrainError::invalid_config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

//! Error types for the monotrain-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for training operations.
///
/// Every variant is fatal to a training run: nothing in the core retries.
/// Recovery is an operator decision (rerun with `resume_model` pointing at
/// the last good checkpoint).
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Checkpoint artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Corrupt checkpoint artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Statistic series '{name}' has no recorded values")]
    EmptySeries { name: String },

    #[error("Loss statistics are missing term '{0}'")]
    MissingStatistic(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TrainError {
    pub fn missing_artifact(path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact { path: path.into() }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn empty_series(name: impl Into<String>) -> Self {
        Self::EmptySeries { name: name.into() }
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrainError>;

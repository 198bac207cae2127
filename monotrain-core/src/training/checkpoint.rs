//! Checkpoint persistence: save/restore model weights, optimizer state, and
//! the epoch counter.

use crate::config::TrainingConfig;
use crate::error::{Result, TrainError};
use crate::persistence;
use crate::tensor::{ParamStore, StateDict};
use crate::training::collab::Optimizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Bumped whenever the artifact layout changes incompatibly.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const ARTIFACT_PREFIX: &str = "checkpoint_epoch_";

/// A training checkpoint as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub format_version: u32,
    pub epoch: usize,
    pub model_state: StateDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_state: Option<serde_json::Value>,
    /// SHA-256 over the format version, epoch, model state, and optimizer
    /// state.
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl CheckpointState {
    /// Snapshot the current parameters, optimizer state, and epoch.
    pub fn capture(
        params: &ParamStore,
        optimizer: Option<&dyn Optimizer>,
        epoch: usize,
    ) -> Result<Self> {
        let model_state = params.state_dict();
        let optimizer_state = optimizer.map(|opt| opt.state()).transpose()?;
        let digest = compute_digest(
            CHECKPOINT_FORMAT_VERSION,
            epoch,
            &model_state,
            optimizer_state.as_ref(),
        )?;
        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            epoch,
            model_state,
            optimizer_state,
            digest,
            created_at: Utc::now(),
        })
    }

    pub fn verify_digest(&self) -> Result<bool> {
        let digest = compute_digest(
            self.format_version,
            self.epoch,
            &self.model_state,
            self.optimizer_state.as_ref(),
        )?;
        Ok(digest == self.digest)
    }

    pub fn parameter_count(&self) -> usize {
        self.model_state.values().map(|t| t.numel()).sum()
    }
}

fn compute_digest(
    format_version: u32,
    epoch: usize,
    model_state: &StateDict,
    optimizer_state: Option<&serde_json::Value>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(format_version.to_le_bytes());
    hasher.update((epoch as u64).to_le_bytes());
    hasher.update(serde_json::to_vec(model_state)?);
    hasher.update(serde_json::to_vec(&optimizer_state)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Reads and writes checkpoint artifacts under one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/checkpoint_epoch_<epoch>`
    pub fn artifact_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{ARTIFACT_PREFIX}{epoch}"))
    }

    /// Write `state` to `path` atomically, overwriting any existing file.
    pub fn save(path: &Path, state: &CheckpointState) -> Result<()> {
        persistence::atomic_write_json(path, state)?;
        Ok(())
    }

    /// Capture and write the checkpoint for `epoch` under its artifact name.
    pub fn save_epoch(
        &self,
        epoch: usize,
        params: &ParamStore,
        optimizer: &dyn Optimizer,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let state = CheckpointState::capture(params, Some(optimizer), epoch)?;
        let path = self.artifact_path(epoch);
        Self::save(&path, &state)?;
        tracing::info!(epoch, path = %path.display(), "Saved checkpoint");
        Ok(path)
    }

    /// Read and validate an artifact without applying it.
    pub fn read(path: &Path) -> Result<CheckpointState> {
        if !path.is_file() {
            return Err(TrainError::missing_artifact(path));
        }
        let state: CheckpointState = match persistence::load_json(path) {
            Ok(Some(state)) => state,
            Ok(None) => return Err(TrainError::missing_artifact(path)),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(TrainError::corrupt(path, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if state.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(TrainError::corrupt(
                path,
                format!("unsupported format version {}", state.format_version),
            ));
        }
        if !state.verify_digest()? {
            return Err(TrainError::corrupt(path, "digest mismatch"));
        }
        Ok(state)
    }

    /// Restore `params` (and `optimizer`, when given) from an artifact and
    /// return the stored epoch counter.
    ///
    /// Without an optimizer any stored optimizer state is ignored, and the
    /// caller is expected to disregard the returned epoch.
    pub fn load(
        path: &Path,
        params: &mut ParamStore,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<usize> {
        tracing::info!(path = %path.display(), "Loading from checkpoint");
        let state = Self::read(path)?;

        params
            .load_state_dict(&state.model_state)
            .map_err(|e| TrainError::corrupt(path, e.to_string()))?;

        match (optimizer, state.optimizer_state) {
            (Some(opt), Some(opt_state)) => opt
                .load_state(opt_state, params)
                .map_err(|e| TrainError::corrupt(path, e.to_string()))?,
            (Some(_), None) => {
                tracing::warn!(path = %path.display(), "Checkpoint carries no optimizer state");
            }
            (None, Some(_)) => {
                tracing::warn!(path = %path.display(), "Ignoring stored optimizer state");
            }
            (None, None) => {}
        }

        tracing::info!(epoch = state.epoch, "Checkpoint restored");
        Ok(state.epoch)
    }

    /// All artifacts in the directory, ordered by epoch.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let epoch = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(ARTIFACT_PREFIX))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(epoch) = epoch {
                found.push((epoch, path));
            }
        }
        found.sort_by_key(|(epoch, _)| *epoch);
        Ok(found)
    }

    /// The artifact with the highest epoch, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }
}

/// How a session's starting state is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitPlan {
    Fresh,
    /// Seed weights only.
    Pretrain(PathBuf),
    /// Restore weights, optimizer state, and epoch.
    Resume(PathBuf),
}

impl InitPlan {
    /// Pretrain takes precedence when both paths are configured.
    pub fn from_config(config: &TrainingConfig) -> Self {
        if let Some(path) = &config.pretrain_model {
            InitPlan::Pretrain(path.clone())
        } else if let Some(path) = &config.resume_model {
            InitPlan::Resume(path.clone())
        } else {
            InitPlan::Fresh
        }
    }
}

//! Reference collaborators: a linear multi-head model, its loss, SGD, and a
//! synthetic data source. Enough to drive the loop end to end without an
//! external framework.

pub mod data;
pub mod loss;
pub mod model;
pub mod optim;

pub use data::SyntheticDetections;
pub use loss::{MseLoss, MultiTaskMse};
pub use model::{HEAD_TERMS, HeadOutputs, LinearHeads};
pub use optim::Sgd;

use crate::config::TrainingConfig;
use crate::error::Result;
use crate::telemetry::sink_from_config;
use crate::training::scheduler::{LinearWarmupLr, LrScheduler, StepDecayLr};
use crate::training::trainer::TrainerComponents;
use serde::{Deserialize, Serialize};

const MOMENTUM: f32 = 0.9;
const WEIGHT_DECAY: f32 = 1e-5;

/// Size of the synthetic problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticSize {
    pub samples: usize,
    pub in_features: usize,
    pub batch_size: usize,
}

impl Default for SyntheticSize {
    fn default() -> Self {
        Self {
            samples: 256,
            in_features: 8,
            batch_size: 32,
        }
    }
}

/// Wire the reference collaborators for `config`.
pub fn build_components(
    config: &TrainingConfig,
    size: &SyntheticSize,
) -> Result<TrainerComponents<LinearHeads, MultiTaskMse>> {
    let schedule = &config.schedule;
    let warmup_scheduler = schedule
        .warmup
        .then(|| Box::new(LinearWarmupLr::from_config(schedule)) as Box<dyn LrScheduler>);

    Ok(TrainerComponents {
        model: LinearHeads::new(size.in_features, config.seed),
        criterion: MultiTaskMse::default(),
        optimizer: Box::new(Sgd::new(schedule.base_lr, MOMENTUM, WEIGHT_DECAY)),
        train_source: Box::new(SyntheticDetections::generate(
            size.samples,
            size.in_features,
            size.batch_size,
            config.seed,
        )),
        test_source: Some(Box::new(SyntheticDetections::generate(
            (size.samples / 4).max(1),
            size.in_features,
            size.batch_size,
            config.seed.wrapping_add(1),
        ))),
        primary_scheduler: Box::new(StepDecayLr::from_config(schedule)),
        warmup_scheduler,
        sink: sink_from_config(&config.telemetry)?,
    })
}

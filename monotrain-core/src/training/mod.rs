//! Training infrastructure: the epoch loop and the pieces it drives.

pub mod checkpoint;
pub mod collab;
pub mod engine;
pub mod scheduler;
pub mod seed;
pub mod stats;
pub mod trainer;

pub use checkpoint::{CheckpointState, CheckpointStore, InitPlan};
pub use collab::{
    Backward, Batch, BatchStats, Criterion, DataSource, Model, ModelMode, Optimizer, Replicated,
    Targets,
};
pub use engine::{LoopState, TrainingLoop};
pub use scheduler::{LinearWarmupLr, LrScheduler, StepDecayLr};
pub use seed::SeedSchedule;
pub use stats::{EpochStatsAggregator, EpochSummary};
pub use trainer::{Trainer, TrainerComponents};

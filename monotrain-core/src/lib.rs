//! # monotrain-core: epoch-driven training orchestration
//!
//! Separates *how* a model is trained (epoch loop, checkpoint/resume,
//! learning-rate scheduling, statistics reporting) from *what* it computes
//! and *where* its data comes from. Models, losses, optimizers, schedulers,
//! data sources, and telemetry sinks plug in through the traits in
//! [`training::collab`], [`training::scheduler`], and [`telemetry`].
//!
//! Small reference collaborators live in [`reference`]; the CLI uses them
//! for smoke runs and the integration tests drive the loop with them.

pub mod config;
pub mod error;
pub mod persistence;
pub mod reference;
pub mod telemetry;
pub mod tensor;
pub mod training;

pub use config::{TrainingConfig, load_config};
pub use error::TrainError;
pub use tensor::{Device, ParamStore, Tensor};
pub use training::{Trainer, TrainerComponents};

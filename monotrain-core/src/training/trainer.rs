//! Composition root for one training session.

use crate::config::{TrainingConfig, WARMUP_EPOCHS};
use crate::error::Result;
use crate::tensor::Device;
use crate::telemetry::{RunSession, TelemetrySink};
use crate::training::checkpoint::{CheckpointStore, InitPlan};
use crate::training::collab::{Criterion, DataSource, Model, Optimizer, Replicated};
use crate::training::engine::{LoopState, TrainingLoop};
use crate::training::scheduler::{LrScheduler, SchedulerSlot, active_slot};
use crate::training::seed::SeedSchedule;
use crate::training::stats::EpochSummary;

const DEFAULT_PROJECT: &str = "monotrain";

/// Collaborators handed to [`Trainer::new`].
pub struct TrainerComponents<M, C> {
    pub model: M,
    pub criterion: C,
    pub optimizer: Box<dyn Optimizer>,
    pub train_source: Box<dyn DataSource>,
    /// Held for evaluation; the training loop never reads it.
    pub test_source: Option<Box<dyn DataSource>>,
    pub primary_scheduler: Box<dyn LrScheduler>,
    pub warmup_scheduler: Option<Box<dyn LrScheduler>>,
    pub sink: Box<dyn TelemetrySink>,
}

/// Owns cross-epoch state and exposes [`Trainer::run`].
pub struct Trainer<M: Model, C> {
    config: TrainingConfig,
    session: RunSession,
    test_source: Option<Box<dyn DataSource>>,
    engine: TrainingLoop<M, C>,
}

impl<M, C> Trainer<M, C>
where
    M: Model,
    C: Criterion<M::Output>,
{
    /// Build a session: validate config, restore from a pretrain or resume
    /// artifact, place and replicate the model, and start telemetry.
    pub fn new(config: TrainingConfig, components: TrainerComponents<M, C>) -> Result<Self> {
        config.validate()?;

        let TrainerComponents {
            mut model,
            criterion,
            mut optimizer,
            train_source,
            test_source,
            mut primary_scheduler,
            mut warmup_scheduler,
            mut sink,
        } = components;

        let mut start_epoch = 0;
        match InitPlan::from_config(&config) {
            InitPlan::Fresh => {}
            InitPlan::Pretrain(path) => {
                CheckpointStore::load(&path, model.params_mut(), None)?;
            }
            InitPlan::Resume(path) => {
                start_epoch =
                    CheckpointStore::load(&path, model.params_mut(), Some(optimizer.as_mut()))?;
                primary_scheduler.set_last_epoch(start_epoch as i64 - 1);
                if let Some(warmup) = warmup_scheduler.as_mut() {
                    warmup.set_last_epoch(start_epoch.min(WARMUP_EPOCHS) as i64 - 1);
                }
            }
        }

        let device = Device::resolve(
            config.device,
            Device::visible_accelerators(),
            &config.compute_units,
        );
        model.to_device(device);
        let model = model.replicate(&config.compute_units);
        tracing::info!(%device, units = ?config.compute_units, "Model placed");

        let session = RunSession::new(
            config
                .telemetry
                .project
                .clone()
                .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            start_epoch,
            config.max_epoch,
        )
        .with_entity(config.telemetry.entity.clone());
        sink.start(&session)?;

        let lr = match (
            active_slot(start_epoch, warmup_scheduler.is_some()),
            warmup_scheduler.as_ref(),
        ) {
            (SchedulerSlot::Warmup, Some(warmup)) => warmup.current_lr(),
            _ => primary_scheduler.current_lr(),
        };
        optimizer.set_lr(lr);

        let engine = TrainingLoop {
            model,
            criterion,
            optimizer,
            train_source,
            primary: primary_scheduler,
            warmup: warmup_scheduler,
            store: CheckpointStore::new(config.checkpoint_dir.clone()),
            sink,
            seeds: SeedSchedule::new(config.seed),
            device,
            max_epoch: config.max_epoch,
            save_frequency: config.save_frequency,
            current_epoch: start_epoch,
            state: LoopState::Idle,
            last_summary: None,
        };

        Ok(Self {
            config,
            session,
            test_source,
            engine,
        })
    }

    /// Run every remaining epoch. Blocks until `max_epoch` or the first error.
    pub fn run(&mut self) -> Result<()> {
        self.engine.run()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn current_epoch(&self) -> usize {
        self.engine.current_epoch()
    }

    pub fn state(&self) -> LoopState {
        self.engine.state()
    }

    pub fn device(&self) -> Device {
        self.engine.device
    }

    pub fn model(&self) -> &Replicated<M> {
        &self.engine.model
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.engine.optimizer.as_ref()
    }

    pub fn primary_scheduler(&self) -> &dyn LrScheduler {
        self.engine.primary.as_ref()
    }

    pub fn warmup_scheduler(&self) -> Option<&dyn LrScheduler> {
        self.engine.warmup.as_deref()
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.engine.store
    }

    pub fn last_summary(&self) -> Option<&EpochSummary> {
        self.engine.last_summary()
    }

    pub fn test_source(&self) -> Option<&dyn DataSource> {
        self.test_source.as_deref()
    }
}

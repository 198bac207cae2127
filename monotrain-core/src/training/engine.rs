//! The epoch/iteration state machine.

use crate::error::Result;
use crate::tensor::Device;
use crate::telemetry::TelemetrySink;
use crate::training::checkpoint::CheckpointStore;
use crate::training::collab::{
    Backward, Batch, BatchStats, Criterion, DataSource, Model, ModelMode, Optimizer, Replicated,
};
use crate::training::scheduler::{LrScheduler, SchedulerSlot, active_slot};
use crate::training::seed::SeedSchedule;
use crate::training::stats::{EpochStatsAggregator, EpochSummary};

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    RunningEpoch { epoch: usize },
    Advancing,
    Checkpointing,
    Done,
}

/// Drives epochs `[current_epoch, max_epoch)` strictly in order.
///
/// Per epoch: train over the whole data source, reduce and report the
/// statistics, bump the counter, step exactly one scheduler, and checkpoint
/// when the new counter is a multiple of `save_frequency`. Every failure
/// propagates and ends the run.
pub struct TrainingLoop<M: Model, C> {
    pub(crate) model: Replicated<M>,
    pub(crate) criterion: C,
    pub(crate) optimizer: Box<dyn Optimizer>,
    pub(crate) train_source: Box<dyn DataSource>,
    pub(crate) primary: Box<dyn LrScheduler>,
    pub(crate) warmup: Option<Box<dyn LrScheduler>>,
    pub(crate) store: CheckpointStore,
    pub(crate) sink: Box<dyn TelemetrySink>,
    pub(crate) seeds: SeedSchedule,
    pub(crate) device: Device,
    pub(crate) max_epoch: usize,
    pub(crate) save_frequency: usize,
    pub(crate) current_epoch: usize,
    pub(crate) state: LoopState,
    pub(crate) last_summary: Option<EpochSummary>,
}

impl<M, C> TrainingLoop<M, C>
where
    M: Model,
    C: Criterion<M::Output>,
{
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    pub fn last_summary(&self) -> Option<&EpochSummary> {
        self.last_summary.as_ref()
    }

    pub fn run(&mut self) -> Result<()> {
        let start = self.current_epoch;
        tracing::info!(
            start_epoch = start,
            max_epoch = self.max_epoch,
            device = %self.device,
            units = ?self.model.units(),
            "Starting training"
        );

        for epoch in start..self.max_epoch {
            self.transition(LoopState::RunningEpoch { epoch });
            let summary = self.train_one_epoch(epoch)?;

            tracing::info!(
                epoch = epoch + 1,
                max_epoch = self.max_epoch,
                means = ?summary.means,
                "Epoch complete"
            );
            self.sink.log_epoch(epoch + 1, &summary)?;
            self.last_summary = Some(summary);

            self.transition(LoopState::Advancing);
            self.current_epoch += 1;
            let lr = self.advance_scheduler(epoch);
            self.optimizer.set_lr(lr);
            tracing::debug!(epoch = self.current_epoch, lr, "Learning rate updated");

            if self.current_epoch % self.save_frequency == 0 {
                self.transition(LoopState::Checkpointing);
                self.store.save_epoch(
                    self.current_epoch,
                    self.model.params(),
                    self.optimizer.as_ref(),
                )?;
            }
        }

        self.transition(LoopState::Done);
        self.sink.finish()?;
        tracing::info!(epoch = self.current_epoch, "Training finished");
        Ok(())
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, "Loop transition");
        self.state = next;
    }

    fn train_one_epoch(&mut self, epoch: usize) -> Result<EpochSummary> {
        self.model.set_mode(ModelMode::Train);
        let seed = self.seeds.epoch_seed(epoch);
        let total = self.train_source.len();
        let mut stats = EpochStatsAggregator::for_reported_terms();

        for (idx, batch) in self.train_source.batches(seed).enumerate() {
            let batch = batch?.to_device(self.device);
            let batch_stats = train_step(
                &mut self.model,
                &self.criterion,
                self.optimizer.as_mut(),
                &batch,
            )?;
            stats.record_batch(&batch_stats)?;
            tracing::debug!(epoch = epoch + 1, iter = idx + 1, total, "Batch done");
        }

        stats.reduce()
    }

    fn advance_scheduler(&mut self, epoch: usize) -> f64 {
        match (active_slot(epoch, self.warmup.is_some()), self.warmup.as_mut()) {
            (SchedulerSlot::Warmup, Some(warmup)) => warmup.step(),
            _ => self.primary.step(),
        }
    }
}

/// One optimization step: zero grads, forward, loss, backward, step.
fn train_step<M, C>(
    model: &mut Replicated<M>,
    criterion: &C,
    optimizer: &mut dyn Optimizer,
    batch: &Batch,
) -> Result<BatchStats>
where
    M: Model,
    C: Criterion<M::Output>,
{
    optimizer.zero_grad(model.params_mut());
    let outputs = model.forward(&batch.input)?;
    let (loss, stats) = criterion.compute(&outputs, &batch.targets)?;
    loss.backward(model.params_mut())?;
    optimizer.step(model.params_mut())?;
    Ok(stats)
}

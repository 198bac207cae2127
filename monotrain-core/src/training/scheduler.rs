//! Learning-rate schedulers.
//!
//! A scheduler is a cursor over epochs. `last_epoch` is the index of the last
//! completed epoch (`-1` before any), and [`LrScheduler::current_lr`] is the
//! rate for the epoch after it. The loop calls [`LrScheduler::step`] once per
//! epoch on exactly one scheduler and applies the returned rate.

use crate::config::{ScheduleConfig, WARMUP_EPOCHS};

pub trait LrScheduler: Send {
    /// Rate for a 0-based epoch index.
    fn rate_at(&self, epoch: usize) -> f64;

    fn last_epoch(&self) -> i64;

    /// Reposition the cursor, e.g. after restoring a checkpoint.
    fn set_last_epoch(&mut self, last_epoch: i64);

    fn current_lr(&self) -> f64 {
        let next = self.last_epoch() + 1;
        self.rate_at(next.max(0) as usize)
    }

    /// Advance one epoch and return the new current rate.
    fn step(&mut self) -> f64 {
        let next = self.last_epoch() + 1;
        self.set_last_epoch(next);
        self.current_lr()
    }
}

/// Which scheduler owns a given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerSlot {
    Warmup,
    Primary,
}

/// Warmup owns epochs `0..WARMUP_EPOCHS` when configured; primary owns the rest.
pub fn active_slot(epoch: usize, has_warmup: bool) -> SchedulerSlot {
    if has_warmup && epoch < WARMUP_EPOCHS {
        SchedulerSlot::Warmup
    } else {
        SchedulerSlot::Primary
    }
}

/// Multiplies the base rate by `gamma` at each milestone epoch.
///
/// Formula: `lr_e = base_lr * gamma^(milestones <= e)`
#[derive(Debug, Clone)]
pub struct StepDecayLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    last_epoch: i64,
}

impl StepDecayLr {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: -1,
        }
    }

    pub fn from_config(schedule: &ScheduleConfig) -> Self {
        Self::new(
            schedule.base_lr,
            schedule.decay_list.clone(),
            schedule.decay_rate,
        )
    }
}

impl LrScheduler for StepDecayLr {
    fn rate_at(&self, epoch: usize) -> f64 {
        let decays = self.milestones.iter().filter(|m| **m <= epoch).count();
        self.base_lr * self.gamma.powi(decays as i32)
    }

    fn last_epoch(&self) -> i64 {
        self.last_epoch
    }

    fn set_last_epoch(&mut self, last_epoch: i64) {
        self.last_epoch = last_epoch;
    }
}

/// Linearly ramps from `start_lr` to `target_lr` over `warmup_epochs`.
///
/// Formula: `lr_e = start + (target - start) * min(1, e / warmup_epochs)`
#[derive(Debug, Clone)]
pub struct LinearWarmupLr {
    start_lr: f64,
    target_lr: f64,
    warmup_epochs: usize,
    last_epoch: i64,
}

impl LinearWarmupLr {
    pub fn new(start_lr: f64, target_lr: f64, warmup_epochs: usize) -> Self {
        Self {
            start_lr,
            target_lr,
            warmup_epochs,
            last_epoch: -1,
        }
    }

    pub fn from_config(schedule: &ScheduleConfig) -> Self {
        Self::new(schedule.warmup_start_lr, schedule.base_lr, WARMUP_EPOCHS)
    }
}

impl LrScheduler for LinearWarmupLr {
    fn rate_at(&self, epoch: usize) -> f64 {
        if self.warmup_epochs == 0 {
            return self.target_lr;
        }
        let progress = (epoch as f64 / self.warmup_epochs as f64).min(1.0);
        self.start_lr + (self.target_lr - self.start_lr) * progress
    }

    fn last_epoch(&self) -> i64 {
        self.last_epoch
    }

    fn set_last_epoch(&mut self, last_epoch: i64) {
        self.last_epoch = last_epoch;
    }
}

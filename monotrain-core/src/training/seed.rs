//! Seed management for reproducible per-epoch shuffling.
//!
//! Seeds are passed explicitly to [`DataSource::batches`]; nothing touches a
//! process-wide random state.
//!
//! [`DataSource::batches`]: crate::training::collab::DataSource::batches

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSchedule {
    pub base_seed: u64,
}

impl SeedSchedule {
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed }
    }

    /// Shuffle seed for an epoch. Distinct per epoch, and identical for the
    /// same `(base_seed, epoch)` whether the run was resumed or not.
    pub fn epoch_seed(&self, epoch: usize) -> u64 {
        self.base_seed.wrapping_add(epoch as u64)
    }
}

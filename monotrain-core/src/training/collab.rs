//! Collaborator contracts consumed by the training loop.
//!
//! The loop knows nothing about architectures, loss formulas, or where data
//! comes from. It drives these traits in a fixed order per batch:
//! zero grads, forward, loss, backward, step.

use crate::error::Result;
use crate::tensor::{Device, ParamStore, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Forward-pass behaviour switch (normalization, dropout, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    #[default]
    Train,
    Eval,
}

/// A stateful function from an input batch to an output structure, with
/// trainable parameters.
pub trait Model: Send {
    type Output;

    fn forward(&mut self, input: &Tensor) -> Result<Self::Output>;

    fn params(&self) -> &ParamStore;

    fn params_mut(&mut self) -> &mut ParamStore;

    fn mode(&self) -> ModelMode;

    fn set_mode(&mut self, mode: ModelMode);

    fn to_device(&mut self, device: Device) {
        self.params_mut().to_device(device);
    }

    /// Fan the model out across compute units. The loop only ever sees the
    /// returned wrapper, whatever the unit count.
    fn replicate(self, units: &[usize]) -> Replicated<Self>
    where
        Self: Sized,
    {
        Replicated {
            module: self,
            units: units.to_vec(),
        }
    }
}

/// A model replicated across compute units.
///
/// Fan-out is internal: one logical forward/backward/step per batch. The
/// wrapped module owns the parameters, so checkpoints are written from
/// [`Replicated::module`] without any unit-specific naming.
#[derive(Debug)]
pub struct Replicated<M> {
    module: M,
    units: Vec<usize>,
}

impl<M> Replicated<M> {
    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn units(&self) -> &[usize] {
        &self.units
    }

    pub fn into_inner(self) -> M {
        self.module
    }
}

impl<M: Model> Model for Replicated<M> {
    type Output = M::Output;

    fn forward(&mut self, input: &Tensor) -> Result<Self::Output> {
        self.module.forward(input)
    }

    fn params(&self) -> &ParamStore {
        self.module.params()
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        self.module.params_mut()
    }

    fn mode(&self) -> ModelMode {
        self.module.mode()
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.module.set_mode(mode);
    }

    fn to_device(&mut self, device: Device) {
        self.module.to_device(device);
    }
}

/// Named target tensors for one batch.
pub type Targets = BTreeMap<String, Tensor>;

/// Named scalar statistics produced by the loss for one batch.
pub type BatchStats = BTreeMap<String, f64>;

/// One (input, targets) pair drawn from a data source.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input: Tensor,
    pub targets: Targets,
    /// Per-sample metadata the loader passes through untouched.
    pub info: Option<serde_json::Value>,
}

impl Batch {
    pub fn new(input: Tensor, targets: Targets) -> Self {
        Self {
            input,
            targets,
            info: None,
        }
    }

    /// Move the input and every target onto `device`.
    pub fn to_device(self, device: Device) -> Self {
        Self {
            input: self.input.to_device(device),
            targets: self
                .targets
                .into_iter()
                .map(|(name, t)| (name, t.to_device(device)))
                .collect(),
            info: self.info,
        }
    }
}

/// A scalar loss that can propagate gradients into the parameters.
pub trait Backward {
    fn value(&self) -> f64;

    /// Accumulate gradients of this loss into `params`.
    fn backward(&self, params: &mut ParamStore) -> Result<()>;
}

/// Maps `(outputs, targets)` to a total loss and named per-term statistics.
pub trait Criterion<O> {
    type Loss: Backward;

    fn compute(&self, outputs: &O, targets: &Targets) -> Result<(Self::Loss, BatchStats)>;
}

/// Consumes gradients and mutates parameters.
pub trait Optimizer: Send {
    fn zero_grad(&mut self, params: &mut ParamStore) {
        params.zero_grad();
    }

    fn step(&mut self, params: &mut ParamStore) -> Result<()>;

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    /// Internal per-parameter statistics, persisted with checkpoints.
    fn state(&self) -> Result<serde_json::Value>;

    /// Restore state produced by [`Optimizer::state`]. Per-parameter buffers
    /// must match the names and sizes in `params`.
    fn load_state(&mut self, state: serde_json::Value, params: &ParamStore) -> Result<()>;
}

/// A finite, restartable sequence of batches.
pub trait DataSource: Send {
    /// Batches per epoch, for progress reporting.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate one epoch. Shuffling, if any, is driven only by `seed`.
    fn batches(&mut self, seed: u64) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity {
        params: ParamStore,
        mode: ModelMode,
    }

    impl Model for Identity {
        type Output = Tensor;

        fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
            Ok(input.clone())
        }

        fn params(&self) -> &ParamStore {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamStore {
            &mut self.params
        }

        fn mode(&self) -> ModelMode {
            self.mode
        }

        fn set_mode(&mut self, mode: ModelMode) {
            self.mode = mode;
        }
    }

    #[test]
    fn test_replicated_delegates() {
        let mut params = ParamStore::new();
        params.insert("w", Tensor::zeros(vec![2]));
        let model = Identity {
            params,
            mode: ModelMode::Eval,
        };

        let mut replicated = model.replicate(&[0, 1]);
        assert_eq!(replicated.units(), &[0, 1]);

        replicated.set_mode(ModelMode::Train);
        assert_eq!(replicated.module().mode, ModelMode::Train);

        replicated.to_device(Device::Accelerator(0));
        assert_eq!(
            replicated.params().get("w").unwrap().device(),
            Device::Accelerator(0)
        );

        let out = replicated.forward(&Tensor::zeros(vec![3])).unwrap();
        assert_eq!(out.numel(), 3);
    }

    #[test]
    fn test_batch_to_device_moves_targets() {
        let mut targets = Targets::new();
        targets.insert("depth".into(), Tensor::zeros(vec![4, 1]));
        let batch =
            Batch::new(Tensor::zeros(vec![4, 2]), targets).to_device(Device::Accelerator(1));

        assert_eq!(batch.input.device(), Device::Accelerator(1));
        assert_eq!(batch.targets["depth"].device(), Device::Accelerator(1));
    }
}

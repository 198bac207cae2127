//! Dense tensors, compute devices, and named parameter storage.
//!
//! The loop never does arithmetic on tensors itself. It moves them between
//! devices, hands them to collaborators, and persists parameter values.

use crate::error::{Result, TrainError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A compute device. Selected once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(usize),
}

impl Device {
    /// Resolve the run's device from a preference and the number of visible
    /// accelerators. `Auto` picks the first configured compute unit when any
    /// accelerator is visible, otherwise falls back to the CPU.
    pub fn resolve(preference: DevicePreference, visible: usize, units: &[usize]) -> Self {
        match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Auto if visible > 0 => {
                Device::Accelerator(units.first().copied().unwrap_or(0))
            }
            DevicePreference::Auto => Device::Cpu,
        }
    }

    /// Count accelerators visible to this process via `CUDA_VISIBLE_DEVICES`.
    pub fn visible_accelerators() -> usize {
        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty() && *id != "-1")
                .count(),
            Err(_) => 0,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(id) => write!(f, "accel:{id}"),
        }
    }
}

/// Device selection preference from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
}

/// A dense row-major `f32` tensor tagged with the device it lives on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    #[serde(skip)]
    device: Device,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TrainError::model(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self {
            shape,
            data,
            device: Device::Cpu,
        })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
            device: Device::Cpu,
        }
    }

    /// Build a tensor whose `i`-th flat element is `f(i)`.
    pub fn from_fn(shape: Vec<usize>, f: impl FnMut(usize) -> f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: (0..len).map(f).collect(),
            device: Device::Cpu,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Move to `device`, consuming the tensor.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Leading dimension, or 0 for a scalar.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }
}

/// Named parameter values, i.e. a model's persisted weights.
pub type StateDict = BTreeMap<String, Tensor>;

/// Trainable parameters and their accumulated gradients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    values: StateDict,
    grads: StateDict,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter with a zeroed gradient of the same shape.
    pub fn insert(&mut self, name: impl Into<String>, value: Tensor) {
        let name = name.into();
        let grad = Tensor::zeros(value.shape().to_vec()).to_device(value.device());
        self.grads.insert(name.clone(), grad);
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.values.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.values.get_mut(name)
    }

    pub fn grad(&self, name: &str) -> Option<&Tensor> {
        self.grads.get(name)
    }

    pub fn grad_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.grads.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn numel(&self) -> usize {
        self.values.values().map(Tensor::numel).sum()
    }

    /// Iterate `(name, value, grad)` triples mutably, as an optimizer step does.
    pub fn iter_with_grads_mut(&mut self) -> impl Iterator<Item = (&str, &mut Tensor, &Tensor)> {
        let grads = &self.grads;
        self.values
            .iter_mut()
            .filter_map(move |(name, value)| grads.get(name).map(|g| (name.as_str(), value, g)))
    }

    pub fn zero_grad(&mut self) {
        self.grads.values_mut().for_each(|g| g.fill(0.0));
    }

    pub fn to_device(&mut self, device: Device) {
        for tensor in self.values.values_mut().chain(self.grads.values_mut()) {
            tensor.device = device;
        }
    }

    /// Snapshot of parameter values.
    pub fn state_dict(&self) -> StateDict {
        self.values.clone()
    }

    /// Copy values from `state` into the registered parameters.
    ///
    /// Every registered parameter must be present with an identical shape.
    /// Entries in `state` that are not registered are rejected too, so a
    /// checkpoint from a different architecture never half-loads. Values keep
    /// the device of the parameter they replace.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for (name, current) in &self.values {
            let incoming = state
                .get(name)
                .ok_or_else(|| TrainError::model(format!("missing parameter '{name}'")))?;
            if incoming.shape() != current.shape() {
                return Err(TrainError::model(format!(
                    "parameter '{name}' has shape {:?}, expected {:?}",
                    incoming.shape(),
                    current.shape()
                )));
            }
        }
        if let Some(extra) = state.keys().find(|k| !self.values.contains_key(*k)) {
            return Err(TrainError::model(format!("unexpected parameter '{extra}'")));
        }

        for (name, current) in self.values.iter_mut() {
            if let Some(incoming) = state.get(name) {
                current.data.copy_from_slice(incoming.data());
            }
        }
        Ok(())
    }
}

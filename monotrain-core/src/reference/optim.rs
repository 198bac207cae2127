//! Stochastic gradient descent with momentum and L2 weight decay.

use crate::error::{Result, TrainError};
use crate::tensor::ParamStore;
use crate::training::collab::Optimizer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SgdState {
    steps: u64,
    velocity: BTreeMap<String, Vec<f32>>,
}

/// `v ← μ·v + (g + λ·θ)`, `θ ← θ − lr·v`
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f32,
    weight_decay: f32,
    velocity: BTreeMap<String, Vec<f32>>,
    steps: u64,
}

impl Sgd {
    pub fn new(lr: f64, momentum: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: BTreeMap::new(),
            steps: 0,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut ParamStore) -> Result<()> {
        let lr = self.lr as f32;
        for (name, value, grad) in params.iter_with_grads_mut() {
            let velocity = self
                .velocity
                .entry(name.to_string())
                .or_insert_with(|| vec![0.0; value.numel()]);
            if velocity.len() != value.numel() {
                return Err(TrainError::compute(format!(
                    "momentum buffer for '{name}' has {} values, parameter has {}",
                    velocity.len(),
                    value.numel()
                )));
            }

            for ((theta, g), v) in value
                .data_mut()
                .iter_mut()
                .zip(grad.data())
                .zip(velocity.iter_mut())
            {
                let g = g + self.weight_decay * *theta;
                *v = self.momentum * *v + g;
                *theta -= lr * *v;
            }
        }
        self.steps += 1;
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(SgdState {
            steps: self.steps,
            velocity: self.velocity.clone(),
        })?)
    }

    fn load_state(&mut self, state: serde_json::Value, params: &ParamStore) -> Result<()> {
        let state: SgdState = serde_json::from_value(state)?;
        for (name, velocity) in &state.velocity {
            let value = params.get(name).ok_or_else(|| {
                TrainError::model(format!("momentum buffer for unknown parameter '{name}'"))
            })?;
            if velocity.len() != value.numel() {
                return Err(TrainError::model(format!(
                    "momentum buffer for '{name}' has {} values, parameter has {}",
                    velocity.len(),
                    value.numel()
                )));
            }
        }
        self.steps = state.steps;
        self.velocity = state.velocity;
        Ok(())
    }
}

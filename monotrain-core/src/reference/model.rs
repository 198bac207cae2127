//! A linear model with one scalar head per loss term.

use crate::error::{Result, TrainError};
use crate::tensor::{ParamStore, Tensor};
use crate::training::collab::{Model, ModelMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Target names, one per output column.
pub const HEAD_TERMS: [&str; 5] = ["seg", "size2d", "depth", "size3d", "heading"];

pub const WEIGHT: &str = "head.weight";
pub const BIAS: &str = "head.bias";

/// Predictions plus the input they were computed from, which the loss needs
/// for the backward pass.
#[derive(Debug, Clone)]
pub struct HeadOutputs {
    pub input: Tensor,
    /// `[batch, HEAD_TERMS.len()]`
    pub preds: Tensor,
}

/// `preds = input · Wᵀ + b`, with `W: [heads, in_features]`.
#[derive(Debug, Clone)]
pub struct LinearHeads {
    in_features: usize,
    params: ParamStore,
    mode: ModelMode,
}

impl LinearHeads {
    /// Uniform init in `±1/sqrt(in_features)`, deterministic in `seed`.
    pub fn new(in_features: usize, seed: u64) -> Self {
        let heads = HEAD_TERMS.len();
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let weight = Tensor::from_fn(vec![heads, in_features], |_| {
            rng.gen_range(-bound..=bound)
        });

        let mut params = ParamStore::new();
        params.insert(WEIGHT, weight);
        params.insert(BIAS, Tensor::zeros(vec![heads]));
        Self {
            in_features,
            params,
            mode: ModelMode::Train,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }
}

impl Model for LinearHeads {
    type Output = HeadOutputs;

    fn forward(&mut self, input: &Tensor) -> Result<HeadOutputs> {
        if input.shape().len() != 2 || input.shape()[1] != self.in_features {
            return Err(TrainError::compute(format!(
                "expected input [batch, {}], got {:?}",
                self.in_features,
                input.shape()
            )));
        }
        let rows = input.rows();
        let heads = HEAD_TERMS.len();
        let weight = self.params.get(WEIGHT).map(Tensor::data).unwrap_or(&[]);
        let bias = self.params.get(BIAS).map(Tensor::data).unwrap_or(&[]);
        if weight.len() != heads * self.in_features || bias.len() != heads {
            return Err(TrainError::model("head parameters are not registered"));
        }

        let x = input.data();
        let mut preds = vec![0.0f32; rows * heads];
        for i in 0..rows {
            let xi = &x[i * self.in_features..(i + 1) * self.in_features];
            for k in 0..heads {
                let wk = &weight[k * self.in_features..(k + 1) * self.in_features];
                let dot: f32 = xi.iter().zip(wk).map(|(a, b)| a * b).sum();
                preds[i * heads + k] = dot + bias[k];
            }
        }

        Ok(HeadOutputs {
            input: input.clone(),
            preds: Tensor::new(vec![rows, heads], preds)?.to_device(input.device()),
        })
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

//! In-memory synthetic detection targets.
//!
//! Each sample is a feature vector plus one scalar per head, generated from a
//! fixed hidden linear map so the reference model can actually fit it.

use crate::error::Result;
use crate::reference::model::HEAD_TERMS;
use crate::tensor::Tensor;
use crate::training::collab::{Batch, DataSource, Targets};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticDetections {
    in_features: usize,
    batch_size: usize,
    /// `[samples, in_features]`, row-major
    features: Vec<f32>,
    /// `[samples, heads]`, row-major
    targets: Vec<f32>,
}

impl SyntheticDetections {
    pub fn generate(samples: usize, in_features: usize, batch_size: usize, seed: u64) -> Self {
        let heads = HEAD_TERMS.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let hidden: Vec<f32> = (0..heads * in_features)
            .map(|_| rng.gen_range(-1.0f32..=1.0))
            .collect();
        let features: Vec<f32> = (0..samples * in_features)
            .map(|_| rng.gen_range(-1.0f32..=1.0))
            .collect();

        let mut targets = Vec::with_capacity(samples * heads);
        for x in features.chunks(in_features.max(1)).take(samples) {
            for w in hidden.chunks(in_features.max(1)) {
                let noise = rng.gen_range(-0.01f32..=0.01);
                targets.push(x.iter().zip(w).map(|(a, b)| a * b).sum::<f32>() + noise);
            }
        }

        Self {
            in_features,
            batch_size: batch_size.max(1),
            features,
            targets,
        }
    }

    pub fn samples(&self) -> usize {
        self.targets.len() / HEAD_TERMS.len()
    }

    fn gather(&self, indices: &[usize]) -> Result<Batch> {
        let heads = HEAD_TERMS.len();
        let d = self.in_features;
        let rows = indices.len();

        let mut input = Vec::with_capacity(rows * d);
        for &i in indices {
            input.extend_from_slice(&self.features[i * d..(i + 1) * d]);
        }

        let mut targets = Targets::new();
        for (k, name) in HEAD_TERMS.iter().enumerate() {
            let column = indices.iter().map(|&i| self.targets[i * heads + k]).collect();
            targets.insert((*name).to_string(), Tensor::new(vec![rows, 1], column)?);
        }

        let mut batch = Batch::new(Tensor::new(vec![rows, d], input)?, targets);
        batch.info = Some(serde_json::json!({ "indices": indices }));
        Ok(batch)
    }
}

impl DataSource for SyntheticDetections {
    fn len(&self) -> usize {
        self.samples().div_ceil(self.batch_size)
    }

    fn batches(&mut self, seed: u64) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut order: Vec<usize> = (0..self.samples()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let batch_size = self.batch_size;
        let this = &*self;
        Box::new((0..self.len()).map(move |b| {
            let end = ((b + 1) * batch_size).min(order.len());
            this.gather(&order[b * batch_size..end])
        }))
    }
}

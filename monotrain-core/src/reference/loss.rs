//! Multi-task mean-squared error over the linear heads.

use crate::error::{Result, TrainError};
use crate::reference::model::{BIAS, HEAD_TERMS, HeadOutputs, WEIGHT};
use crate::tensor::ParamStore;
use crate::training::collab::{Backward, BatchStats, Criterion, Targets};

/// `total = Σ_k w_k · mean_i (pred_ik − target_ik)²`
///
/// Per-term statistics are reported under the target names in [`HEAD_TERMS`].
#[derive(Debug, Clone)]
pub struct MultiTaskMse {
    weights: [f64; HEAD_TERMS.len()],
}

impl Default for MultiTaskMse {
    fn default() -> Self {
        Self {
            weights: [1.0; HEAD_TERMS.len()],
        }
    }
}

impl MultiTaskMse {
    pub fn with_weights(weights: [f64; HEAD_TERMS.len()]) -> Self {
        Self { weights }
    }
}

/// Loss value with the cached activations needed for backward.
#[derive(Debug, Clone)]
pub struct MseLoss {
    value: f64,
    input: Vec<f32>,
    in_features: usize,
    /// d(total)/d(pred), `[batch, heads]`
    dpred: Vec<f32>,
}

impl Backward for MseLoss {
    fn value(&self) -> f64 {
        self.value
    }

    fn backward(&self, params: &mut ParamStore) -> Result<()> {
        let heads = HEAD_TERMS.len();
        let rows = self.dpred.len() / heads;
        let d = self.in_features;

        let weight_grad = params
            .grad_mut(WEIGHT)
            .ok_or_else(|| TrainError::model("no gradient slot for head.weight"))?
            .data_mut();
        for i in 0..rows {
            let xi = &self.input[i * d..(i + 1) * d];
            for k in 0..heads {
                let g = self.dpred[i * heads + k];
                for (w, x) in weight_grad[k * d..(k + 1) * d].iter_mut().zip(xi) {
                    *w += g * x;
                }
            }
        }

        let bias_grad = params
            .grad_mut(BIAS)
            .ok_or_else(|| TrainError::model("no gradient slot for head.bias"))?
            .data_mut();
        for i in 0..rows {
            for (k, b) in bias_grad.iter_mut().enumerate() {
                *b += self.dpred[i * heads + k];
            }
        }
        Ok(())
    }
}

impl Criterion<HeadOutputs> for MultiTaskMse {
    type Loss = MseLoss;

    fn compute(&self, outputs: &HeadOutputs, targets: &Targets) -> Result<(MseLoss, BatchStats)> {
        let heads = HEAD_TERMS.len();
        let rows = outputs.preds.rows();
        if rows == 0 {
            return Err(TrainError::compute("empty batch"));
        }
        let preds = outputs.preds.data();

        let mut stats = BatchStats::new();
        let mut dpred = vec![0.0f32; rows * heads];
        let mut total = 0.0f64;
        for (k, name) in HEAD_TERMS.iter().enumerate() {
            let target = targets
                .get(*name)
                .ok_or_else(|| TrainError::compute(format!("missing target '{name}'")))?;
            if target.numel() != rows {
                return Err(TrainError::compute(format!(
                    "target '{name}' has {} values for {rows} rows",
                    target.numel()
                )));
            }

            let mut sq = 0.0f64;
            for (i, t) in target.data().iter().enumerate() {
                let diff = preds[i * heads + k] - t;
                sq += f64::from(diff * diff);
                dpred[i * heads + k] = (2.0 * self.weights[k] / rows as f64) as f32 * diff;
            }
            let mse = sq / rows as f64;
            total += self.weights[k] * mse;
            stats.insert((*name).to_string(), mse);
        }

        if !total.is_finite() {
            return Err(TrainError::compute(format!("non-finite loss {total}")));
        }

        let loss = MseLoss {
            value: total,
            input: outputs.input.data().to_vec(),
            in_features: outputs.input.shape().get(1).copied().unwrap_or(0),
            dpred,
        };
        Ok((loss, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::model::LinearHeads;
    use crate::tensor::Tensor;
    use crate::training::collab::Model;

    fn targets(rows: usize, value: f32) -> Targets {
        HEAD_TERMS
            .iter()
            .map(|n| (n.to_string(), Tensor::new(vec![rows, 1], vec![value; rows]).unwrap()))
            .collect()
    }

    fn zero_model(in_features: usize) -> LinearHeads {
        let mut model = LinearHeads::new(in_features, 0);
        model.params_mut().get_mut(WEIGHT).unwrap().fill(0.0);
        model
    }

    #[test]
    fn test_loss_value_and_stats() {
        let mut model = zero_model(2);
        let input = Tensor::new(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let out = model.forward(&input).unwrap();

        let (loss, stats) = MultiTaskMse::default()
            .compute(&out, &targets(2, 1.0))
            .unwrap();
        assert_eq!(stats.len(), 5);
        assert_eq!(stats["depth"], 1.0);
        assert_eq!(loss.value(), 5.0);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut model = LinearHeads::new(3, 11);
        let input = Tensor::new(vec![2, 3], vec![0.5, -1.0, 2.0, 1.5, 0.25, -0.5]).unwrap();
        let tgt = targets(2, 0.3);
        let criterion = MultiTaskMse::default();

        let out = model.forward(&input).unwrap();
        let (loss, _) = criterion.compute(&out, &tgt).unwrap();
        model.params_mut().zero_grad();
        loss.backward(model.params_mut()).unwrap();
        let analytic = model.params().grad(WEIGHT).unwrap().data()[4];

        let eps = 1e-3f32;
        let mut bumped = model.clone();
        bumped.params_mut().get_mut(WEIGHT).unwrap().data_mut()[4] += eps;
        let out2 = bumped.forward(&input).unwrap();
        let (loss2, _) = criterion.compute(&out2, &tgt).unwrap();
        let numeric = (loss2.value() - loss.value()) / f64::from(eps);

        assert!(
            (numeric - f64::from(analytic)).abs() < 1e-2,
            "numeric {numeric} vs analytic {analytic}"
        );
    }

    #[test]
    fn test_missing_target_is_compute_error() {
        let mut model = zero_model(1);
        let out = model.forward(&Tensor::zeros(vec![1, 1])).unwrap();
        let mut tgt = targets(1, 0.0);
        tgt.remove("heading");

        let err = MultiTaskMse::default().compute(&out, &tgt).unwrap_err();
        assert!(matches!(err, TrainError::Compute(_)));
    }
}

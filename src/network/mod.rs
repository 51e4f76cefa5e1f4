//! Policy/value model interface and the reference burn network.
//!
//! A model maps an observation batch to policy logits and a scalar value per
//! row. Trainable parameters live inside the burn [`Module`]; normalization
//! statistics travel next to it as a plain [`NormStats`] value that is never
//! differentiated.

mod policy_value_net;

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::ModelError;

pub use policy_value_net::{PolicyValueNet, PolicyValueNetConfig};

/// Network shape, the `[model]` section of the config file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub hidden_size: usize,
    /// Residual blocks after the stem.
    pub num_blocks: usize,
    /// Running statistics keep this share of their old value per update.
    pub norm_momentum: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            hidden_size: 128,
            num_blocks: 4,
            norm_momentum: 0.9,
        }
    }
}

impl ModelConfig {
    pub fn net_config(&self, observation_size: usize, num_actions: usize) -> PolicyValueNetConfig {
        PolicyValueNetConfig::new(observation_size, num_actions)
            .with_hidden_size(self.hidden_size)
            .with_num_blocks(self.num_blocks)
            .with_norm_momentum(self.norm_momentum)
    }
}

/// Output of one [`PolicyValueModel::apply`] call.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// `[batch, num_actions]`, unmasked.
    pub logits: Tensor<B, 2>,
    /// `[batch]`, from the perspective of the player to move.
    pub value: Tensor<B, 1>,
    /// Updated running statistics; only produced in training mode.
    pub stats: Option<NormStats>,
}

/// A policy/value network with externally held normalization statistics.
pub trait PolicyValueModel<B: Backend>: Module<B> {
    fn num_actions(&self) -> usize;

    /// Evaluate `observation` (`[batch, obs]`).
    ///
    /// With `train = false` the running statistics in `stats` normalize the
    /// hidden activations and no new statistics are returned. With
    /// `train = true` the batch's own statistics are used and blended into a
    /// fresh copy of `stats`.
    fn apply(
        &self,
        stats: &NormStats,
        observation: Tensor<B, 2>,
        train: bool,
    ) -> Result<ModelOutput<B>, ModelError>;
}

/// Running mean/variance of a normalized hidden layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NormStats {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
    /// Weight kept by the old statistics when blending in a new batch.
    pub momentum: f32,
}

impl NormStats {
    /// Identity statistics (zero mean, unit variance) for `size` features.
    pub fn new(size: usize, momentum: f32) -> Self {
        NormStats {
            mean: vec![0.0; size],
            var: vec![1.0; size],
            momentum,
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Exponential moving average towards one batch's statistics.
    pub fn blend(&self, batch_mean: &[f32], batch_var: &[f32]) -> NormStats {
        let m = self.momentum;
        NormStats {
            mean: self
                .mean
                .iter()
                .zip(batch_mean)
                .map(|(old, new)| m * old + (1.0 - m) * new)
                .collect(),
            var: self
                .var
                .iter()
                .zip(batch_var)
                .map(|(old, new)| m * old + (1.0 - m) * new)
                .collect(),
            momentum: m,
        }
    }

    /// Element-wise mean of several copies, summed in slice order.
    pub fn average(stats: &[NormStats]) -> Option<NormStats> {
        let first = stats.first()?;
        let n = stats.len() as f32;
        let mut mean = vec![0.0f32; first.len()];
        let mut var = vec![0.0f32; first.len()];
        for s in stats {
            if s.len() != first.len() {
                return None;
            }
            for (acc, v) in mean.iter_mut().zip(&s.mean) {
                *acc += v;
            }
            for (acc, v) in var.iter_mut().zip(&s.var) {
                *acc += v;
            }
        }
        mean.iter_mut().for_each(|v| *v /= n);
        var.iter_mut().for_each(|v| *v /= n);
        Some(NormStats {
            mean,
            var,
            momentum: first.momentum,
        })
    }

    /// `[1, size]` mean and variance tensors for broadcasting over a batch.
    pub(crate) fn tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let size = self.len();
        let mean = Tensor::from_data(TensorData::new(self.mean.clone(), [1, size]), device);
        let var = Tensor::from_data(TensorData::new(self.var.clone(), [1, size]), device);
        (mean, var)
    }
}

/// Build a `[batch, width]` tensor from a row-major buffer.
pub fn batch_tensor<B: Backend>(
    flat: Vec<f32>,
    batch: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(flat, [batch, width]), device)
}

/// Copy a float tensor back to the host.
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, ModelError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ModelError::TensorData(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_moves_towards_batch() {
        let stats = NormStats::new(2, 0.9);
        let next = stats.blend(&[1.0, -1.0], &[3.0, 1.0]);
        assert!((next.mean[0] - 0.1).abs() < 1e-6);
        assert!((next.mean[1] + 0.1).abs() < 1e-6);
        assert!((next.var[0] - 1.2).abs() < 1e-6);
        assert!((next.var[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_of_copies() {
        let a = NormStats {
            mean: vec![1.0, 2.0],
            var: vec![1.0, 1.0],
            momentum: 0.9,
        };
        let b = NormStats {
            mean: vec![3.0, 0.0],
            var: vec![3.0, 1.0],
            momentum: 0.9,
        };
        let avg = NormStats::average(&[a.clone(), b]).unwrap();
        assert_eq!(avg.mean, vec![2.0, 1.0]);
        assert_eq!(avg.var, vec![2.0, 1.0]);
        assert_eq!(NormStats::average(&[a.clone(), a.clone()]).unwrap(), a);
    }

    #[test]
    fn test_average_rejects_mismatched_sizes() {
        let a = NormStats::new(2, 0.9);
        let b = NormStats::new(3, 0.9);
        assert!(NormStats::average(&[a, b]).is_none());
        assert!(NormStats::average(&[]).is_none());
    }
}

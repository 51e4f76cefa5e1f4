use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use super::{to_vec, ModelOutput, NormStats, PolicyValueModel};
use crate::error::ModelError;

const NORM_EPS: f32 = 1e-5;

/// Residual MLP with a shared trunk and two heads.
///
/// ```text
/// Input:   [batch, obs]
/// Stem:    obs -> hidden, normalize (batch or running stats), ReLU
/// Blocks:  num_blocks x (h + ReLU(Linear(h)))
/// Policy:  hidden -> num_actions  (logits)
/// Value:   hidden -> 1, tanh      => [batch]
/// ```
#[derive(Module, Debug)]
pub struct PolicyValueNet<B: Backend> {
    stem: Linear<B>,
    blocks: Vec<Linear<B>>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct PolicyValueNetConfig {
    pub observation_size: usize,
    pub num_actions: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = 2)]
    pub num_blocks: usize,
    #[config(default = 0.9)]
    pub norm_momentum: f32,
}

impl PolicyValueNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PolicyValueNet<B> {
        PolicyValueNet {
            stem: LinearConfig::new(self.observation_size, self.hidden_size).init(device),
            blocks: (0..self.num_blocks)
                .map(|_| LinearConfig::new(self.hidden_size, self.hidden_size).init(device))
                .collect(),
            policy_head: LinearConfig::new(self.hidden_size, self.num_actions).init(device),
            value_head: LinearConfig::new(self.hidden_size, 1).init(device),
            relu: Relu::new(),
        }
    }

    /// Identity statistics matching the stem width.
    pub fn init_stats(&self) -> NormStats {
        NormStats::new(self.hidden_size, self.norm_momentum)
    }
}

impl<B: Backend> PolicyValueNet<B> {
    fn hidden_size(&self) -> usize {
        self.stem.weight.dims()[1]
    }
}

impl<B: Backend> PolicyValueModel<B> for PolicyValueNet<B> {
    fn num_actions(&self) -> usize {
        self.policy_head.weight.dims()[1]
    }

    fn apply(
        &self,
        stats: &NormStats,
        observation: Tensor<B, 2>,
        train: bool,
    ) -> Result<ModelOutput<B>, ModelError> {
        let [batch, _] = observation.dims();
        if stats.len() != self.hidden_size() {
            return Err(ModelError::StatsShape {
                expected: self.hidden_size(),
                actual: stats.len(),
            });
        }
        let device = observation.device();
        let h = self.stem.forward(observation);

        let (h, new_stats) = if train {
            let mean = h.clone().mean_dim(0);
            let centered = h - mean.clone();
            let var = (centered.clone() * centered.clone()).mean_dim(0);
            let h = centered / var.clone().add_scalar(NORM_EPS).sqrt();
            let batch_mean = to_vec(mean.detach())?;
            let batch_var = to_vec(var.detach())?;
            (h, Some(stats.blend(&batch_mean, &batch_var)))
        } else {
            let (mean, var) = stats.tensors::<B>(&device);
            ((h - mean) / var.add_scalar(NORM_EPS).sqrt(), None)
        };

        let mut h = self.relu.forward(h);
        for block in &self.blocks {
            h = h.clone() + self.relu.forward(block.forward(h));
        }

        let logits = self.policy_head.forward(h.clone());
        let value = self.value_head.forward(h).tanh().reshape([batch]);

        Ok(ModelOutput {
            logits,
            value,
            stats: new_stats,
        })
    }
}

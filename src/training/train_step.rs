//! Replicated model state and the synchronized gradient step.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;

use super::samples::Samples;
use crate::error::{ModelError, TrainingError};
use crate::network::{batch_tensor, to_vec, NormStats, PolicyValueModel};

/// Everything one replica needs to train: parameters, normalization
/// statistics, optimizer moments and the device they live on.
pub struct ModelState<B: AutodiffBackend, M, O> {
    pub model: M,
    pub stats: NormStats,
    pub optimizer: O,
    pub device: B::Device,
}

/// One [`ModelState`] per local replica, kept identical by [`train_step`].
pub struct ReplicaSet<B: AutodiffBackend, M, O> {
    replicas: Vec<ModelState<B, M, O>>,
}

impl<B, M, O> ReplicaSet<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    /// Copy the initial model and statistics to every device. Each replica
    /// gets a fresh optimizer from `make_optimizer`.
    pub fn broadcast(
        model: M,
        stats: NormStats,
        devices: &[B::Device],
        mut make_optimizer: impl FnMut() -> O,
    ) -> Self {
        let replicas = devices
            .iter()
            .map(|device| ModelState {
                model: model.clone().fork(device),
                stats: stats.clone(),
                optimizer: make_optimizer(),
                device: device.clone(),
            })
            .collect();
        ReplicaSet { replicas }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replicas(&self) -> &[ModelState<B, M, O>] {
        &self.replicas
    }

    /// Whether every replica holds bit-identical parameters and statistics.
    pub fn in_sync(&self) -> bool {
        let Some(first) = self.replicas.first() else {
            return true;
        };
        let reference = fingerprint(&first.model);
        if reference.is_none() {
            return false;
        }
        self.replicas[1..]
            .iter()
            .all(|r| r.stats == first.stats && fingerprint(&r.model) == reference)
    }
}

/// Bit patterns of every float parameter, in visiting order.
fn fingerprint<B: Backend, M: Module<B>>(model: &M) -> Option<Vec<u32>> {
    struct Collect {
        bits: Vec<u32>,
        failed: bool,
    }

    impl<B: Backend> ModuleVisitor<B> for Collect {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            match tensor.clone().into_data().to_vec::<f32>() {
                Ok(values) => self.bits.extend(values.iter().map(|v| v.to_bits())),
                Err(_) => self.failed = true,
            }
        }
    }

    let mut visitor = Collect {
        bits: Vec::new(),
        failed: false,
    };
    model.visit(&mut visitor);
    (!visitor.failed).then_some(visitor.bits)
}

/// Sums each parameter's gradient over replicas in replica order, divides by
/// the replica count, and registers the result for every replica.
struct GradientMean<'a, B: AutodiffBackend> {
    grads: &'a [GradientsParams],
    devices: &'a [B::Device],
    out: Vec<GradientsParams>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientMean<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(home) = self.devices.first() else {
            return;
        };
        let mut sum: Option<Tensor<B::InnerBackend, D>> = None;
        for grads in self.grads {
            if let Some(grad) = grads.get::<B::InnerBackend, D>(id) {
                let grad = grad.to_device(home);
                sum = Some(match sum {
                    Some(acc) => acc + grad,
                    None => grad,
                });
            }
        }
        if let Some(sum) = sum {
            let mean = sum.div_scalar(self.grads.len() as f32);
            for (out, device) in self.out.iter_mut().zip(self.devices) {
                out.register::<B::InnerBackend, D>(id, mean.clone().to_device(device));
            }
        }
    }
}

/// Average per-replica gradients and hand every replica its own copy of the
/// mean, placed on that replica's device.
///
/// `grads[i]` must come from the replica on `devices[i]`; all replicas must
/// share `module`'s parameter ids.
pub fn all_reduce_mean<B, M>(
    module: &M,
    grads: Vec<GradientsParams>,
    devices: &[B::Device],
) -> Vec<GradientsParams>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = GradientMean::<B> {
        grads: &grads,
        devices,
        out: devices.iter().map(|_| GradientsParams::new()).collect(),
    };
    module.visit(&mut visitor);
    visitor.out
}

/// A minibatch moved onto a device.
pub struct SampleTensors<B: Backend> {
    pub observation: Tensor<B, 2>,
    pub policy_target: Tensor<B, 2>,
    pub value_target: Tensor<B, 1>,
    pub mask: Tensor<B, 1>,
}

impl<B: Backend> SampleTensors<B> {
    pub fn new(samples: &Samples, device: &B::Device) -> Self {
        let (n, obs) = samples.observation.dim();
        let actions = samples.policy_target.ncols();
        let vector = |values: Vec<f32>| Tensor::from_data(TensorData::new(values, [n]), device);
        SampleTensors {
            observation: batch_tensor(samples.observation.iter().copied().collect(), n, obs, device),
            policy_target: batch_tensor(
                samples.policy_target.iter().copied().collect(),
                n,
                actions,
                device,
            ),
            value_target: vector(samples.value_target.to_vec()),
            mask: vector(samples.mask.to_vec()),
        }
    }
}

/// Policy cross-entropy and masked squared value error, both as `[1]` tensors.
///
/// The value term is the plain `(v - z)^2`, twice the scale of an L2 loss
/// with the usual 0.5 factor. It averages over every row, masked ones
/// included, so a batch with many truncated rows contributes a smaller value
/// gradient.
pub fn loss_terms<B: Backend>(
    logits: Tensor<B, 2>,
    value: Tensor<B, 1>,
    batch: &SampleTensors<B>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let policy_loss = -(batch.policy_target.clone() * log_softmax(logits, 1))
        .sum_dim(1)
        .mean();
    let diff = value - batch.value_target.clone();
    let value_loss = (diff.clone() * diff * batch.mask.clone()).mean();
    (policy_loss, value_loss)
}

/// Scalar losses of one synchronized update, averaged over replicas.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrainLosses {
    pub policy_loss: f32,
    pub value_loss: f32,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32, ModelError> {
    to_vec(tensor)?
        .first()
        .copied()
        .ok_or_else(|| ModelError::TensorData("empty loss tensor".into()))
}

/// One synchronized update: every replica computes gradients on its own
/// minibatch, the gradients are all-reduced, and every replica applies the
/// same mean gradient. New normalization statistics are averaged too, so the
/// replicas stay bit-identical.
pub fn train_step<B, M, O>(
    replicas: &mut ReplicaSet<B, M, O>,
    batches: &[Samples],
    learning_rate: f64,
) -> Result<TrainLosses, TrainingError>
where
    B: AutodiffBackend,
    M: PolicyValueModel<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    if batches.len() != replicas.len() || replicas.is_empty() {
        return Err(TrainingError::ReplicaCount {
            expected: replicas.len(),
            actual: batches.len(),
        });
    }

    let mut grads = Vec::with_capacity(batches.len());
    let mut new_stats = Vec::with_capacity(batches.len());
    let mut policy_sum = 0.0f32;
    let mut value_sum = 0.0f32;

    for (replica, batch) in replicas.replicas.iter().zip(batches) {
        let tensors = SampleTensors::<B>::new(batch, &replica.device);
        let out = replica
            .model
            .apply(&replica.stats, tensors.observation.clone(), true)?;
        let stats = out.stats.ok_or(TrainingError::MissingStats)?;
        let (policy_loss, value_loss) = loss_terms(out.logits, out.value, &tensors);

        let policy = scalar(policy_loss.clone())?;
        let value = scalar(value_loss.clone())?;
        if !policy.is_finite() || !value.is_finite() {
            return Err(TrainingError::NonFiniteLoss { policy, value });
        }
        policy_sum += policy;
        value_sum += value;

        let loss = policy_loss + value_loss;
        grads.push(GradientsParams::from_grads(loss.backward(), &replica.model));
        new_stats.push(stats);
    }

    let devices: Vec<B::Device> = replicas.replicas.iter().map(|r| r.device.clone()).collect();
    let averaged = all_reduce_mean(&replicas.replicas[0].model, grads, &devices);
    let stats = NormStats::average(&new_stats)
        .ok_or_else(|| TrainingError::Shape("replicas returned mismatched stats".into()))?;

    for (replica, grads) in replicas.replicas.iter_mut().zip(averaged) {
        replica.model = replica
            .optimizer
            .step(learning_rate, replica.model.clone(), grads);
        replica.stats = stats.clone();
    }

    let n = batches.len() as f32;
    Ok(TrainLosses {
        policy_loss: policy_sum / n,
        value_loss: value_sum / n,
    })
}

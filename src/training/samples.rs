use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::returns::Targets;
use super::selfplay::SelfplayOutput;
use crate::error::TrainingError;

/// Flat training rows; time and lane structure is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    /// `[N, O]`
    pub observation: Array2<f32>,
    /// `[N, A]`
    pub policy_target: Array2<f32>,
    /// `[N]`
    pub value_target: Array1<f32>,
    /// `[N]`, 1.0 for rows whose game finished inside the horizon.
    pub mask: Array1<f32>,
}

impl Samples {
    /// Flatten trajectories (one per replica) in (replica, time, lane) order.
    pub fn from_trajectories(parts: &[(SelfplayOutput, Targets)]) -> Result<Samples, TrainingError> {
        let mut observation = Vec::with_capacity(parts.len());
        let mut policy_target = Vec::with_capacity(parts.len());
        let mut value_target = Vec::with_capacity(parts.len());
        let mut mask = Vec::with_capacity(parts.len());

        for (traj, targets) in parts {
            let (t, b, o) = traj.observation.dim();
            let a = traj.action_weights.dim().2;
            if targets.value_target.dim() != (t, b) || targets.mask.dim() != (t, b) {
                return Err(TrainingError::Shape(format!(
                    "targets {:?} do not match trajectory ({t}, {b})",
                    targets.value_target.dim()
                )));
            }
            let rows = t * b;
            observation.push(flatten(&traj.observation, rows, o)?);
            policy_target.push(flatten(&traj.action_weights, rows, a)?);
            value_target.push(Array1::from_iter(targets.value_target.iter().copied()));
            mask.push(Array1::from_iter(
                targets.mask.iter().map(|&m| if m { 1.0 } else { 0.0 }),
            ));
        }

        Ok(Samples {
            observation: stack2(&observation)?,
            policy_target: stack2(&policy_target)?,
            value_target: stack1(&value_target)?,
            mask: stack1(&mask)?,
        })
    }

    pub fn len(&self) -> usize {
        self.value_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_target.is_empty()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Samples {
        Samples {
            observation: self.observation.select(Axis(0), indices),
            policy_target: self.policy_target.select(Axis(0), indices),
            value_target: self.value_target.select(Axis(0), indices),
            mask: self.mask.select(Axis(0), indices),
        }
    }

    /// Shuffle and cut into `[num_updates][num_replicas]` minibatches of
    /// `training_batch_size / num_replicas` rows each. Leftover rows are dropped.
    pub fn minibatches(
        &self,
        rng: &mut StdRng,
        num_replicas: usize,
        training_batch_size: usize,
    ) -> Vec<Vec<Samples>> {
        let per_replica = training_batch_size / num_replicas.max(1);
        if per_replica == 0 {
            return Vec::new();
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        let num_updates = self.len() / (per_replica * num_replicas);
        order
            .chunks_exact(per_replica)
            .take(num_updates * num_replicas)
            .map(|idx| self.select(idx))
            .collect::<Vec<_>>()
            .chunks(num_replicas)
            .map(<[Samples]>::to_vec)
            .collect()
    }
}

fn flatten(
    array: &ndarray::Array3<f32>,
    rows: usize,
    width: usize,
) -> Result<Array2<f32>, TrainingError> {
    array
        .to_shape((rows, width))
        .map(|view| view.to_owned())
        .map_err(|e| TrainingError::Shape(e.to_string()))
}

fn stack2(parts: &[Array2<f32>]) -> Result<Array2<f32>, TrainingError> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| TrainingError::Shape(e.to_string()))
}

fn stack1(parts: &[Array1<f32>]) -> Result<Array1<f32>, TrainingError> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| TrainingError::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use rand::SeedableRng;

    fn trajectory(t: usize, b: usize, offset: f32) -> (SelfplayOutput, Targets) {
        let obs = Array3::from_shape_fn((t, b, 2), |(i, j, k)| offset + (i * b + j) as f32 + k as f32 * 0.5);
        let weights = Array3::from_shape_fn((t, b, 3), |(_, _, k)| if k == 0 { 1.0 } else { 0.0 });
        let out = SelfplayOutput {
            observation: obs,
            reward: Array2::zeros((t, b)),
            terminated: Array2::from_elem((t, b), false),
            action_weights: weights,
            discount: Array2::from_elem((t, b), -1.0),
        };
        let targets = Targets {
            value_target: Array2::from_shape_fn((t, b), |(i, j)| offset + (i * b + j) as f32),
            mask: Array2::from_shape_fn((t, b), |(i, _)| i == 0),
        };
        (out, targets)
    }

    #[test]
    fn test_flatten_keeps_rows_aligned() {
        let samples = Samples::from_trajectories(&[trajectory(2, 3, 0.0), trajectory(2, 3, 100.0)])
            .unwrap();
        assert_eq!(samples.len(), 12);
        assert_eq!(samples.observation.dim(), (12, 2));
        assert_eq!(samples.policy_target.dim(), (12, 3));
        for row in 0..12 {
            assert_eq!(samples.observation[[row, 0]], samples.value_target[row]);
        }
        // Replica 1 rows follow replica 0 rows.
        assert_eq!(samples.value_target[6], 100.0);
        assert_eq!(samples.mask[0], 1.0);
        assert_eq!(samples.mask[3], 0.0);
    }

    #[test]
    fn test_minibatch_partition() {
        let samples = Samples::from_trajectories(&[trajectory(5, 4, 0.0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        // 20 rows, 2 replicas x 3 rows per update -> 3 updates, 2 rows dropped.
        let batches = samples.minibatches(&mut rng, 2, 6);
        assert_eq!(batches.len(), 3);
        let mut seen = Vec::new();
        for update in &batches {
            assert_eq!(update.len(), 2);
            for part in update {
                assert_eq!(part.len(), 3);
                seen.extend(part.value_target.iter().map(|&v| v as usize));
            }
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn test_too_few_rows_give_no_update() {
        let samples = Samples::from_trajectories(&[trajectory(1, 2, 0.0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(samples.minibatches(&mut rng, 1, 4).is_empty());
    }
}

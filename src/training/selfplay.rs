use burn::prelude::*;
use log::debug;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{SearchError, TrainingError};
use crate::game::{auto_reset_step, derive_seed, invalid_action_batch, Environment, GameState};
use crate::network::{NormStats, PolicyValueModel};
use crate::search::{Planner, SearchOperator};

/// Self-play settings, the `[selfplay]` section of the config file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfPlayConfig {
    pub env_id: crate::game::EnvId,
    pub seed: u64,
    /// Lanes across all replicas.
    pub selfplay_batch_size: usize,
    pub num_simulations: usize,
    /// Horizon: steps recorded per iteration.
    pub max_num_steps: usize,
    pub max_num_considered_actions: usize,
    pub gumbel_scale: f32,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        SelfPlayConfig {
            env_id: crate::game::EnvId::ConnectFour,
            seed: 0,
            selfplay_batch_size: 16,
            num_simulations: 32,
            max_num_steps: 256,
            max_num_considered_actions: 16,
            gumbel_scale: 1.0,
        }
    }
}

/// One trajectory of `T` steps over `B` lanes. Time is the leading axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfplayOutput {
    /// `[T, B, O]`, recorded before each step.
    pub observation: Array3<f32>,
    /// `[T, B]`, reward of the player who acted at step t.
    pub reward: Array2<f32>,
    /// `[T, B]`
    pub terminated: Array2<bool>,
    /// `[T, B, A]`, the planner's improved policy.
    pub action_weights: Array3<f32>,
    /// `[T, B]`, 0 after a terminal step and -1 otherwise.
    pub discount: Array2<f32>,
}

impl SelfplayOutput {
    pub fn horizon(&self) -> usize {
        self.reward.nrows()
    }

    pub fn num_lanes(&self) -> usize {
        self.reward.ncols()
    }

    /// Recorded (step, lane) pairs.
    pub fn num_frames(&self) -> usize {
        self.reward.len()
    }
}

/// Rolls out a batch of games in lockstep under a planner.
pub struct SelfPlayEngine<'a, E: Environment, P: Planner> {
    env: &'a E,
    planner: &'a P,
    num_lanes: usize,
    num_simulations: usize,
    max_num_steps: usize,
}

impl<'a, E: Environment, P: Planner> SelfPlayEngine<'a, E, P> {
    pub fn new(
        env: &'a E,
        planner: &'a P,
        num_lanes: usize,
        num_simulations: usize,
        max_num_steps: usize,
    ) -> Self {
        SelfPlayEngine {
            env,
            planner,
            num_lanes,
            num_simulations,
            max_num_steps,
        }
    }

    pub fn num_lanes(&self) -> usize {
        self.num_lanes
    }

    /// Play `max_num_steps` steps from fresh games seeded by `seed`.
    ///
    /// The same seed, model and stats always produce the same trajectory.
    pub fn run<B, M>(
        &self,
        model: &M,
        stats: &NormStats,
        device: &B::Device,
        seed: u64,
    ) -> Result<SelfplayOutput, TrainingError>
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        let lanes = self.num_lanes;
        let horizon = self.max_num_steps;
        let num_actions = self.env.num_actions();
        let obs_size = self.env.observation_size();

        let mut states: Vec<E::State> = (0..lanes)
            .map(|lane| self.env.init(derive_seed(seed, lane as u64)))
            .collect();
        let mut rng = StdRng::seed_from_u64(derive_seed(seed, u64::MAX));
        let mut operator = SearchOperator::<E, B, M>::new(self.env, model, stats, device.clone());

        let mut observation = Vec::with_capacity(horizon * lanes * obs_size);
        let mut action_weights = Vec::with_capacity(horizon * lanes * num_actions);
        let mut reward = Array2::<f32>::zeros((horizon, lanes));
        let mut terminated = Array2::from_elem((horizon, lanes), false);
        let mut discount = Array2::<f32>::zeros((horizon, lanes));

        for t in 0..horizon {
            let invalid = invalid_action_batch(&states);
            for (lane, (state, inv)) in states.iter().zip(&invalid).enumerate() {
                if !state.terminated() && inv.iter().all(|&i| i) {
                    return Err(SearchError::NoLegalAction { lane }.into());
                }
            }

            for state in &states {
                state.observation_into(&mut observation);
            }
            let root = operator.root(&states)?;
            let policy =
                self.planner
                    .plan(&mut rng, root, &mut operator, self.num_simulations, &invalid)?;
            if policy.action.len() != lanes || policy.action_weights.len() != lanes {
                return Err(TrainingError::Shape(format!(
                    "planner returned {} actions for {lanes} lanes",
                    policy.action.len()
                )));
            }
            for weights in &policy.action_weights {
                if weights.len() != num_actions {
                    return Err(TrainingError::Shape(format!(
                        "action weights have width {}, expected {num_actions}",
                        weights.len()
                    )));
                }
                action_weights.extend_from_slice(weights);
            }

            let step_seed = derive_seed(seed, (t as u64 + 1) << 32);
            for (lane, state) in states.iter_mut().enumerate() {
                let actor = state.current_player();
                let next = auto_reset_step(
                    self.env,
                    state,
                    policy.action[lane],
                    derive_seed(step_seed, lane as u64),
                );
                reward[[t, lane]] = next.rewards[actor];
                terminated[[t, lane]] = next.terminated;
                discount[[t, lane]] = if next.terminated { 0.0 } else { -1.0 };
                *state = next.state;
            }
        }

        let observation = Array3::from_shape_vec((horizon, lanes, obs_size), observation)
            .map_err(|e| TrainingError::Shape(format!("observation: {e}")))?;
        let action_weights = Array3::from_shape_vec((horizon, lanes, num_actions), action_weights)
            .map_err(|e| TrainingError::Shape(format!("action weights: {e}")))?;

        debug!(
            "self-play: {} steps x {} lanes, {} games finished",
            horizon,
            lanes,
            terminated.iter().filter(|&&d| d).count()
        );

        Ok(SelfplayOutput {
            observation,
            reward,
            terminated,
            action_weights,
            discount,
        })
    }
}

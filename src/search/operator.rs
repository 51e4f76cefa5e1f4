use std::marker::PhantomData;

use burn::prelude::*;

use super::planner::{mask_invalid_actions, RecurrentFn, RecurrentFnOutput, RootFnOutput};
use crate::error::SearchError;
use crate::game::{observe_batch_into, Environment, GameState};
use crate::network::{batch_tensor, to_vec, NormStats, PolicyValueModel};

/// Lookahead through the real game rules, scored by a frozen model snapshot.
///
/// Stepping is exact; only priors and values come from the network, which
/// always runs in inference mode here.
pub struct SearchOperator<'a, E, B, M>
where
    E: Environment,
    B: Backend,
    M: PolicyValueModel<B>,
{
    env: &'a E,
    model: &'a M,
    stats: &'a NormStats,
    device: B::Device,
    obs_buf: Vec<f32>,
    _backend: PhantomData<B>,
}

impl<'a, E, B, M> SearchOperator<'a, E, B, M>
where
    E: Environment,
    B: Backend,
    M: PolicyValueModel<B>,
{
    pub fn new(env: &'a E, model: &'a M, stats: &'a NormStats, device: B::Device) -> Self {
        SearchOperator {
            env,
            model,
            stats,
            device,
            obs_buf: Vec::new(),
            _backend: PhantomData,
        }
    }

    /// Evaluate `states` once: raw logits and values as the model reports them.
    fn evaluate(&mut self, states: &[E::State]) -> Result<(Vec<Vec<f32>>, Vec<f32>), SearchError> {
        let batch = states.len();
        let num_actions = self.env.num_actions();
        observe_batch_into(states, &mut self.obs_buf);
        let obs = batch_tensor::<B>(
            self.obs_buf.clone(),
            batch,
            self.env.observation_size(),
            &self.device,
        );
        let out = self.model.apply(self.stats, obs, false)?;
        let logits = to_vec(out.logits)?;
        let value = to_vec(out.value)?;
        if logits.len() != batch * num_actions {
            return Err(SearchError::WidthMismatch {
                what: "model logits",
                expected: batch * num_actions,
                actual: logits.len(),
            });
        }
        if value.len() != batch {
            return Err(SearchError::BatchMismatch {
                what: "model value",
                expected: batch,
                actual: value.len(),
            });
        }
        let rows = logits.chunks(num_actions).map(<[f32]>::to_vec).collect();
        Ok((rows, value))
    }

    /// Root evaluation for a batch of live positions.
    pub fn root(&mut self, states: &[E::State]) -> Result<RootFnOutput<E::State>, SearchError> {
        let (prior_logits, value) = self.evaluate(states)?;
        for (lane, (logits, v)) in prior_logits.iter().zip(&value).enumerate() {
            if !v.is_finite() {
                return Err(SearchError::NonFinite {
                    what: "root value",
                    lane,
                });
            }
            if logits.iter().any(|l| !l.is_finite()) {
                return Err(SearchError::NonFinite {
                    what: "root prior logits",
                    lane,
                });
            }
        }
        Ok(RootFnOutput {
            prior_logits,
            value,
            embedding: states.to_vec(),
        })
    }
}

impl<E, B, M> RecurrentFn<E::State> for SearchOperator<'_, E, B, M>
where
    E: Environment,
    B: Backend,
    M: PolicyValueModel<B>,
{
    fn recurrent(
        &mut self,
        actions: &[usize],
        embeddings: &[E::State],
    ) -> Result<(RecurrentFnOutput, Vec<E::State>), SearchError> {
        if actions.len() != embeddings.len() {
            return Err(SearchError::BatchMismatch {
                what: "recurrent actions",
                expected: embeddings.len(),
                actual: actions.len(),
            });
        }

        let next: Vec<E::State> = embeddings
            .iter()
            .zip(actions)
            .map(|(state, &action)| self.env.step(state, action))
            .collect();
        let (logits, raw_value) = self.evaluate(&next)?;

        let batch = next.len();
        let mut out = RecurrentFnOutput {
            reward: Vec::with_capacity(batch),
            discount: Vec::with_capacity(batch),
            prior_logits: Vec::with_capacity(batch),
            value: Vec::with_capacity(batch),
        };
        for (lane, ((before, after), (row, v))) in embeddings
            .iter()
            .zip(&next)
            .zip(logits.iter().zip(raw_value))
            .enumerate()
        {
            if row.iter().any(|l| !l.is_finite()) {
                return Err(SearchError::NonFinite {
                    what: "prior logits",
                    lane,
                });
            }
            let terminated = after.terminated();
            if !terminated && !v.is_finite() {
                return Err(SearchError::NonFinite { what: "value", lane });
            }
            let invalid: Vec<bool> = after.legal_action_mask().iter().map(|&l| !l).collect();
            out.prior_logits.push(mask_invalid_actions(row, &invalid));
            out.reward.push(after.rewards()[before.current_player()]);
            out.discount.push(if terminated { 0.0 } else { -1.0 });
            out.value.push(if terminated { 0.0 } else { v });
        }
        Ok((out, next))
    }
}

use rand::rngs::StdRng;
use rand_distr::{Distribution, Gumbel};

use super::planner::{
    argmax, check_root, mask_invalid_actions, masked_argmax, softmax, Planner, PolicyOutput,
    RecurrentFn, RootFnOutput,
};
use super::qtransform::{completed_by_mix_value, considered_visits_table, score_considered};
use super::tree::{Tree, ROOT};
use crate::error::SearchError;

/// Gumbel MuZero policy improvement.
///
/// The root samples one Gumbel perturbation per action and runs sequential
/// halving over the top candidates; interior nodes pick the action whose
/// visit share lags furthest behind the improved policy. The returned weights
/// are `softmax(prior + completed_q)` and the chosen action is the most
/// visited surviving candidate.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GumbelMuZero {
    pub max_num_considered_actions: usize,
    pub gumbel_scale: f32,
}

impl Default for GumbelMuZero {
    fn default() -> Self {
        GumbelMuZero {
            max_num_considered_actions: 16,
            gumbel_scale: 1.0,
        }
    }
}

impl GumbelMuZero {
    pub fn new(max_num_considered_actions: usize, gumbel_scale: f32) -> Self {
        GumbelMuZero {
            max_num_considered_actions,
            gumbel_scale,
        }
    }

    fn root_action<S>(
        &self,
        tree: &Tree<S>,
        gumbel: &[f32],
        invalid: &[bool],
        table: &[Vec<u32>],
    ) -> usize {
        let visits = tree.child_visits(ROOT);
        let completed_q = completed_by_mix_value(tree, ROOT);
        let num_valid = invalid.iter().filter(|&&i| !i).count();
        let num_considered = self.max_num_considered_actions.min(num_valid);
        let simulation_index = visits.iter().sum::<f32>() as usize;
        let considered_visit = table[num_considered]
            .get(simulation_index)
            .copied()
            .unwrap_or(0) as f32;
        let scores = score_considered(
            considered_visit,
            gumbel,
            &tree.nodes[ROOT].prior_logits,
            &completed_q,
            &visits,
        );
        masked_argmax(&scores, invalid)
    }

    fn interior_action<S>(tree: &Tree<S>, node: usize) -> usize {
        let visits = tree.child_visits(node);
        let completed_q = completed_by_mix_value(tree, node);
        let logits: Vec<f32> = tree.nodes[node]
            .prior_logits
            .iter()
            .zip(&completed_q)
            .map(|(l, q)| l + q)
            .collect();
        let probs = softmax(&logits);
        let total: f32 = visits.iter().sum();
        let scores: Vec<f32> = probs
            .iter()
            .zip(&visits)
            .map(|(p, n)| p - n / (1.0 + total))
            .collect();
        argmax(&scores)
    }

    /// Walk from the root to the first unexpanded edge.
    fn select<S>(
        &self,
        tree: &Tree<S>,
        gumbel: &[f32],
        invalid: &[bool],
        table: &[Vec<u32>],
    ) -> (usize, usize) {
        let mut node = ROOT;
        loop {
            let action = if node == ROOT {
                self.root_action(tree, gumbel, invalid, table)
            } else {
                Self::interior_action(tree, node)
            };
            match tree.nodes[node].children[action] {
                Some(child) => node = child,
                None => return (node, action),
            }
        }
    }
}

impl Planner for GumbelMuZero {
    fn plan<S: Clone, F: RecurrentFn<S>>(
        &self,
        rng: &mut StdRng,
        root: RootFnOutput<S>,
        recurrent_fn: &mut F,
        num_simulations: usize,
        invalid_actions: &[Vec<bool>],
    ) -> Result<PolicyOutput, SearchError> {
        let num_actions = check_root(&root, invalid_actions)?;
        let batch = root.batch_size();

        let dist = Gumbel::new(0.0f32, 1.0)
            .map_err(|e| SearchError::Distribution(e.to_string()))?;
        let mut gumbel = vec![vec![0.0f32; num_actions]; batch];
        for row in gumbel.iter_mut() {
            for g in row.iter_mut() {
                *g = self.gumbel_scale * dist.sample(rng);
            }
        }
        let table = considered_visits_table(self.max_num_considered_actions, num_simulations);

        let mut trees: Vec<Tree<S>> = root
            .embedding
            .into_iter()
            .zip(root.prior_logits.iter().zip(invalid_actions))
            .zip(&root.value)
            .map(|((embedding, (logits, invalid)), &value)| {
                Tree::new(
                    embedding,
                    mask_invalid_actions(logits, invalid),
                    value,
                    num_simulations + 1,
                )
            })
            .collect();

        for _ in 0..num_simulations {
            let selected: Vec<(usize, usize)> = trees
                .iter()
                .enumerate()
                .map(|(lane, tree)| {
                    self.select(tree, &gumbel[lane], &invalid_actions[lane], &table)
                })
                .collect();
            let actions: Vec<usize> = selected.iter().map(|&(_, a)| a).collect();
            let embeddings: Vec<S> = trees
                .iter()
                .zip(&selected)
                .map(|(tree, &(parent, _))| tree.nodes[parent].embedding.clone())
                .collect();

            let (step, next) = recurrent_fn.recurrent(&actions, &embeddings)?;
            check_step(&step, &next, batch, num_actions)?;

            for (lane, embedding) in next.into_iter().enumerate() {
                let (parent, action) = selected[lane];
                let tree = &mut trees[lane];
                let leaf = tree.expand(
                    parent,
                    action,
                    embedding,
                    step.prior_logits[lane].clone(),
                    step.value[lane],
                    step.reward[lane],
                    step.discount[lane],
                );
                tree.backup(leaf);
            }
        }

        let mut action = Vec::with_capacity(batch);
        let mut action_weights = Vec::with_capacity(batch);
        for (lane, tree) in trees.iter().enumerate() {
            let invalid = &invalid_actions[lane];
            let visits = tree.child_visits(ROOT);
            let completed_q = completed_by_mix_value(tree, ROOT);
            let prior = &tree.nodes[ROOT].prior_logits;

            let considered_visit = visits.iter().copied().fold(0.0, f32::max);
            let scores =
                score_considered(considered_visit, &gumbel[lane], prior, &completed_q, &visits);
            action.push(masked_argmax(&scores, invalid));

            let improved: Vec<f32> = prior.iter().zip(&completed_q).map(|(l, q)| l + q).collect();
            action_weights.push(softmax(&mask_invalid_actions(&improved, invalid)));
        }

        Ok(PolicyOutput {
            action,
            action_weights,
        })
    }
}

fn check_step<S>(
    step: &super::planner::RecurrentFnOutput,
    next: &[S],
    batch: usize,
    num_actions: usize,
) -> Result<(), SearchError> {
    for (what, actual) in [
        ("recurrent embeddings", next.len()),
        ("recurrent reward", step.reward.len()),
        ("recurrent discount", step.discount.len()),
        ("recurrent value", step.value.len()),
        ("recurrent prior logits", step.prior_logits.len()),
    ] {
        if actual != batch {
            return Err(SearchError::BatchMismatch {
                what,
                expected: batch,
                actual,
            });
        }
    }
    for (lane, logits) in step.prior_logits.iter().enumerate() {
        if logits.len() != num_actions {
            return Err(SearchError::WidthMismatch {
                what: "recurrent prior logits",
                expected: num_actions,
                actual: logits.len(),
            });
        }
        if !step.value[lane].is_finite() {
            return Err(SearchError::NonFinite {
                what: "recurrent value",
                lane,
            });
        }
    }
    Ok(())
}

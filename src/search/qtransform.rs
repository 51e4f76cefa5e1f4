//! Q-value completion and the sequential-halving schedule used by
//! [`GumbelMuZero`](super::GumbelMuZero).

use super::tree::Tree;

/// Constant added to the largest visit count before scaling Q values.
pub const MAXVISIT_INIT: f32 = 50.0;
/// Scale of completed Q values relative to prior logits.
pub const VALUE_SCALE: f32 = 0.1;

const RESCALE_EPSILON: f32 = 1e-8;
const LOW_LOGIT: f32 = -1e9;

/// Completed, rescaled Q values of every child of `node`.
///
/// Unvisited actions receive the node's mixed value estimate. The result is
/// min-max normalized and multiplied by `(MAXVISIT_INIT + max N) * VALUE_SCALE`
/// so it is commensurate with logits.
pub(crate) fn completed_by_mix_value<S>(tree: &Tree<S>, node: usize) -> Vec<f32> {
    let q = tree.child_q(node);
    let visits = tree.child_visits(node);
    let prior = tree.prior_probs(node);
    let raw_value = tree.nodes[node].raw_value;

    let mixed = mixed_value(raw_value, &q, &visits, &prior);
    let completed: Vec<f32> = q
        .iter()
        .zip(&visits)
        .map(|(&q, &n)| if n > 0.0 { q } else { mixed })
        .collect();

    let min = completed.iter().copied().fold(f32::INFINITY, f32::min);
    let max = completed.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = (max - min).max(RESCALE_EPSILON);
    let max_visit = visits.iter().copied().fold(0.0, f32::max);
    let scale = (MAXVISIT_INIT + max_visit) * VALUE_SCALE;
    completed.iter().map(|&q| scale * (q - min) / span).collect()
}

/// Interpolate the raw network value with the prior-weighted mean Q of the
/// visited children.
pub fn mixed_value(raw_value: f32, q: &[f32], visits: &[f32], prior: &[f32]) -> f32 {
    let sum_visits: f32 = visits.iter().sum();
    let mut sum_probs = 0.0f32;
    let mut weighted = 0.0f32;
    for ((&q, &n), &p) in q.iter().zip(visits).zip(prior) {
        if n > 0.0 {
            let p = p.max(f32::MIN_POSITIVE);
            sum_probs += p;
            weighted += p * q;
        }
    }
    let weighted_q = if sum_probs > 0.0 {
        weighted / sum_probs
    } else {
        0.0
    };
    (raw_value + sum_visits * weighted_q) / (sum_visits + 1.0)
}

/// Visit count each considered action should have reached at every simulation
/// index, under sequential halving with `max_considered` starting candidates.
pub fn considered_visits_sequence(max_considered: usize, num_simulations: usize) -> Vec<u32> {
    if max_considered <= 1 {
        return (0..num_simulations as u32).collect();
    }
    let log2max = (max_considered as f64).log2().ceil() as usize;
    let mut sequence = Vec::with_capacity(num_simulations + max_considered);
    let mut visits = vec![0u32; max_considered];
    let mut num_considered = max_considered;
    while sequence.len() < num_simulations {
        let extra = (num_simulations / (log2max * num_considered)).max(1);
        for _ in 0..extra {
            sequence.extend_from_slice(&visits[..num_considered]);
            for v in &mut visits[..num_considered] {
                *v += 1;
            }
        }
        num_considered = (num_considered / 2).max(2);
    }
    sequence.truncate(num_simulations);
    sequence
}

/// Row `m` is [`considered_visits_sequence`] for `m` candidates.
pub fn considered_visits_table(max_considered: usize, num_simulations: usize) -> Vec<Vec<u32>> {
    (0..=max_considered)
        .map(|m| considered_visits_sequence(m, num_simulations))
        .collect()
}

/// Root score: Gumbel-perturbed logits plus completed Q, restricted to
/// actions whose visit count equals `considered_visit`.
pub fn score_considered(
    considered_visit: f32,
    gumbel: &[f32],
    logits: &[f32],
    completed_q: &[f32],
    visits: &[f32],
) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    gumbel
        .iter()
        .zip(logits)
        .zip(completed_q)
        .zip(visits)
        .map(|(((&g, &l), &q), &n)| {
            let score = (g + (l - max_logit) + q).max(LOW_LOGIT);
            if n == considered_visit {
                score
            } else {
                f32::NEG_INFINITY
            }
        })
        .collect()
}

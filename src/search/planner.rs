use rand::rngs::StdRng;

use crate::error::SearchError;

/// Network evaluation of the root positions, one row per lane.
#[derive(Debug, Clone)]
pub struct RootFnOutput<S> {
    pub prior_logits: Vec<Vec<f32>>,
    pub value: Vec<f32>,
    pub embedding: Vec<S>,
}

impl<S> RootFnOutput<S> {
    pub fn batch_size(&self) -> usize {
        self.embedding.len()
    }
}

/// Result of one lookahead step for every lane.
#[derive(Debug, Clone, Default)]
pub struct RecurrentFnOutput {
    /// Reward of the player who chose the action.
    pub reward: Vec<f32>,
    /// `-1` when play continues with the opponent to move, `0` at terminal states.
    pub discount: Vec<f32>,
    /// Max-shifted logits, illegal actions at `f32::MIN`.
    pub prior_logits: Vec<Vec<f32>>,
    /// Value of the new position for its mover; `0` at terminal states.
    pub value: Vec<f32>,
}

/// One-step model used by a planner to expand the tree.
pub trait RecurrentFn<S> {
    /// Apply `actions[i]` to `embeddings[i]` for every lane at once.
    fn recurrent(
        &mut self,
        actions: &[usize],
        embeddings: &[S],
    ) -> Result<(RecurrentFnOutput, Vec<S>), SearchError>;
}

/// Improved policy produced by a planner.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// Chosen action per lane; always legal.
    pub action: Vec<usize>,
    /// Per lane: a distribution over actions, zero on illegal ones.
    pub action_weights: Vec<Vec<f32>>,
}

/// A batched tree-search policy improvement procedure.
pub trait Planner: Send + Sync {
    fn plan<S: Clone, F: RecurrentFn<S>>(
        &self,
        rng: &mut StdRng,
        root: RootFnOutput<S>,
        recurrent_fn: &mut F,
        num_simulations: usize,
        invalid_actions: &[Vec<bool>],
    ) -> Result<PolicyOutput, SearchError>;
}

/// Planner that skips search: the improved policy is the masked prior.
///
/// Useful to exercise the self-play and training plumbing without paying for
/// tree search.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorPlanner;

impl Planner for PriorPlanner {
    fn plan<S: Clone, F: RecurrentFn<S>>(
        &self,
        _rng: &mut StdRng,
        root: RootFnOutput<S>,
        _recurrent_fn: &mut F,
        _num_simulations: usize,
        invalid_actions: &[Vec<bool>],
    ) -> Result<PolicyOutput, SearchError> {
        check_root(&root, invalid_actions)?;
        let mut action = Vec::with_capacity(root.batch_size());
        let mut action_weights = Vec::with_capacity(root.batch_size());
        for (logits, invalid) in root.prior_logits.iter().zip(invalid_actions) {
            let weights = softmax(&mask_invalid_actions(logits, invalid));
            action.push(masked_argmax(&weights, invalid));
            action_weights.push(weights);
        }
        Ok(PolicyOutput {
            action,
            action_weights,
        })
    }
}

/// Validate root shapes and make sure every lane has something to play.
pub(crate) fn check_root<S>(
    root: &RootFnOutput<S>,
    invalid_actions: &[Vec<bool>],
) -> Result<usize, SearchError> {
    let batch = root.batch_size();
    for (what, actual) in [
        ("root prior logits", root.prior_logits.len()),
        ("root value", root.value.len()),
        ("invalid action mask", invalid_actions.len()),
    ] {
        if actual != batch {
            return Err(SearchError::BatchMismatch {
                what,
                expected: batch,
                actual,
            });
        }
    }
    let num_actions = invalid_actions.first().map_or(0, Vec::len);
    for (lane, (logits, invalid)) in root.prior_logits.iter().zip(invalid_actions).enumerate() {
        if logits.len() != num_actions || invalid.len() != num_actions {
            return Err(SearchError::WidthMismatch {
                what: "root prior logits",
                expected: num_actions,
                actual: logits.len().min(invalid.len()),
            });
        }
        if invalid.iter().all(|&i| i) {
            return Err(SearchError::NoLegalAction { lane });
        }
        if !root.value[lane].is_finite() {
            return Err(SearchError::NonFinite {
                what: "root value",
                lane,
            });
        }
        if logits.iter().any(|l| l.is_nan()) {
            return Err(SearchError::NonFinite {
                what: "root prior logits",
                lane,
            });
        }
    }
    Ok(num_actions)
}

/// Shift logits so the maximum is zero and pin invalid actions to `f32::MIN`.
pub fn mask_invalid_actions(logits: &[f32], invalid: &[bool]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    logits
        .iter()
        .zip(invalid)
        .map(|(&l, &inv)| if inv { f32::MIN } else { l - max })
        .collect()
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest score among valid actions; first index wins ties.
pub fn masked_argmax(scores: &[f32], invalid: &[bool]) -> usize {
    let mut best = usize::MAX;
    let mut best_score = f32::NEG_INFINITY;
    for (a, (&score, &inv)) in scores.iter().zip(invalid).enumerate() {
        if inv {
            continue;
        }
        if best == usize::MAX || score > best_score {
            best = a;
            best_score = score;
        }
    }
    best
}

/// Index of the largest score; first index wins ties.
pub fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (a, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = a;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    struct NoLookahead;

    impl RecurrentFn<()> for NoLookahead {
        fn recurrent(
            &mut self,
            _actions: &[usize],
            _embeddings: &[()],
        ) -> Result<(RecurrentFnOutput, Vec<()>), SearchError> {
            panic!("stub planner must not expand the tree");
        }
    }

    #[test]
    fn test_mask_invalid_actions() {
        let masked = mask_invalid_actions(&[1.0, 3.0, 2.0], &[false, false, true]);
        assert_eq!(masked[0], -2.0);
        assert_eq!(masked[1], 0.0);
        assert_eq!(masked[2], f32::MIN);
    }

    #[test]
    fn test_softmax_gives_zero_to_masked() {
        let p = softmax(&mask_invalid_actions(&[5.0, 1.0, 9.0], &[false, false, true]));
        assert_eq!(p[2], 0.0);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[0] > p[1]);
    }

    #[test]
    fn test_masked_argmax_skips_invalid() {
        assert_eq!(masked_argmax(&[9.0, 1.0, 2.0], &[true, false, false]), 2);
        assert_eq!(masked_argmax(&[0.0, 0.0], &[false, false]), 0);
        assert_eq!(
            masked_argmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY], &[true, false]),
            1
        );
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), 1);
    }

    #[test]
    fn test_prior_planner_respects_mask() {
        let mut rng = StdRng::seed_from_u64(0);
        let root = RootFnOutput {
            prior_logits: vec![vec![10.0, 0.0, 0.0], vec![0.0, 1.0, 2.0]],
            value: vec![0.0, 0.0],
            embedding: vec![(), ()],
        };
        let invalid = vec![vec![true, false, false], vec![false, false, false]];
        let out = PriorPlanner
            .plan(&mut rng, root, &mut NoLookahead, 8, &invalid)
            .unwrap();
        assert_eq!(out.action_weights[0][0], 0.0);
        assert_ne!(out.action[0], 0);
        assert_eq!(out.action[1], 2);
        for w in &out.action_weights {
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_root_without_legal_action_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let root = RootFnOutput {
            prior_logits: vec![vec![0.0, 0.0]],
            value: vec![0.0],
            embedding: vec![()],
        };
        let err = PriorPlanner
            .plan(&mut rng, root, &mut NoLookahead, 1, &[vec![true, true]])
            .unwrap_err();
        assert!(matches!(err, SearchError::NoLegalAction { lane: 0 }));
    }

    #[test]
    fn test_root_batch_mismatch_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let root = RootFnOutput {
            prior_logits: vec![vec![0.0, 0.0]],
            value: vec![0.0, 0.0],
            embedding: vec![()],
        };
        let err = PriorPlanner
            .plan(&mut rng, root, &mut NoLookahead, 1, &[vec![false, false]])
            .unwrap_err();
        assert!(matches!(err, SearchError::BatchMismatch { what: "root value", .. }));
    }

    #[test]
    fn test_non_finite_root_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let root = RootFnOutput {
            prior_logits: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            value: vec![0.0, f32::NAN],
            embedding: vec![(), ()],
        };
        let invalid = vec![vec![false, false]; 2];
        let err = PriorPlanner
            .plan(&mut rng, root, &mut NoLookahead, 1, &invalid)
            .unwrap_err();
        assert!(matches!(err, SearchError::NonFinite { what: "root value", lane: 1 }));

        let root = RootFnOutput {
            prior_logits: vec![vec![f32::NAN, 0.0]],
            value: vec![0.0],
            embedding: vec![()],
        };
        let err = PriorPlanner
            .plan(&mut rng, root, &mut NoLookahead, 1, &[vec![false, false]])
            .unwrap_err();
        assert!(matches!(err, SearchError::NonFinite { what: "root prior logits", lane: 0 }));
    }
}

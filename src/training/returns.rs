//! Value targets and truncation mask from a self-play trajectory.

use ndarray::{Array1, Array2, Zip};

use crate::error::TrainingError;

/// Per-step training targets, `[T, B]` like the trajectory they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub value_target: Array2<f32>,
    /// `true` where the step's game finished inside the horizon.
    pub mask: Array2<bool>,
}

/// Backward recurrence over time, all lanes at once.
///
/// ```text
/// value_target[T-1] = reward[T-1] + discount[T-1] * 0
/// value_target[t]   = reward[t]   + discount[t] * value_target[t+1]
/// mask[t]           = any(terminated[t..T])
/// ```
///
/// Because a reset lane's discount is 0, values never leak from one game into
/// the game before it. Steps of a game cut off by the horizon keep a
/// bootstrapped-from-zero target and are masked out of the value loss.
pub fn compute_returns(
    reward: &Array2<f32>,
    discount: &Array2<f32>,
    terminated: &Array2<bool>,
) -> Result<Targets, TrainingError> {
    if reward.dim() != discount.dim() || reward.dim() != terminated.dim() {
        return Err(TrainingError::Shape(format!(
            "reward {:?}, discount {:?}, terminated {:?}",
            reward.dim(),
            discount.dim(),
            terminated.dim()
        )));
    }
    let (horizon, lanes) = reward.dim();
    let mut value_target = Array2::<f32>::zeros((horizon, lanes));
    let mut mask = Array2::from_elem((horizon, lanes), false);

    let mut next_value = Array1::<f32>::zeros(lanes);
    let mut seen_terminal = Array1::from_elem(lanes, false);
    for t in (0..horizon).rev() {
        Zip::from(&mut next_value)
            .and(reward.row(t))
            .and(discount.row(t))
            .for_each(|v, &r, &d| *v = r + d * *v);
        value_target.row_mut(t).assign(&next_value);

        Zip::from(&mut seen_terminal)
            .and(terminated.row(t))
            .for_each(|seen, &done| *seen |= done);
        mask.row_mut(t).assign(&seen_terminal);
    }

    Ok(Targets { value_target, mask })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_single_game_alternates_sign() {
        let reward = array![[1.0f32], [1.0], [1.0]];
        let discount = array![[-1.0f32], [-1.0], [0.0]];
        let terminated = array![[false], [false], [true]];
        let targets = compute_returns(&reward, &discount, &terminated).unwrap();
        assert_eq!(targets.value_target, array![[1.0f32], [0.0], [1.0]]);
        assert_eq!(targets.mask, array![[true], [true], [true]]);
    }

    #[test]
    fn test_reset_does_not_leak_across_games() {
        // Game A: t=0..1, won by the mover at t=1. Game B: t=2..3, truncated.
        let reward = array![[0.0f32], [1.0], [0.0], [0.0]];
        let discount = array![[-1.0f32], [0.0], [-1.0], [-1.0]];
        let terminated = array![[false], [true], [false], [false]];
        let targets = compute_returns(&reward, &discount, &terminated).unwrap();
        assert_eq!(
            targets.value_target,
            array![[-1.0f32], [1.0], [0.0], [0.0]]
        );
        assert_eq!(targets.mask, array![[true], [true], [false], [false]]);
    }

    #[test]
    fn test_lanes_are_independent() {
        let reward = array![[0.0f32, 0.0], [-1.0, 0.0]];
        let discount = array![[-1.0f32, -1.0], [0.0, -1.0]];
        let terminated = array![[false, false], [true, false]];
        let targets = compute_returns(&reward, &discount, &terminated).unwrap();
        assert_eq!(targets.value_target, array![[1.0f32, 0.0], [-1.0, 0.0]]);
        assert_eq!(targets.mask, array![[true, false], [true, false]]);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let reward = Array2::<f32>::zeros((3, 2));
        let discount = Array2::<f32>::zeros((3, 1));
        let terminated = Array2::from_elem((3, 2), false);
        assert!(compute_returns(&reward, &discount, &terminated).is_err());
    }

    fn terminated_grid() -> impl Strategy<Value = (usize, usize, Vec<bool>)> {
        (1usize..12, 1usize..6).prop_flat_map(|(t, b)| {
            (Just(t), Just(b), proptest::collection::vec(any::<bool>(), t * b))
        })
    }

    proptest! {
        #[test]
        fn test_mask_is_reverse_suffix_or((t, b, flags) in terminated_grid()) {
            let terminated = Array2::from_shape_vec((t, b), flags).unwrap();
            let zeros = Array2::<f32>::zeros((t, b));
            let targets = compute_returns(&zeros, &zeros, &terminated).unwrap();
            for step in 0..t {
                for lane in 0..b {
                    let expected = (step..t).any(|s| terminated[[s, lane]]);
                    prop_assert_eq!(targets.mask[[step, lane]], expected);
                }
            }
        }

        #[test]
        fn test_terminal_step_target_is_its_reward(
            (t, b, flags) in terminated_grid(),
            r in -1.0f32..1.0,
        ) {
            let terminated = Array2::from_shape_vec((t, b), flags).unwrap();
            let reward = terminated.mapv(|d| if d { r } else { 0.0 });
            let discount = terminated.mapv(|d| if d { 0.0 } else { -1.0 });
            let targets = compute_returns(&reward, &discount, &terminated).unwrap();
            for ((step, lane), &done) in terminated.indexed_iter() {
                if done {
                    prop_assert_eq!(targets.value_target[[step, lane]], r);
                }
            }
        }
    }
}

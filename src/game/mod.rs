//! Game environments: the interface the self-play core drives, the auto-reset
//! stepping combinator, and two reference games.
//!
//! Environments are pure: `init` and `step` never mutate their inputs, so a
//! batch of lanes is just a `Vec` of states advanced in lockstep.

mod connect_four;
mod tic_tac_toe;

pub use connect_four::{Board, Cell, ConnectFour, ConnectFourState, COLS, ROWS};
pub use tic_tac_toe::{TicTacToe, TicTacToeState};

/// Number of players in every supported game.
pub const NUM_PLAYERS: usize = 2;

/// Identifier of a supported environment, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvId {
    ConnectFour,
    TicTacToe,
}

impl EnvId {
    pub fn name(self) -> &'static str {
        match self {
            EnvId::ConnectFour => "connect_four",
            EnvId::TicTacToe => "tic_tac_toe",
        }
    }
}

impl std::str::FromStr for EnvId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect_four" => Ok(EnvId::ConnectFour),
            "tic_tac_toe" => Ok(EnvId::TicTacToe),
            other => Err(format!(
                "unknown environment '{other}' (expected 'connect_four' or 'tic_tac_toe')"
            )),
        }
    }
}

/// Read-only view of one game position.
pub trait GameState: Clone + Send + Sync {
    /// Append this position's observation (from the mover's perspective) to `out`.
    fn observation_into(&self, out: &mut Vec<f32>);

    /// `true` at every action index that is legal in this position.
    /// All `false` once the game has terminated.
    fn legal_action_mask(&self) -> &[bool];

    fn terminated(&self) -> bool;

    /// Player to move, always 0 or 1.
    fn current_player(&self) -> usize;

    /// Reward each player received on the transition that produced this state.
    fn rewards(&self) -> [f32; NUM_PLAYERS];

    fn observation(&self) -> Vec<f32> {
        let mut out = Vec::new();
        self.observation_into(&mut out);
        out
    }
}

/// A two-player zero-sum game.
pub trait Environment: Send + Sync {
    type State: GameState;

    fn id(&self) -> EnvId;

    fn num_actions(&self) -> usize;

    /// Length of the flat observation vector.
    fn observation_size(&self) -> usize;

    /// Fresh game. The seed decides which player id moves first.
    fn init(&self, seed: u64) -> Self::State;

    /// Apply `action` for the player to move.
    ///
    /// Stepping a terminated state returns it unchanged with zero rewards.
    /// An illegal action ends the game as a loss for the mover.
    fn step(&self, state: &Self::State, action: usize) -> Self::State;
}

/// Result of [`auto_reset_step`]: the state the lane continues from plus what
/// happened on the transition itself.
#[derive(Debug, Clone)]
pub struct Transition<S> {
    /// Next state of the lane; a fresh game if the transition terminated.
    pub state: S,
    /// Rewards of the transition, read before any reset.
    pub rewards: [f32; NUM_PLAYERS],
    pub terminated: bool,
}

/// Step a lane and immediately replace it by `init(seed)` if the game ended,
/// so a batch never loses or duplicates a lane.
pub fn auto_reset_step<E: Environment>(
    env: &E,
    state: &E::State,
    action: usize,
    seed: u64,
) -> Transition<E::State> {
    let next = env.step(state, action);
    let rewards = next.rewards();
    let terminated = next.terminated();
    let state = if terminated { env.init(seed) } else { next };
    Transition {
        state,
        rewards,
        terminated,
    }
}

/// Flatten the observations of a batch into one row-major `[batch, obs]` buffer.
pub fn observe_batch_into<S: GameState>(states: &[S], out: &mut Vec<f32>) {
    out.clear();
    for state in states {
        state.observation_into(out);
    }
}

/// Per-lane `[num_actions]` masks, `true` where the action is illegal.
pub fn invalid_action_batch<S: GameState>(states: &[S]) -> Vec<Vec<bool>> {
    states
        .iter()
        .map(|s| s.legal_action_mask().iter().map(|&l| !l).collect())
        .collect()
}

/// Derive a deterministic seed for the `index`-th stream of `base_seed`.
pub fn derive_seed(base_seed: u64, index: u64) -> u64 {
    // Multiply-xorshift mix of both halves of the index.
    let mut hash = base_seed ^ 0x517c_c1b7_2722_0a95;
    hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    hash ^= index;
    hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    hash ^= index >> 32;
    hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    hash ^ (hash >> 29)
}

/// First player id for a fresh game.
fn first_player(seed: u64) -> usize {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    usize::from(rng.random::<bool>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_seed_deterministic() {
        assert_eq!(derive_seed(42, 100), derive_seed(42, 100));
    }

    #[test]
    fn test_derive_seed_varies() {
        let s1 = derive_seed(42, 0);
        let s2 = derive_seed(42, 1);
        let s3 = derive_seed(42, 2);
        assert_ne!(s1, s2);
        assert_ne!(s2, s3);
        assert_ne!(s1, s3);
        assert_ne!(derive_seed(1, 0), derive_seed(2, 0));
    }

    #[test]
    fn test_invalid_action_batch_inverts_legality() {
        let env = TicTacToe;
        let fresh = env.init(0);
        let moved = env.step(&fresh, 4);
        let mut finished = fresh.clone();
        for a in [0, 3, 1, 4, 2] {
            finished = env.step(&finished, a);
        }
        assert!(finished.terminated());

        let invalid = invalid_action_batch(&[fresh, moved, finished]);
        assert_eq!(invalid.len(), 3);
        assert!(invalid[0].iter().all(|&i| !i));
        assert_eq!(
            invalid[1].iter().filter(|&&i| i).count(),
            1,
            "only the occupied centre is illegal"
        );
        assert!(invalid[1][4]);
        assert!(invalid[2].iter().all(|&i| i));
    }

    #[test]
    fn test_first_player_uses_both_seats() {
        let firsts: Vec<usize> = (0..64).map(|i| first_player(derive_seed(7, i))).collect();
        assert!(firsts.contains(&0));
        assert!(firsts.contains(&1));
    }

    #[test]
    fn test_env_id_parse() {
        assert_eq!("connect_four".parse::<EnvId>(), Ok(EnvId::ConnectFour));
        assert_eq!("tic_tac_toe".parse::<EnvId>(), Ok(EnvId::TicTacToe));
        assert!("chess".parse::<EnvId>().is_err());
        assert_eq!(EnvId::ConnectFour.name(), "connect_four");
    }

    #[test]
    fn test_auto_reset_replaces_terminal_lane() {
        let env = TicTacToe;
        let mut state = env.init(3);
        // Mover plays 0, 1, 2 while the opponent plays 3, 4.
        for action in [0, 3, 1, 4] {
            let t = auto_reset_step(&env, &state, action, 99);
            assert!(!t.terminated);
            state = t.state;
        }
        let winner = state.current_player();
        let t = auto_reset_step(&env, &state, 2, 99);
        assert!(t.terminated);
        assert_eq!(t.rewards[winner], 1.0);
        assert_eq!(t.rewards[1 - winner], -1.0);
        // The lane continues from a fresh game.
        assert!(!t.state.terminated());
        assert_eq!(t.state.legal_action_mask().iter().filter(|&&m| m).count(), 9);
        assert_eq!(t.state.rewards(), [0.0, 0.0]);
    }

    #[test]
    fn test_auto_reset_keeps_live_lane() {
        let env = ConnectFour;
        let state = env.init(5);
        let t = auto_reset_step(&env, &state, 3, 11);
        assert!(!t.terminated);
        assert_eq!(t.state.current_player(), 1 - state.current_player());
        assert_eq!(t.rewards, [0.0, 0.0]);
    }

    #[test]
    fn test_observe_batch_layout() {
        let env = TicTacToe;
        let states = vec![env.init(0), env.step(&env.init(0), 4)];
        let mut buf = Vec::new();
        observe_batch_into(&states, &mut buf);
        assert_eq!(buf.len(), 2 * env.observation_size());
        assert_eq!(&buf[..env.observation_size()], states[0].observation().as_slice());
    }
}

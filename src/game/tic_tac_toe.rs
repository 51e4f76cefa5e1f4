use super::{first_player, EnvId, Environment, GameState, NUM_PLAYERS};

const CELLS: usize = 9;

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Tic-Tac-Toe position. Cells hold the owning player id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TicTacToeState {
    cells: [Option<usize>; CELLS],
    current_player: usize,
    legal: [bool; CELLS],
    terminated: bool,
    rewards: [f32; NUM_PLAYERS],
}

impl TicTacToeState {
    pub fn cell(&self, index: usize) -> Option<usize> {
        self.cells[index]
    }

    fn has_line(&self, player: usize) -> bool {
        LINES
            .iter()
            .any(|line| line.iter().all(|&i| self.cells[i] == Some(player)))
    }

    fn finish(&mut self, winner: Option<usize>) {
        self.terminated = true;
        self.legal = [false; CELLS];
        if let Some(winner) = winner {
            self.rewards[winner] = 1.0;
            self.rewards[1 - winner] = -1.0;
        }
    }
}

impl GameState for TicTacToeState {
    /// Two 3x3 planes: mover's marks then opponent's marks.
    fn observation_into(&self, out: &mut Vec<f32>) {
        let mover = self.current_player;
        out.extend(
            self.cells
                .iter()
                .map(|&c| if c == Some(mover) { 1.0 } else { 0.0 }),
        );
        out.extend(
            self.cells
                .iter()
                .map(|&c| if c == Some(1 - mover) { 1.0 } else { 0.0 }),
        );
    }

    fn legal_action_mask(&self) -> &[bool] {
        &self.legal
    }

    fn terminated(&self) -> bool {
        self.terminated
    }

    fn current_player(&self) -> usize {
        self.current_player
    }

    fn rewards(&self) -> [f32; NUM_PLAYERS] {
        self.rewards
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TicTacToe;

impl Environment for TicTacToe {
    type State = TicTacToeState;

    fn id(&self) -> EnvId {
        EnvId::TicTacToe
    }

    fn num_actions(&self) -> usize {
        CELLS
    }

    fn observation_size(&self) -> usize {
        2 * CELLS
    }

    fn init(&self, seed: u64) -> TicTacToeState {
        TicTacToeState {
            cells: [None; CELLS],
            current_player: first_player(seed),
            legal: [true; CELLS],
            terminated: false,
            rewards: [0.0; NUM_PLAYERS],
        }
    }

    fn step(&self, state: &TicTacToeState, action: usize) -> TicTacToeState {
        let mut next = *state;
        next.rewards = [0.0; NUM_PLAYERS];
        if state.terminated {
            return next;
        }

        let mover = state.current_player;
        if action >= CELLS || !state.legal[action] {
            next.finish(Some(1 - mover));
            return next;
        }

        next.cells[action] = Some(mover);
        next.legal[action] = false;
        if next.has_line(mover) {
            next.finish(Some(mover));
        } else if next.cells.iter().all(Option::is_some) {
            next.finish(None);
        } else {
            next.current_player = 1 - mover;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let env = TicTacToe;
        let state = env.init(0);
        assert!(!state.terminated());
        assert!(state.legal_action_mask().iter().all(|&m| m));
        assert_eq!(state.observation(), vec![0.0; 18]);
    }

    #[test]
    fn test_diagonal_win() {
        let env = TicTacToe;
        let mut state = env.init(4);
        let first = state.current_player();
        for action in [0, 1, 4, 2, 8] {
            state = env.step(&state, action);
        }
        assert!(state.terminated());
        assert_eq!(state.rewards()[first], 1.0);
        assert_eq!(state.rewards()[1 - first], -1.0);
    }

    #[test]
    fn test_draw() {
        let env = TicTacToe;
        let mut state = env.init(2);
        // x o x / x o o / o x x
        for action in [0, 1, 2, 4, 3, 5, 7, 6, 8] {
            assert!(!state.terminated());
            state = env.step(&state, action);
        }
        assert!(state.terminated());
        assert_eq!(state.rewards(), [0.0, 0.0]);
    }

    #[test]
    fn test_occupied_cell_is_illegal_and_loses() {
        let env = TicTacToe;
        let state = env.step(&env.init(0), 4);
        assert!(!state.legal_action_mask()[4]);
        let mover = state.current_player();
        let next = env.step(&state, 4);
        assert!(next.terminated());
        assert_eq!(next.rewards()[mover], -1.0);
    }

    #[test]
    fn test_observation_flips_with_mover() {
        let env = TicTacToe;
        let state = env.step(&env.init(0), 4);
        let obs = state.observation();
        assert_eq!(obs[4], 0.0);
        assert_eq!(obs[CELLS + 4], 1.0);
    }
}

use super::{first_player, EnvId, Environment, GameState, NUM_PLAYERS};

pub const ROWS: usize = 6;
pub const COLS: usize = 7;

const CONNECT: usize = 4;
const PLANE: usize = ROWS * COLS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    Empty,
    Red,
    Yellow,
}

impl Cell {
    fn opposite(self) -> Cell {
        match self {
            Cell::Red => Cell::Yellow,
            Cell::Yellow => Cell::Red,
            Cell::Empty => Cell::Empty,
        }
    }
}

/// Connect Four grid. Row 0 is the top, row 5 is the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; COLS]; ROWS],
}

impl Board {
    pub fn new() -> Self {
        Board {
            cells: [[Cell::Empty; COLS]; ROWS],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.cells[row][col]
    }

    pub fn is_column_full(&self, col: usize) -> bool {
        col >= COLS || self.cells[0][col] != Cell::Empty
    }

    pub fn is_full(&self) -> bool {
        (0..COLS).all(|col| self.is_column_full(col))
    }

    /// Lowest empty row of `col`, where the next piece would land.
    pub fn landing_row(&self, col: usize) -> Option<usize> {
        if col >= COLS {
            return None;
        }
        (0..ROWS).rev().find(|&row| self.cells[row][col] == Cell::Empty)
    }

    /// Drop a piece; returns the landing row, or `None` for a full or
    /// out-of-range column.
    pub fn drop_piece(&mut self, col: usize, cell: Cell) -> Option<usize> {
        let row = self.landing_row(col)?;
        self.cells[row][col] = cell;
        Some(row)
    }

    /// Whether the piece at (row, col) completes a line of four.
    pub fn check_win(&self, row: usize, col: usize) -> bool {
        let cell = self.get(row, col);
        if cell == Cell::Empty {
            return false;
        }
        [(0, 1), (1, 0), (1, 1), (1, -1)].iter().any(|&(dr, dc)| {
            1 + self.run_length(row, col, dr, dc, cell) + self.run_length(row, col, -dr, -dc, cell)
                >= CONNECT
        })
    }

    /// Count consecutive `cell` pieces starting next to (row, col) along (dr, dc).
    fn run_length(&self, row: usize, col: usize, dr: i32, dc: i32, cell: Cell) -> usize {
        let mut count = 0;
        let mut r = row as i32 + dr;
        let mut c = col as i32 + dc;
        while (0..ROWS as i32).contains(&r)
            && (0..COLS as i32).contains(&c)
            && self.cells[r as usize][c as usize] == cell
        {
            count += 1;
            r += dr;
            c += dc;
        }
        count
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect Four position. Red always moves first on the board; which player
/// id plays Red is decided by the init seed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectFourState {
    board: Board,
    to_move: Cell,
    red_player: usize,
    legal: [bool; COLS],
    terminated: bool,
    rewards: [f32; NUM_PLAYERS],
}

impl ConnectFourState {
    fn initial(red_player: usize) -> Self {
        ConnectFourState {
            board: Board::new(),
            to_move: Cell::Red,
            red_player,
            legal: [true; COLS],
            terminated: false,
            rewards: [0.0; NUM_PLAYERS],
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    fn player_of(&self, cell: Cell) -> usize {
        if cell == Cell::Red {
            self.red_player
        } else {
            1 - self.red_player
        }
    }

    fn finish(&mut self, winner: Option<usize>) {
        self.terminated = true;
        self.legal = [false; COLS];
        if let Some(winner) = winner {
            self.rewards[winner] = 1.0;
            self.rewards[1 - winner] = -1.0;
        }
    }
}

impl GameState for ConnectFourState {
    /// Three planes of `ROWS x COLS`: mover's pieces, opponent's pieces, and
    /// the landing cell of every legal column.
    fn observation_into(&self, out: &mut Vec<f32>) {
        let start = out.len();
        out.resize(start + 3 * PLANE, 0.0);
        let obs = &mut out[start..];
        let opponent = self.to_move.opposite();
        for row in 0..ROWS {
            for col in 0..COLS {
                let idx = row * COLS + col;
                match self.board.get(row, col) {
                    c if c == self.to_move => obs[idx] = 1.0,
                    c if c == opponent => obs[PLANE + idx] = 1.0,
                    _ => {}
                }
            }
        }
        for col in (0..COLS).filter(|&c| self.legal[c]) {
            if let Some(row) = self.board.landing_row(col) {
                obs[2 * PLANE + row * COLS + col] = 1.0;
            }
        }
    }

    fn legal_action_mask(&self) -> &[bool] {
        &self.legal
    }

    fn terminated(&self) -> bool {
        self.terminated
    }

    fn current_player(&self) -> usize {
        self.player_of(self.to_move)
    }

    fn rewards(&self) -> [f32; NUM_PLAYERS] {
        self.rewards
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectFour;

impl Environment for ConnectFour {
    type State = ConnectFourState;

    fn id(&self) -> EnvId {
        EnvId::ConnectFour
    }

    fn num_actions(&self) -> usize {
        COLS
    }

    fn observation_size(&self) -> usize {
        3 * PLANE
    }

    fn init(&self, seed: u64) -> ConnectFourState {
        ConnectFourState::initial(first_player(seed))
    }

    fn step(&self, state: &ConnectFourState, action: usize) -> ConnectFourState {
        let mut next = *state;
        next.rewards = [0.0; NUM_PLAYERS];
        if state.terminated {
            return next;
        }

        let mover = state.current_player();
        if action >= COLS || !state.legal[action] {
            next.finish(Some(1 - mover));
            return next;
        }

        let Some(row) = next.board.drop_piece(action, state.to_move) else {
            next.finish(Some(1 - mover));
            return next;
        };
        if next.board.check_win(row, action) {
            next.finish(Some(mover));
        } else if next.board.is_full() {
            next.finish(None);
        } else {
            next.to_move = state.to_move.opposite();
            for col in 0..COLS {
                next.legal[col] = !next.board.is_column_full(col);
            }
        }
        next
    }
}

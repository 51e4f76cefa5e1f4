use std::collections::VecDeque;

use super::selfplay::SelfplayOutput;

/// How one game ended inside a self-play trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameRecord {
    pub length: usize,
    /// Reward of the player who made the last move; `None` if the horizon
    /// cut the game off.
    pub final_reward: Option<f32>,
}

/// Split every lane of a trajectory into the games it contains. Each
/// iteration starts from fresh games, so a segment is either a whole game or
/// one cut off by the horizon.
pub fn game_records(traj: &SelfplayOutput) -> Vec<GameRecord> {
    let mut records = Vec::new();
    for lane in 0..traj.num_lanes() {
        let mut length = 0;
        for t in 0..traj.horizon() {
            length += 1;
            if traj.terminated[[t, lane]] {
                records.push(GameRecord {
                    length,
                    final_reward: Some(traj.reward[[t, lane]]),
                });
                length = 0;
            }
        }
        if length > 0 {
            records.push(GameRecord {
                length,
                final_reward: None,
            });
        }
    }
    records
}

/// Training metrics tracker with rolling window computations.
pub struct TrainingMetrics {
    games: VecDeque<GameRecord>,
    policy_losses: VecDeque<f32>,
    value_losses: VecDeque<f32>,
    capacity: usize,
    total_games: usize, // lifetime count of finished games, never capped
}

impl TrainingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TrainingMetrics {
            games: VecDeque::with_capacity(capacity),
            policy_losses: VecDeque::with_capacity(capacity),
            value_losses: VecDeque::with_capacity(capacity),
            capacity,
            total_games: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn record_game(&mut self, game: GameRecord) {
        if game.final_reward.is_some() {
            self.total_games += 1;
        }
        push_capped(&mut self.games, game, self.capacity);
    }

    pub fn record_trajectory(&mut self, traj: &SelfplayOutput) {
        for game in game_records(traj) {
            self.record_game(game);
        }
    }

    pub fn record_update(&mut self, policy_loss: f32, value_loss: f32) {
        push_capped(&mut self.policy_losses, policy_loss, self.capacity);
        push_capped(&mut self.value_losses, value_loss, self.capacity);
    }

    /// Mean policy and value loss over the last N updates.
    pub fn average_losses(&self, last_n: usize) -> (f32, f32) {
        (
            tail_mean(&self.policy_losses, last_n),
            tail_mean(&self.value_losses, last_n),
        )
    }

    /// Average length of the finished games among the last N recorded.
    pub fn average_game_length(&self, last_n: usize) -> f32 {
        let finished: Vec<usize> = self
            .games
            .iter()
            .rev()
            .take(last_n)
            .filter(|g| g.final_reward.is_some())
            .map(|g| g.length)
            .collect();
        if finished.is_empty() {
            return 0.0;
        }
        finished.iter().sum::<usize>() as f32 / finished.len() as f32
    }

    /// Share of the last N recorded games that the horizon cut off.
    pub fn truncated_rate(&self, last_n: usize) -> f32 {
        let n = self.games.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let truncated = self
            .games
            .iter()
            .rev()
            .take(n)
            .filter(|g| g.final_reward.is_none())
            .count();
        truncated as f32 / n as f32
    }

    /// Share of the last N finished games that ended without a winner.
    pub fn draw_rate(&self, last_n: usize) -> f32 {
        let finished: Vec<f32> = self
            .games
            .iter()
            .rev()
            .take(last_n)
            .filter_map(|g| g.final_reward)
            .collect();
        if finished.is_empty() {
            return 0.0;
        }
        finished.iter().filter(|&&r| r == 0.0).count() as f32 / finished.len() as f32
    }

    pub fn total_games(&self) -> usize {
        self.total_games
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
    queue.push_back(value);
    if queue.len() > capacity {
        queue.pop_front();
    }
}

fn tail_mean(values: &VecDeque<f32>, last_n: usize) -> f32 {
    let n = values.len().min(last_n);
    if n == 0 {
        return 0.0;
    }
    values.iter().rev().take(n).sum::<f32>() / n as f32
}

use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use log::{debug, info, log_enabled, Level};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::metrics::TrainingMetrics;
use super::returns::compute_returns;
use super::samples::Samples;
use super::selfplay::{SelfPlayEngine, SelfplayOutput};
use super::train_step::{train_step, ReplicaSet};
use crate::config::AppConfig;
use crate::error::{ConfigError, TrainingError};
use crate::game::{derive_seed, Environment};
use crate::network::PolicyValueModel;
use crate::search::Planner;

/// Games and losses the iteration log averages over.
const METRICS_WINDOW: usize = 1000;

/// Training settings, the `[training]` section of the config file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub max_num_iters: usize,
    /// Rows per update across all replicas.
    pub training_batch_size: usize,
    pub learning_rate: f64,
    pub num_replicas: usize,
    /// Emit an info-level iteration log every N iterations.
    pub log_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            max_num_iters: 400,
            training_batch_size: 16,
            learning_rate: 0.001,
            num_replicas: 1,
            log_interval: 1,
        }
    }
}

/// What one iteration did, written to the log as a JSON line.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IterationLog {
    pub iteration: usize,
    /// Wall-clock hours spent in iterations so far.
    pub hours: f64,
    /// Recorded (replica, step, lane) rows so far.
    pub frames: u64,
    /// Mean losses over this iteration's updates.
    pub policy_loss: f32,
    pub value_loss: f32,
    /// Mean losses over the recent updates window, across iterations.
    pub recent_policy_loss: f32,
    pub recent_value_loss: f32,
    pub num_updates: usize,
    pub games_finished: usize,
    pub avg_game_length: f32,
    pub truncated_rate: f32,
    pub draw_rate: f32,
}

impl IterationLog {
    pub fn to_json(&self) -> Result<String, TrainingError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Alternates parallel self-play on every replica with synchronized training
/// on the pooled trajectories.
pub struct TrainingLoop<E, P, B: AutodiffBackend, M, O> {
    env: E,
    planner: P,
    config: AppConfig,
    replicas: ReplicaSet<B, M, O>,
    rng: StdRng,
    iteration: usize,
    hours: f64,
    frames: u64,
    metrics: TrainingMetrics,
}

impl<E, P, B, M, O> TrainingLoop<E, P, B, M, O>
where
    E: Environment,
    P: Planner,
    B: AutodiffBackend,
    M: PolicyValueModel<B> + AutodiffModule<B>,
    M::InnerModule: PolicyValueModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// `replicas` must already hold `config.training.num_replicas` identical
    /// copies of the starting model.
    pub fn new(
        env: E,
        planner: P,
        config: AppConfig,
        replicas: ReplicaSet<B, M, O>,
    ) -> Result<Self, TrainingError> {
        config.validate()?;
        if env.id() != config.selfplay.env_id {
            return Err(ConfigError::Validation(format!(
                "environment is {} but selfplay.env_id is {}",
                env.id().name(),
                config.selfplay.env_id.name()
            ))
            .into());
        }
        if replicas.len() != config.training.num_replicas {
            return Err(TrainingError::ReplicaCount {
                expected: config.training.num_replicas,
                actual: replicas.len(),
            });
        }
        for replica in replicas.replicas() {
            if replica.model.num_actions() != env.num_actions() {
                return Err(TrainingError::Shape(format!(
                    "model has {} actions, {} has {}",
                    replica.model.num_actions(),
                    env.id().name(),
                    env.num_actions()
                )));
            }
        }

        let rng = StdRng::seed_from_u64(derive_seed(config.selfplay.seed, u64::MAX));
        Ok(TrainingLoop {
            env,
            planner,
            config,
            replicas,
            rng,
            iteration: 0,
            hours: 0.0,
            frames: 0,
            metrics: TrainingMetrics::with_capacity(METRICS_WINDOW),
        })
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn hours(&self) -> f64 {
        self.hours
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn replicas(&self) -> &ReplicaSet<B, M, O> {
        &self.replicas
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run iterations until `max_num_iters` is reached.
    pub fn run(&mut self) -> Result<Vec<IterationLog>, TrainingError> {
        let total = self.config.training.max_num_iters;
        info!(
            "training on {} for {} iterations: {} replicas x {} lanes, {} simulations",
            self.env.id().name(),
            total.saturating_sub(self.iteration),
            self.replicas.len(),
            self.config.lanes_per_replica(),
            self.config.selfplay.num_simulations
        );

        let mut logs = Vec::with_capacity(total.saturating_sub(self.iteration));
        while self.iteration < total {
            let log = self.run_iteration()?;
            if log.iteration % self.config.training.log_interval == 0 || log.iteration == total {
                info!("{}", log.to_json()?);
            }
            logs.push(log);
        }
        Ok(logs)
    }

    /// One iteration: self-play on every replica, targets, then one
    /// synchronized update per minibatch.
    pub fn run_iteration(&mut self) -> Result<IterationLog, TrainingError> {
        let start = Instant::now();
        let iteration_seed = derive_seed(self.config.selfplay.seed, self.iteration as u64);

        let trajectories = self.selfplay(iteration_seed)?;
        let mut parts = Vec::with_capacity(trajectories.len());
        for traj in trajectories {
            self.frames += traj.num_frames() as u64;
            self.metrics.record_trajectory(&traj);
            let targets = compute_returns(&traj.reward, &traj.discount, &traj.terminated)?;
            parts.push((traj, targets));
        }
        let samples = Samples::from_trajectories(&parts)?;

        let batches = samples.minibatches(
            &mut self.rng,
            self.replicas.len(),
            self.config.training.training_batch_size,
        );
        debug!(
            "iteration {}: {} rows, {} updates",
            self.iteration + 1,
            samples.len(),
            batches.len()
        );

        let mut policy_sum = 0.0f32;
        let mut value_sum = 0.0f32;
        for (update, batch) in batches.iter().enumerate() {
            let losses = train_step(
                &mut self.replicas,
                batch,
                self.config.training.learning_rate,
            )?;
            self.metrics
                .record_update(losses.policy_loss, losses.value_loss);
            policy_sum += losses.policy_loss;
            value_sum += losses.value_loss;
            if log_enabled!(Level::Debug) {
                debug!(
                    "update {update}: policy {:.4}, value {:.4}, replicas in sync: {}",
                    losses.policy_loss,
                    losses.value_loss,
                    self.replicas.in_sync()
                );
            }
        }

        self.iteration += 1;
        self.hours += start.elapsed().as_secs_f64() / 3600.0;

        let n = batches.len().max(1) as f32;
        let (recent_policy_loss, recent_value_loss) = self.metrics.average_losses(METRICS_WINDOW);
        Ok(IterationLog {
            iteration: self.iteration,
            hours: self.hours,
            frames: self.frames,
            policy_loss: policy_sum / n,
            value_loss: value_sum / n,
            recent_policy_loss,
            recent_value_loss,
            num_updates: batches.len(),
            games_finished: self.metrics.total_games(),
            avg_game_length: self.metrics.average_game_length(METRICS_WINDOW),
            truncated_rate: self.metrics.truncated_rate(METRICS_WINDOW),
            draw_rate: self.metrics.draw_rate(METRICS_WINDOW),
        })
    }

    /// Every replica plays its share of lanes on its own thread, against an
    /// inference copy of its model.
    fn selfplay(&self, iteration_seed: u64) -> Result<Vec<SelfplayOutput>, TrainingError> {
        let sp = &self.config.selfplay;
        let engine = SelfPlayEngine::new(
            &self.env,
            &self.planner,
            self.config.lanes_per_replica(),
            sp.num_simulations,
            sp.max_num_steps,
        );

        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .replicas
                .replicas()
                .iter()
                .enumerate()
                .map(|(r, replica)| {
                    let model = replica.model.valid();
                    let stats = replica.stats.clone();
                    let device = replica.device.clone();
                    let engine = &engine;
                    let seed = derive_seed(iteration_seed, r as u64);
                    scope.spawn(move || {
                        engine.run::<B::InnerBackend, _>(&model, &stats, &device, seed)
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(r, handle)| -> Result<SelfplayOutput, TrainingError> {
                    handle.join().map_err(|_| {
                        TrainingError::Worker(format!("self-play on replica {r} panicked"))
                    })?
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::adaptor::OptimizerAdaptor;
    use burn::optim::{Adam, AdamConfig};

    use crate::game::{EnvId, TicTacToe};
    use crate::network::{NormStats, PolicyValueNet, PolicyValueNetConfig};
    use crate::search::{GumbelMuZero, PriorPlanner};

    type TestBackend = Autodiff<NdArray<f32>>;
    type Net = PolicyValueNet<TestBackend>;
    type Adaptor = OptimizerAdaptor<Adam, Net, TestBackend>;

    fn small_config(num_replicas: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.selfplay.env_id = EnvId::TicTacToe;
        config.selfplay.seed = 11;
        config.selfplay.selfplay_batch_size = 4;
        config.selfplay.num_simulations = 2;
        config.selfplay.max_num_steps = 6;
        config.selfplay.max_num_considered_actions = 4;
        config.training.training_batch_size = 4;
        config.training.num_replicas = num_replicas;
        config.training.max_num_iters = 2;
        config.training.learning_rate = 1e-3;
        config.model.hidden_size = 8;
        config.model.num_blocks = 1;
        config
    }

    fn initial_model(config: &AppConfig) -> (Net, NormStats) {
        let net_config: PolicyValueNetConfig = config.model.net_config(18, 9);
        (net_config.init(&Default::default()), net_config.init_stats())
    }

    fn replicas(model: Net, stats: NormStats, n: usize) -> ReplicaSet<TestBackend, Net, Adaptor> {
        let devices = vec![Default::default(); n];
        ReplicaSet::broadcast(model, stats, &devices, || {
            AdamConfig::new().init::<TestBackend, Net>()
        })
    }

    #[test]
    fn test_runs_to_max_iters_and_counts_frames() {
        let config = small_config(2);
        let (model, stats) = initial_model(&config);
        let planner = GumbelMuZero::new(4, 1.0);
        let mut lp =
            TrainingLoop::new(TicTacToe, planner, config, replicas(model, stats, 2)).unwrap();

        let logs = lp.run().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(lp.iteration(), 2);
        // 2 replicas x 2 lanes x 6 steps per iteration
        assert_eq!(lp.frames(), 48);
        assert_eq!(logs[0].frames, 24);
        assert_eq!(logs[0].num_updates, 6);
        assert!(logs.iter().all(|l| l.policy_loss.is_finite() && l.value_loss.is_finite()));
        assert!(lp.hours() >= 0.0);
        assert!((0.0..=1.0).contains(&logs[1].draw_rate));

        // Six updates per iteration, all inside the recent window.
        let first = &logs[0];
        assert!((first.recent_policy_loss - first.policy_loss).abs() < 1e-5);
        assert!((first.recent_value_loss - first.value_loss).abs() < 1e-5);
        let both = &logs[1];
        let expected = (first.policy_loss + both.policy_loss) / 2.0;
        assert!((both.recent_policy_loss - expected).abs() < 1e-4);
        assert!(lp.replicas().in_sync());
    }

    #[test]
    fn test_same_seed_same_losses() {
        let config = small_config(1);
        let (model, stats) = initial_model(&config);

        let mut a = TrainingLoop::new(
            TicTacToe,
            PriorPlanner,
            config.clone(),
            replicas(model.clone(), stats.clone(), 1),
        )
        .unwrap();
        let mut b =
            TrainingLoop::new(TicTacToe, PriorPlanner, config, replicas(model, stats, 1)).unwrap();

        let la = a.run_iteration().unwrap();
        let lb = b.run_iteration().unwrap();
        assert_eq!(la.policy_loss.to_bits(), lb.policy_loss.to_bits());
        assert_eq!(la.value_loss.to_bits(), lb.value_loss.to_bits());
        assert_eq!(la.games_finished, lb.games_finished);
    }

    #[test]
    fn test_replica_count_must_match_config() {
        let config = small_config(2);
        let (model, stats) = initial_model(&config);
        let err = TrainingLoop::new(TicTacToe, PriorPlanner, config, replicas(model, stats, 1))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TrainingError::ReplicaCount {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_env_must_match_config() {
        let mut config = small_config(1);
        let (model, stats) = initial_model(&config);
        config.selfplay.env_id = EnvId::ConnectFour;
        let err = TrainingLoop::new(TicTacToe, PriorPlanner, config, replicas(model, stats, 1))
            .err()
            .unwrap();
        assert!(matches!(err, TrainingError::Config(_)));
    }

    #[test]
    fn test_iteration_log_is_one_json_line() {
        let log = IterationLog {
            iteration: 3,
            hours: 0.5,
            frames: 96,
            policy_loss: 1.25,
            value_loss: 0.5,
            recent_policy_loss: 1.5,
            recent_value_loss: 0.75,
            num_updates: 6,
            games_finished: 10,
            avg_game_length: 7.0,
            truncated_rate: 0.25,
            draw_rate: 0.1,
        };
        let json = log.to_json().unwrap();
        assert!(!json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["iteration"], 3);
        assert_eq!(value["frames"], 96);
    }
}

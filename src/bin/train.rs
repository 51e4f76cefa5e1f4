#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use clap::Parser;
use log::info;

use zero_selfplay::config::AppConfig;
use zero_selfplay::game::{ConnectFour, EnvId, Environment, TicTacToe};
use zero_selfplay::network::PolicyValueNet;
use zero_selfplay::search::GumbelMuZero;
use zero_selfplay::training::{ReplicaSet, TrainingLoop};

#[cfg(feature = "wgpu")]
type InferBackend = burn::backend::Wgpu<f32, i32>;
#[cfg(not(feature = "wgpu"))]
type InferBackend = burn::backend::NdArray<f32>;
type TrainBackend = Autodiff<InferBackend>;
type Net = PolicyValueNet<TrainBackend>;

/// Train a policy/value network by Gumbel MuZero self-play.
#[derive(Parser)]
#[command(name = "train", about = "Train a policy/value network by self-play")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override number of training iterations
    #[arg(long)]
    iters: Option<usize>,

    /// Override learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Override the base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of local replicas
    #[arg(long)]
    replicas: Option<usize>,

    /// Override the environment: connect_four or tic_tac_toe
    #[arg(long)]
    env: Option<EnvId>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    if let Some(iters) = cli.iters {
        config.training.max_num_iters = iters;
    }
    if let Some(lr) = cli.lr {
        config.training.learning_rate = lr;
    }
    if let Some(seed) = cli.seed {
        config.selfplay.seed = seed;
    }
    if let Some(replicas) = cli.replicas {
        config.training.num_replicas = replicas;
    }
    if let Some(env) = cli.env {
        config.selfplay.env_id = env;
    }
    config
        .validate()
        .context("validating configuration after command-line overrides")?;

    match config.selfplay.env_id {
        EnvId::ConnectFour => train(ConnectFour, config),
        EnvId::TicTacToe => train(TicTacToe, config),
    }
}

fn train<E: Environment>(env: E, config: AppConfig) -> Result<()> {
    let device = Default::default();
    let net_config = config
        .model
        .net_config(env.observation_size(), env.num_actions());
    let model: Net = net_config.init(&device);
    let devices = vec![device; config.training.num_replicas];
    let replicas = ReplicaSet::broadcast(model, net_config.init_stats(), &devices, || {
        AdamConfig::new().init::<TrainBackend, Net>()
    });
    let planner = GumbelMuZero::new(
        config.selfplay.max_num_considered_actions,
        config.selfplay.gumbel_scale,
    );

    let mut training =
        TrainingLoop::new(env, planner, config, replicas).context("setting up training")?;
    let logs = training.run().context("training failed")?;

    if let Some(last) = logs.last() {
        info!(
            "finished {} iterations in {:.3} h: {} frames, {} games, policy loss {:.4}, value loss {:.4}",
            last.iteration,
            last.hours,
            last.frames,
            last.games_finished,
            last.policy_loss,
            last.value_loss
        );
    }
    Ok(())
}

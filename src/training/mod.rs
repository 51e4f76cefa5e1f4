//! Self-play data generation, target computation and the replicated
//! training step, tied together by [`TrainingLoop`].

pub mod metrics;
pub mod returns;
pub mod samples;
pub mod selfplay;
pub mod train_step;
pub mod training_loop;

pub use metrics::{game_records, GameRecord, TrainingMetrics};
pub use returns::{compute_returns, Targets};
pub use samples::Samples;
pub use selfplay::{SelfPlayConfig, SelfPlayEngine, SelfplayOutput};
pub use train_step::{
    all_reduce_mean, loss_terms, train_step, ModelState, ReplicaSet, SampleTensors, TrainLosses,
};
pub use training_loop::{IterationLog, TrainingConfig, TrainingLoop};

//! Batched tree search.
//!
//! [`SearchOperator`] supplies one-step lookahead through the game rules,
//! scored by the network; a [`Planner`] turns root evaluations plus that
//! lookahead into an improved policy per lane.

mod gumbel;
mod operator;
mod planner;
pub mod qtransform;
mod tree;

pub use gumbel::GumbelMuZero;
pub use operator::SearchOperator;
pub use planner::{
    argmax, mask_invalid_actions, masked_argmax, softmax, Planner, PolicyOutput, PriorPlanner,
    RecurrentFn, RecurrentFnOutput, RootFnOutput,
};

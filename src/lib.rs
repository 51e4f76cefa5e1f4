//! # zero_selfplay
//!
//! AlphaZero-family self-play training for two-player zero-sum games.
//! A policy/value network proposes priors and values, a batched Gumbel tree
//! search turns them into improved move distributions, and those
//! distributions plus bootstrapped returns train the next network.
//!
//! ## Modules
//!
//! - [`game`]: Environment interface, auto-reset stepping, Connect Four and Tic-Tac-Toe
//! - [`network`]: Policy/value model interface and the burn reference network
//! - [`search`]: Search operator, planner interface, Gumbel MuZero and stub planners
//! - [`training`]: Self-play engine, return computation, replicated train step, loop
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

#![recursion_limit = "256"]

pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod search;
pub mod training;

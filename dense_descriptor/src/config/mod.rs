//! Configuration types for dense_descriptor.
//!
//! This module provides Burn-style configuration structs for the descriptor
//! network, response matching, accuracy evaluation, data and run paths.

mod data;
mod network;
mod training;

pub use data::{PairDataConfig, RunPaths};
pub use network::DescriptorNetConfig;
pub use training::{AccuracyConfig, MatchingConfig, TrainingConfig};

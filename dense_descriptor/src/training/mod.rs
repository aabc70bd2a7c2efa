//! Training infrastructure for dense descriptor learning.
//!
//! This module provides:
//! - `DescriptorTrainer`: Main training orchestrator
//! - SGD with momentum, global gradient clipping and a cyclic learning rate
//! - Running metrics, training state and metric sinks
//! - Checkpoint save/load for training resumption
//! - Reproducible per-epoch seeding

mod checkpoint;
mod display;
mod metrics;
mod optimizer;
mod schedule;
mod seed;
mod sink;
mod trainer;

pub use checkpoint::{
    checkpoint_exists, checkpoint_name, find_latest_checkpoint, load_checkpoint,
    load_checkpoint_config, save_checkpoint, Checkpoint, CheckpointMetadata, CHECKPOINT_VERSION,
};
pub use display::DisplayPanel;
pub use metrics::{AccuracyMeans, EpochSummary, RunningMean, StepOutcome, TrainingState};
pub use optimizer::{clip_scale, global_grad_norm, OptimizerConfig, SgdMomentum, StepStats};
pub use schedule::{CyclicLr, CyclicLrConfig, CyclicMode};
pub use seed::{sample_rng, EpochSeed};
pub use sink::{JsonLinesSink, LogSink, MemorySink, MetricsSink, Phase, ScalarEntry};
pub use trainer::{pair_loss, pair_responses, DescriptorTrainer, TrainerPhase, TrainingReport};

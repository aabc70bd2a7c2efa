//! Training configuration types.

use burn::config::Config;

use super::{DescriptorNetConfig, PairDataConfig, RunPaths};
use crate::error::DescriptorError;
use crate::training::{CyclicLrConfig, OptimizerConfig};

/// Configuration for soft response-map matching.
#[derive(Config, Debug)]
pub struct MatchingConfig {
    /// Sharpness of the soft threshold.
    #[config(default = 20.0)]
    pub scale: f32,

    /// Cosine similarity at which the soft threshold crosses 0.5.
    #[config(default = 0.9)]
    pub threshold: f32,

    /// Round-trip distance (pixels) for cross-checked display matches.
    #[config(default = 5.0)]
    pub cross_check_distance: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Pixel-distance thresholds of the three matching accuracy tiers.
#[derive(Config, Debug)]
pub struct AccuracyConfig {
    /// Tight tier; its ratio is the primary validation metric.
    #[config(default = 5.0)]
    pub tight: f32,

    /// Nominal tier.
    #[config(default = 10.0)]
    pub nominal: f32,

    /// Loose tier.
    #[config(default = 20.0)]
    pub loose: f32,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the descriptor trainer.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Descriptor network configuration.
    #[config(default = "DescriptorNetConfig::new()")]
    pub network: DescriptorNetConfig,

    /// Response-map matching configuration.
    #[config(default = "MatchingConfig::new()")]
    pub matching: MatchingConfig,

    /// Validation accuracy thresholds.
    #[config(default = "AccuracyConfig::new()")]
    pub accuracy: AccuracyConfig,

    /// Cyclic learning rate schedule.
    #[config(default = "CyclicLrConfig::new(1.0e-4, 1.0e-3)")]
    pub schedule: CyclicLrConfig,

    /// Optimizer configuration.
    #[config(default = "OptimizerConfig::new()")]
    pub optimizer: OptimizerConfig,

    /// Paired-frame data configuration.
    #[config(default = "PairDataConfig::new()")]
    pub data: PairDataConfig,

    /// Run directories and resume flags.
    #[config(default = "RunPaths::new()")]
    pub paths: RunPaths,

    /// Batch size of input samples.
    #[config(default = 8)]
    pub batch_size: usize,

    /// Number of data loader workers.
    #[config(default = 8)]
    pub num_workers: usize,

    /// Last epoch to run (inclusive).
    #[config(default = 100)]
    pub num_epochs: usize,

    /// Maximum number of iterations per epoch.
    #[config(default = 2000)]
    pub max_iterations_per_epoch: usize,

    /// Batch interval between diagnostic display panels.
    #[config(default = 10)]
    pub display_interval: usize,

    /// Epoch interval between validation passes.
    #[config(default = 1)]
    pub validation_interval: usize,

    /// Weight of the relative response loss.
    #[config(default = 1.0)]
    pub rr_weight: f32,

    /// Base seed; training epoch `e` uses `seed + e`, validation uses `seed`.
    #[config(default = 10086)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.network
            .validate()
            .map_err(DescriptorError::invalid_config)?;
        self.schedule
            .validate()
            .map_err(DescriptorError::invalid_config)?;
        self.data.validate().map_err(DescriptorError::invalid_config)?;

        if self.batch_size == 0 {
            return Err(DescriptorError::invalid_config("batch_size must be positive"));
        }
        if self.max_iterations_per_epoch == 0 {
            return Err(DescriptorError::invalid_config(
                "max_iterations_per_epoch must be positive",
            ));
        }
        if self.display_interval == 0 || self.validation_interval == 0 {
            return Err(DescriptorError::invalid_config(
                "display_interval and validation_interval must be positive",
            ));
        }
        if self.matching.scale <= 0.0 {
            return Err(DescriptorError::invalid_config("matching scale must be positive"));
        }
        let (tight, nominal, loose) = (
            self.accuracy.tight,
            self.accuracy.nominal,
            self.accuracy.loose,
        );
        if !(0.0 <= tight && tight <= nominal && nominal <= loose) {
            return Err(DescriptorError::invalid_config(format!(
                "accuracy thresholds must satisfy 0 <= tight <= nominal <= loose, got {}, {}, {}",
                tight, nominal, loose
            )));
        }
        if self.optimizer.gradient_clip < 0.0 {
            return Err(DescriptorError::invalid_config(
                "gradient_clip must be non-negative",
            ));
        }

        self.paths.resume_path()?;

        Ok(())
    }
}

//! # dense_descriptor
//!
//! Self-supervised dense descriptor learning for endoscopic video with Burn.
//!
//! A fully convolutional network maps every pixel of a color frame to a
//! unit-length descriptor. Training pairs two frames of the same sequence
//! with known pixel correspondences and pushes the soft matching response of
//! every query to peak at its true correspondence.
//!
//! ## Features
//!
//! - **Descriptor network**: densely connected fully convolutional `DescriptorNet`
//! - **Response maps**: soft thresholded cosine similarity per query
//! - **Relative response loss**: negative log of the normalized response at the truth
//! - **Matching accuracy**: arg-max hit ratios at three pixel thresholds
//! - **Training loop**: cyclic learning rate, clipped SGD momentum, NaN-skipping
//!   steps, resumable checkpoints
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dense_descriptor::{
//!     config::TrainingConfig,
//!     data::SyntheticPairSource,
//!     training::DescriptorTrainer,
//! };
//! use burn::backend::{Autodiff, NdArray};
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! // Create trainer
//! let config = TrainingConfig::default().with_num_epochs(10);
//! let device = Default::default();
//! let mut trainer = DescriptorTrainer::<MyBackend, _>::from_config(config.clone(), device)?;
//!
//! // Pair sources
//! let train = Arc::new(SyntheticPairSource::new(&config.data, 8, 200, 400));
//! let valid = Arc::new(SyntheticPairSource::new(&config.data, 2, 200, 50));
//!
//! // Train, validating and checkpointing every epoch
//! let report = trainer.fit(train, valid)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod matching;
pub mod nn;
pub mod training;

// Re-export key types for convenience
pub use config::{DescriptorNetConfig, TrainingConfig};
pub use error::{DescriptorError, Result};
pub use loss::RelativeResponseLoss;
pub use matching::{FeatureResponseGenerator, MatchingAccuracy, MatchingAccuracyMetric};
pub use nn::{DescriptorModel, DescriptorNet};
pub use training::{DescriptorTrainer, TrainingReport};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        AccuracyConfig, DescriptorNetConfig, MatchingConfig, PairDataConfig, RunPaths,
        TrainingConfig,
    };
    pub use crate::data::{
        gaussian_heatmap, EpochDataset, FramePairBatch, FramePairBatcher, FramePairItem,
        PairSource, SyntheticPairSource,
    };
    pub use crate::error::{DescriptorError, Result};
    pub use crate::loss::RelativeResponseLoss;
    pub use crate::matching::{
        cross_check_matches, keypoint_grid, FeatureResponseGenerator, KeypointMatch,
        MatchingAccuracy, MatchingAccuracyMetric,
    };
    pub use crate::nn::{l2_normalize, DescriptorModel, DescriptorNet, ParamSnapshot};
    pub use crate::training::{
        checkpoint_exists, find_latest_checkpoint, load_checkpoint, save_checkpoint,
        CheckpointMetadata, CyclicLrConfig, CyclicMode, DescriptorTrainer, EpochSummary,
        JsonLinesSink, LogSink, MemorySink, MetricsSink, OptimizerConfig, Phase, SgdMomentum,
        StepOutcome, TrainerPhase, TrainingReport, TrainingState,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::prelude::*;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_public_api() {
        // Verify that the public API is accessible
        let _config = TrainingConfig::default();
        let _net_config = DescriptorNetConfig::new();
        let _loss = RelativeResponseLoss::default();
    }

    #[test]
    fn test_model_creation() {
        let device = NdArrayDevice::Cpu;
        let config = DescriptorNetConfig::new()
            .with_feature_length(16)
            .with_filter_growth_rate(4)
            .with_out_chans_first_conv(8)
            .with_num_dense_layers(2);
        let model = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 10], &device);
        assert_eq!(model.forward(images).dims(), [1, 16, 8, 10]);
        assert_eq!(model.feature_length(), 16);
    }
}

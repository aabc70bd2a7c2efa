//! Data and run-directory configuration types.

use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use chrono::{Datelike, Local, Timelike};

use crate::error::DescriptorError;

/// Configuration of the paired-frame data a [`PairSource`](crate::data::PairSource)
/// produces.
#[derive(Config, Debug)]
pub struct PairDataConfig {
    /// Frame interval range `[min, max]` for a pair of video frames.
    #[config(default = "[1, 50]")]
    pub adjacent_range: [usize; 2],

    /// Input image downsampling rate.
    #[config(default = 4.0)]
    pub image_downsampling: f32,

    /// Network downsampling rate; input sizes are cropped to a multiple of it.
    #[config(default = 64)]
    pub network_downsampling: usize,

    /// Network input size `[height, width]`.
    #[config(default = "[256, 320]")]
    pub input_size: [usize; 2],

    /// Number of positive correspondence pairs per sample.
    #[config(default = 10)]
    pub sampling_size: usize,

    /// Fraction of SfM points kept after outlier pruning.
    #[config(default = 0.998)]
    pub inlier_percentage: f32,

    /// Sigma of the ground-truth heatmap Gaussian, in pixels.
    #[config(default = 5.0)]
    pub heatmap_sigma: f32,

    /// Minimum shared visibility (in frames) for a point to be sampled.
    #[config(default = 20)]
    pub visibility_overlap: usize,

    /// Patient ids to train on.
    #[config(default = "vec![]")]
    pub training_patient_ids: Vec<u32>,
}

impl Default for PairDataConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PairDataConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let [min_gap, max_gap] = self.adjacent_range;
        if min_gap == 0 || min_gap > max_gap {
            return Err(format!(
                "adjacent_range must satisfy 1 <= min <= max, got [{}, {}]",
                min_gap, max_gap
            ));
        }
        if self.input_size.iter().any(|&s| s == 0) {
            return Err("input_size must be positive".to_string());
        }
        if self.sampling_size == 0 {
            return Err("sampling_size must be positive".to_string());
        }
        if !(self.inlier_percentage > 0.0 && self.inlier_percentage <= 1.0) {
            return Err("inlier_percentage must be in (0, 1]".to_string());
        }
        if self.image_downsampling <= 0.0 || self.network_downsampling == 0 {
            return Err("downsampling rates must be positive".to_string());
        }
        Ok(())
    }
}

/// Filesystem locations and resume flags of a training run.
#[derive(Config, Debug)]
pub struct RunPaths {
    /// Root of the logging output; a timestamped run directory is created below it.
    #[config(default = "PathBuf::from(\"logs\")")]
    pub log_root: PathBuf,

    /// Root of the training data, when the pair source reads from disk.
    #[config(default = "None")]
    pub data_root: Option<PathBuf>,

    /// Root of precomputed intermediate data.
    #[config(default = "None")]
    pub precompute_root: Option<PathBuf>,

    /// Checkpoint directory to resume from.
    #[config(default = "None")]
    pub trained_model_path: Option<PathBuf>,

    /// Whether to resume from `trained_model_path`.
    #[config(default = false)]
    pub load_trained_model: bool,

    /// Whether the pair source may reuse precomputed intermediate data.
    #[config(default = false)]
    pub load_intermediate_data: bool,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl RunPaths {
    /// Path of the checkpoint to resume from, if resuming was requested.
    ///
    /// Fails when resuming is requested without a path, or when the path
    /// does not exist.
    pub fn resume_path(&self) -> crate::error::Result<Option<&Path>> {
        if !self.load_trained_model {
            return Ok(None);
        }
        let path = self
            .trained_model_path
            .as_deref()
            .ok_or(DescriptorError::ResumePathRequired)?;
        if !path.exists() {
            return Err(DescriptorError::CheckpointNotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(Some(path))
    }

    /// Check the data root and create the log, precompute and run directories.
    ///
    /// Returns the run directory `dense_descriptor_train_{month}_{day}_{hour}_{minute}`.
    pub fn prepare(&self) -> crate::error::Result<PathBuf> {
        if let Some(data_root) = &self.data_root {
            if !data_root.exists() {
                return Err(DescriptorError::DataRootMissing {
                    path: data_root.clone(),
                });
            }
        }
        self.resume_path()?;

        if let Some(precompute_root) = &self.precompute_root {
            fs::create_dir_all(precompute_root)?;
        }

        let now = Local::now();
        let run_dir = self.log_root.join(format!(
            "dense_descriptor_train_{}_{}_{}_{}",
            now.month(),
            now.day(),
            now.hour(),
            now.minute()
        ));
        fs::create_dir_all(&run_dir)?;
        log::info!("Created run directory at {}", run_dir.display());

        Ok(run_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_data_config() {
        let config = PairDataConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling_size, 10);
    }

    #[test]
    fn test_inverted_adjacent_range_rejected() {
        let config = PairDataConfig::new().with_adjacent_range([5, 2]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resume_without_path_is_fatal() {
        let paths = RunPaths::new().with_load_trained_model(true);
        assert!(matches!(
            paths.resume_path(),
            Err(DescriptorError::ResumePathRequired)
        ));
    }

    #[test]
    fn test_resume_with_missing_path_is_fatal() {
        let paths = RunPaths::new()
            .with_load_trained_model(true)
            .with_trained_model_path(Some(PathBuf::from("/nonexistent/checkpoint")));
        assert!(matches!(
            paths.resume_path(),
            Err(DescriptorError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_data_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let paths = RunPaths::new()
            .with_log_root(temp_dir.path().join("logs"))
            .with_data_root(Some(temp_dir.path().join("missing")));

        assert!(matches!(
            paths.prepare(),
            Err(DescriptorError::DataRootMissing { .. })
        ));
        // Nothing is created before the failure.
        assert!(!temp_dir.path().join("logs").exists());
    }

    #[test]
    fn test_prepare_creates_run_directory() {
        let temp_dir = TempDir::new().unwrap();
        let paths = RunPaths::new()
            .with_log_root(temp_dir.path().join("logs"))
            .with_data_root(Some(temp_dir.path().to_path_buf()))
            .with_precompute_root(Some(temp_dir.path().join("precompute")));

        let run_dir = paths.prepare().unwrap();
        assert!(run_dir.is_dir());
        assert!(run_dir.starts_with(temp_dir.path().join("logs")));
        assert!(temp_dir.path().join("precompute").is_dir());
    }
}

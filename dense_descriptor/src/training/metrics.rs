//! Training metrics, progress state and step outcomes.

use serde::{Deserialize, Serialize};

use crate::matching::MatchingAccuracy;

/// Incremental average of a scalar series.
///
/// Non-finite values are rejected and leave the mean unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; returns whether it was accepted.
    pub fn update(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        true
    }

    /// Current mean, 0 when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Number of accepted and held values.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Count a slot without a value, keeping the current mean.
    ///
    /// Later values are weighted as if the held slot had carried the mean.
    pub fn hold(&mut self) {
        self.count += 1;
    }

    /// Forget all values.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Running means of the three accuracy tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccuracyMeans {
    /// Tight tier.
    pub tight: RunningMean,
    /// Nominal tier.
    pub nominal: RunningMean,
    /// Loose tier.
    pub loose: RunningMean,
}

impl AccuracyMeans {
    /// Add one batch accuracy.
    pub fn update(&mut self, accuracy: &MatchingAccuracy) {
        self.tight.update(accuracy.tight as f64);
        self.nominal.update(accuracy.nominal as f64);
        self.loose.update(accuracy.loose as f64);
    }

    /// Current means as an accuracy triple.
    pub fn value(&self) -> MatchingAccuracy {
        MatchingAccuracy {
            tight: self.tight.mean() as f32,
            nominal: self.nominal.mean() as f32,
            loose: self.loose.mean() as f32,
        }
    }
}

/// Persistent training progress.
///
/// `epoch` is the next epoch to run. `epoch_progress` counts the batches
/// consumed by the current epoch, including skipped ones, while
/// `global_step` counts applied optimizer steps only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Next epoch to run.
    pub epoch: usize,
    /// Applied optimizer steps.
    pub global_step: usize,
    /// Validation batches evaluated.
    pub validation_step: usize,
    /// Batches consumed in the current epoch.
    pub epoch_progress: usize,
    /// Batches skipped because of a non-finite loss, over the whole run.
    pub skipped_steps: usize,
}

/// What happened to a single training batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The optimizer stepped.
    Applied {
        /// Loss value.
        loss: f32,
        /// Learning rate applied.
        lr: f64,
        /// Global gradient norm before clipping.
        grad_norm: f32,
    },
    /// The loss was not finite; no backward pass and no optimizer step ran.
    Skipped {
        /// Offending loss value.
        loss: f32,
    },
}

impl StepOutcome {
    /// Loss of the batch, finite or not.
    pub fn loss(&self) -> f32 {
        match self {
            Self::Applied { loss, .. } | Self::Skipped { loss } => *loss,
        }
    }

    /// Whether the optimizer stepped.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Summary of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    /// Epoch index.
    pub epoch: usize,
    /// Running mean of the batch losses; skipped batches hold the mean.
    pub mean_loss: f64,
    /// Batches consumed.
    pub batches: usize,
    /// Batches skipped because of a non-finite loss.
    pub skipped: usize,
    /// Learning rate of the last batch.
    pub last_lr: f64,
}

impl EpochSummary {
    /// Log the summary at `info`.
    pub fn log(&self) {
        log::info!(
            "Epoch {}: mean loss = {:.6} over {} batches ({} skipped), lr = {:.2e}",
            self.epoch,
            self.mean_loss,
            self.batches,
            self.skipped,
            self.last_lr
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut mean = RunningMean::new();
        for value in [1.0, 2.0, 3.0, 4.0] {
            assert!(mean.update(value));
        }
        assert!((mean.mean() - 2.5).abs() < 1e-12);
        assert_eq!(mean.count(), 4);
    }

    #[test]
    fn test_running_mean_rejects_non_finite() {
        let mut mean = RunningMean::new();
        mean.update(2.0);
        assert!(!mean.update(f64::NAN));
        assert!(!mean.update(f64::INFINITY));
        assert_eq!(mean.count(), 1);
        assert_eq!(mean.mean(), 2.0);

        mean.reset();
        assert_eq!(mean.count(), 0);
    }

    #[test]
    fn test_running_mean_hold_counts_slot() {
        let mut mean = RunningMean::new();
        mean.update(2.0);
        mean.hold();
        assert_eq!(mean.count(), 2);
        assert_eq!(mean.mean(), 2.0);

        // (2 * 2 + 5) / 3
        mean.update(5.0);
        assert_eq!(mean.count(), 3);
        assert!((mean.mean() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_state_starts_at_zero() {
        let state = TrainingState::default();
        assert_eq!(state.epoch, 0);
        assert_eq!(state.global_step, 0);
        assert_eq!(state.validation_step, 0);
    }

    #[test]
    fn test_accuracy_means() {
        let mut means = AccuracyMeans::default();
        means.update(&MatchingAccuracy {
            tight: 1.0,
            nominal: 1.0,
            loose: 1.0,
        });
        means.update(&MatchingAccuracy {
            tight: 0.0,
            nominal: 0.5,
            loose: 1.0,
        });
        assert_eq!(means.value().as_array(), [0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_step_outcome() {
        let skipped = StepOutcome::Skipped { loss: f32::NAN };
        assert!(!skipped.is_applied());
        assert!(skipped.loss().is_nan());
    }
}

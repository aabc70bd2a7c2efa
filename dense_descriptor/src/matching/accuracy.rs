//! Matching accuracy metric.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AccuracyConfig;

/// Fraction of queries whose arg-max lands within each distance tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingAccuracy {
    /// Ratio within the tight threshold; the primary validation metric.
    pub tight: f32,
    /// Ratio within the nominal threshold.
    pub nominal: f32,
    /// Ratio within the loose threshold.
    pub loose: f32,
}

impl MatchingAccuracy {
    /// Equal-weight average of two directions.
    pub fn average(&self, other: &Self) -> Self {
        Self {
            tight: 0.5 * self.tight + 0.5 * other.tight,
            nominal: 0.5 * self.nominal + 0.5 * other.nominal,
            loose: 0.5 * self.loose + 0.5 * other.loose,
        }
    }

    /// Ratios ordered tight, nominal, loose.
    pub fn as_array(&self) -> [f32; 3] {
        [self.tight, self.nominal, self.loose]
    }
}

/// Arg-max matching accuracy over response maps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingAccuracyMetric {
    thresholds: [f32; 3],
}

impl MatchingAccuracyMetric {
    /// Create a metric with tight, nominal and loose pixel thresholds.
    pub fn new(tight: f32, nominal: f32, loose: f32) -> Self {
        Self {
            thresholds: [tight, nominal, loose],
        }
    }

    /// Create a metric from an accuracy configuration.
    pub fn from_config(config: &AccuracyConfig) -> Self {
        Self::new(config.tight, config.nominal, config.loose)
    }

    /// Evaluate response maps against ground-truth target locations.
    ///
    /// Inputs:
    /// - response: [batch, samples, height, width]
    /// - target_locations: [batch, samples, 2] as (row, col)
    /// - boundaries: [batch, 1, height, width]
    ///
    /// A query is correct in a tier when the Euclidean distance between the
    /// arg-max of its masked field and the ground truth is at most the tier
    /// threshold. Ratios are taken over every query of the batch.
    pub fn evaluate<B: Backend>(
        &self,
        response: Tensor<B, 4>,
        target_locations: Tensor<B, 3>,
        boundaries: Tensor<B, 4>,
    ) -> MatchingAccuracy {
        let [batch, samples, height, width] = response.dims();
        let queries = batch * samples;
        if queries == 0 {
            return MatchingAccuracy::default();
        }

        let peaks: Vec<i64> = (response * boundaries)
            .reshape([batch, samples, height * width])
            .argmax(2)
            .into_data()
            .iter::<i64>()
            .collect();
        let truth: Vec<f32> = target_locations.into_data().iter::<f32>().collect();

        let mut hits = [0usize; 3];
        for (query, &peak) in peaks.iter().enumerate() {
            let row = (peak as usize / width) as f32;
            let col = (peak as usize % width) as f32;
            let d_row = row - truth[2 * query];
            let d_col = col - truth[2 * query + 1];
            let distance = (d_row * d_row + d_col * d_col).sqrt();

            for (tier, threshold) in self.thresholds.iter().enumerate() {
                if distance <= *threshold {
                    hits[tier] += 1;
                }
            }
        }

        let ratio = |count: usize| count as f32 / queries as f32;
        MatchingAccuracy {
            tight: ratio(hits[0]),
            nominal: ratio(hits[1]),
            loose: ratio(hits[2]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn peaked_response(
        peaks: &[(usize, usize)],
        height: usize,
        width: usize,
        device: &<TestBackend as Backend>::Device,
    ) -> Tensor<TestBackend, 4> {
        let mut values = vec![0.1f32; peaks.len() * height * width];
        for (field, &(row, col)) in peaks.iter().enumerate() {
            values[field * height * width + row * width + col] = 0.9;
        }
        Tensor::from_data(TensorData::new(values, [1, peaks.len(), height, width]), device)
    }

    #[test]
    fn test_exact_hit_counts_in_every_tier() {
        let device = Default::default();
        let metric = MatchingAccuracyMetric::new(5.0, 10.0, 20.0);

        let response = peaked_response(&[(3, 4)], 32, 32, &device);
        let truth = Tensor::<TestBackend, 3>::from_data([[[3.0, 4.0]]], &device);
        let boundaries = Tensor::ones([1, 1, 32, 32], &device);

        let accuracy = metric.evaluate(response, truth, boundaries);
        assert_eq!(accuracy.as_array(), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_far_miss_counts_nowhere() {
        let device = Default::default();
        let metric = MatchingAccuracyMetric::new(5.0, 10.0, 20.0);

        let response = peaked_response(&[(0, 0)], 32, 32, &device);
        let truth = Tensor::<TestBackend, 3>::from_data([[[30.0, 30.0]]], &device);
        let boundaries = Tensor::ones([1, 1, 32, 32], &device);

        let accuracy = metric.evaluate(response, truth, boundaries);
        assert_eq!(accuracy, MatchingAccuracy::default());
    }

    #[test]
    fn test_tiers_and_ratio() {
        let device = Default::default();
        let metric = MatchingAccuracyMetric::new(5.0, 10.0, 20.0);

        // Distances 0, 8 (nominal) and 15 (loose), 30 (miss).
        let response = peaked_response(&[(10, 10), (10, 18), (25, 10), (0, 0)], 32, 32, &device);
        let truth = Tensor::<TestBackend, 3>::from_data(
            [[[10.0, 10.0], [10.0, 10.0], [10.0, 10.0], [0.0, 30.0]]],
            &device,
        );
        let boundaries = Tensor::ones([1, 1, 32, 32], &device);

        let accuracy = metric.evaluate(response, truth, boundaries);
        assert_eq!(accuracy.as_array(), [0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_boundary_suppresses_peak() {
        let device = Default::default();
        let metric = MatchingAccuracyMetric::new(5.0, 10.0, 20.0);

        let mut values = vec![0.0f32; 16 * 16];
        values[0] = 1.0;
        values[8 * 16 + 8] = 0.5;
        let response = Tensor::<TestBackend, 4>::from_data(TensorData::new(values, [1, 1, 16, 16]), &device);
        let mut mask = vec![1.0f32; 16 * 16];
        mask[0] = 0.0;
        let boundaries = Tensor::from_data(TensorData::new(mask, [1, 1, 16, 16]), &device);
        let truth = Tensor::<TestBackend, 3>::from_data([[[8.0, 8.0]]], &device);

        assert_eq!(metric.evaluate(response, truth, boundaries).tight, 1.0);
    }

    #[test]
    fn test_average_directions() {
        let a = MatchingAccuracy {
            tight: 1.0,
            nominal: 1.0,
            loose: 1.0,
        };
        let b = MatchingAccuracy {
            tight: 0.0,
            nominal: 0.5,
            loose: 1.0,
        };
        assert_eq!(a.average(&b).as_array(), [0.5, 0.75, 1.0]);
    }
}

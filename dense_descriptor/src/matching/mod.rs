//! Soft pixel matching between descriptor fields.
//!
//! This module provides:
//! - `FeatureResponseGenerator`: per-query soft matching response maps
//! - `MatchingAccuracyMetric`: multi-threshold arg-max accuracy
//! - Cross-checked dense keypoint matching for diagnostics

mod accuracy;
mod cross_check;
mod response;

pub use accuracy::{MatchingAccuracy, MatchingAccuracyMetric};
pub use cross_check::{cross_check_matches, keypoint_grid, KeypointMatch};
pub use response::FeatureResponseGenerator;

use burn::prelude::*;

/// Flatten `[rows, cols]` column indices into indices of a `[rows * stride]` buffer.
///
/// Entry `(i, j)` becomes `i * stride + indices[i, j]`, in row-major order.
pub(crate) fn offset_indices<B: Backend>(indices: Tensor<B, 2, Int>, stride: usize) -> Tensor<B, 1, Int> {
    let [rows, cols] = indices.dims();
    let offsets = Tensor::<B, 1, Int>::arange(0..rows as i64, &indices.device())
        .mul_scalar(stride as i64)
        .reshape([rows, 1]);
    (indices + offsets).reshape([rows * cols])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_offset_indices() {
        let device = Default::default();
        let indices = Tensor::<TestBackend, 2, Int>::from_data([[0, 3], [1, 2]], &device);
        let flat: Vec<i64> = offset_indices(indices, 4).into_data().iter::<i64>().collect();
        assert_eq!(flat, vec![0, 3, 5, 6]);
    }
}

//! Cross-checked dense keypoint matching.
//!
//! Used to draw the learned correspondences of a display panel: keypoints in
//! the first frame are matched into the second frame by maximum cosine
//! similarity, matched back, and kept only when the round trip returns close
//! to where it started.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::nn::l2_normalize;

/// Similarity penalty pushing masked pixels out of the arg-max.
const MASK_PENALTY: f32 = 1.0e4;

/// A keypoint in the first frame and its match in the second, as (row, col).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointMatch {
    /// Keypoint location in the first frame.
    pub source: [f32; 2],
    /// Matched location in the second frame.
    pub target: [f32; 2],
}

/// Flattened indices of a regular grid of keypoints inside `boundary`.
///
/// `boundary` is a row-major `height * width` validity mask.
pub fn keypoint_grid(boundary: &[f32], height: usize, width: usize, step: usize) -> Vec<usize> {
    let step = step.max(1);
    let mut keypoints = Vec::new();
    for row in (step / 2..height).step_by(step) {
        for col in (step / 2..width).step_by(step) {
            let index = row * width + col;
            if boundary[index] > 0.5 {
                keypoints.push(index);
            }
        }
    }
    keypoints
}

/// Densely match keypoints from one feature map into another and back.
///
/// Inputs:
/// - source, target: [channels, height, width] feature maps of a single sample
/// - boundary: row-major `height * width` validity mask shared by both frames
/// - keypoints: flattened source pixel indices
/// - max_distance: largest allowed round-trip distance in pixels
pub fn cross_check_matches<B: Backend>(
    source: Tensor<B, 3>,
    target: Tensor<B, 3>,
    boundary: &[f32],
    keypoints: &[usize],
    max_distance: f32,
) -> Vec<KeypointMatch> {
    if keypoints.is_empty() {
        return Vec::new();
    }
    let [channels, height, width] = source.dims();
    let pixels = height * width;
    let device = source.device();

    let source = l2_normalize(source.reshape([channels, pixels]), 0);
    let target = l2_normalize(target.reshape([channels, pixels]), 0);
    let penalty = Tensor::<B, 1>::from_data(
        TensorData::new(
            boundary
                .iter()
                .map(|&valid| if valid > 0.5 { 0.0 } else { -MASK_PENALTY })
                .collect::<Vec<f32>>(),
            [pixels],
        ),
        &device,
    )
    .reshape([1, pixels]);

    let keypoint_index = Tensor::<B, 1, Int>::from_data(
        TensorData::new(
            keypoints.iter().map(|&k| k as i64).collect::<Vec<i64>>(),
            [keypoints.len()],
        ),
        &device,
    );

    let forward = best_match(source.clone(), target.clone(), keypoint_index, penalty.clone());
    let backward = best_match(target, source, forward.clone(), penalty);

    let forward: Vec<i64> = forward.into_data().iter::<i64>().collect();
    let backward: Vec<i64> = backward.into_data().iter::<i64>().collect();

    let to_row_col = |index: usize| [(index / width) as f32, (index % width) as f32];
    keypoints
        .iter()
        .zip(forward.iter().zip(backward.iter()))
        .filter_map(|(&start, (&matched, &returned))| {
            let start = to_row_col(start);
            let end = to_row_col(returned as usize);
            let distance = ((start[0] - end[0]).powi(2) + (start[1] - end[1]).powi(2)).sqrt();
            (distance <= max_distance).then(|| KeypointMatch {
                source: start,
                target: to_row_col(matched as usize),
            })
        })
        .collect()
}

/// For each selected column of `from`, the column of `into` with the highest similarity.
fn best_match<B: Backend>(
    from: Tensor<B, 2>,
    into: Tensor<B, 2>,
    columns: Tensor<B, 1, Int>,
    penalty: Tensor<B, 2>,
) -> Tensor<B, 1, Int> {
    let queries = from.select(1, columns).transpose();
    let [count, _] = queries.dims();
    (queries.matmul(into) + penalty).argmax(1).reshape([count])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_keypoint_grid_respects_boundary() {
        let mut boundary = vec![1.0f32; 8 * 8];
        boundary[2 * 8 + 2] = 0.0;
        let keypoints = keypoint_grid(&boundary, 8, 8, 4);
        assert_eq!(keypoints, vec![2 * 8 + 6, 6 * 8 + 2, 6 * 8 + 6]);
    }

    #[test]
    fn test_identical_maps_match_themselves() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 3>::random([16, 6, 6], Distribution::Normal(0.0, 1.0), &device);
        let boundary = vec![1.0f32; 36];
        let keypoints = keypoint_grid(&boundary, 6, 6, 2);

        let matches = cross_check_matches(features.clone(), features, &boundary, &keypoints, 0.0);

        assert_eq!(matches.len(), keypoints.len());
        for m in matches {
            assert_eq!(m.source, m.target);
        }
    }

    #[test]
    fn test_empty_keypoints() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 3>::zeros([4, 3, 3], &device);
        let matches = cross_check_matches(features.clone(), features, &[1.0; 9], &[], 5.0);
        assert!(matches.is_empty());
    }
}

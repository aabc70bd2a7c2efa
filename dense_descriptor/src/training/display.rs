//! Diagnostic display panels.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::FramePairBatch;
use crate::matching::{cross_check_matches, keypoint_grid, KeypointMatch};

/// Keypoints per image side on the display grid.
const KEYPOINTS_PER_SIDE: usize = 16;

/// Host copy of the first sample of a batch for visual inspection.
///
/// Images are row-major: colors are `[3, height, width]`, every other field
/// is `[height, width]`. Response fields hold the per-pixel maximum over
/// all queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayPanel {
    /// Image height.
    pub height: usize,
    /// Image width.
    pub width: usize,
    /// Sequence folder of the pair.
    pub folder: String,
    /// File names of both frames.
    pub frame_names: [String; 2],
    /// Both color frames.
    pub colors: [Vec<f32>; 2],
    /// Response fields living in frame 1 and frame 2.
    pub responses: [Vec<f32>; 2],
    /// Ground-truth heatmaps of both frames.
    pub heatmaps: [Vec<f32>; 2],
    /// Cross-checked learned matches from frame 1 into frame 2.
    pub matches: Vec<KeypointMatch>,
}

impl DisplayPanel {
    /// Build a panel from the first sample of a batch.
    ///
    /// `features` and `responses` are `[frame 1, frame 2]`: feature maps of
    /// both frames and the response maps located in each frame.
    pub fn from_batch<B: Backend>(
        batch: &FramePairBatch<B>,
        features: [Tensor<B, 4>; 2],
        responses: [Tensor<B, 4>; 2],
        cross_check_distance: f32,
    ) -> Self {
        let [_, _, height, width] = batch.colors_1.dims();

        let boundary = first_sample(batch.boundaries.clone());
        let step = (height.max(width) / KEYPOINTS_PER_SIDE).max(1);
        let keypoints = keypoint_grid(&boundary, height, width, step);

        let [features_1, features_2] = features;
        let matches = cross_check_matches(
            sample_features(features_1),
            sample_features(features_2),
            &boundary,
            &keypoints,
            cross_check_distance,
        );

        let [response_1, response_2] = responses;

        Self {
            height,
            width,
            folder: batch.folders.first().cloned().unwrap_or_default(),
            frame_names: batch.frame_names.first().cloned().unwrap_or_default(),
            colors: [
                first_sample(batch.colors_1.clone()),
                first_sample(batch.colors_2.clone()),
            ],
            responses: [peak_response(response_1), peak_response(response_2)],
            heatmaps: [
                first_sample(batch.heatmaps_1.clone()),
                first_sample(batch.heatmaps_2.clone()),
            ],
            matches,
        }
    }
}

fn first_sample<B: Backend>(tensor: Tensor<B, 4>) -> Vec<f32> {
    tensor.slice([0..1]).into_data().iter::<f32>().collect()
}

fn sample_features<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 3> {
    let [_, channels, height, width] = features.dims();
    features.slice([0..1]).reshape([channels, height, width])
}

fn peak_response<B: Backend>(response: Tensor<B, 4>) -> Vec<f32> {
    first_sample(response.slice([0..1]).max_dim(1))
}

//! Feature response generation.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use super::offset_indices;
use crate::config::MatchingConfig;
use crate::nn::l2_normalize;

/// Builds soft matching response maps from a pair of feature maps.
///
/// For every query location in the source map, the query descriptor is
/// compared by cosine similarity against every descriptor of the target map
/// and passed through `sigmoid(scale * (similarity - threshold))`. Pixels
/// outside the boundary mask respond with zero. Fields are not normalized,
/// every pixel lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureResponseGenerator {
    scale: f32,
    threshold: f32,
}

impl FeatureResponseGenerator {
    /// Create a generator with the given soft-threshold sharpness and center.
    pub fn new(scale: f32, threshold: f32) -> Self {
        Self { scale, threshold }
    }

    /// Create a generator from a matching configuration.
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.scale, config.threshold)
    }

    /// Response of a perfect match (cosine similarity of one).
    pub fn saturated_response(&self) -> f32 {
        1.0 / (1.0 + (-self.scale * (1.0 - self.threshold)).exp())
    }

    /// Compute response maps.
    ///
    /// Inputs:
    /// - source: [batch, channels, height, width] feature map the queries come from
    /// - target: [batch, channels, height, width] feature map searched for matches
    /// - source_locations: [batch, samples] flattened `row * width + col` indices in source
    /// - boundaries: [batch, 1, height, width] validity mask of the target
    ///
    /// Output: [batch, samples, height, width]
    pub fn generate<B: Backend>(
        &self,
        source: Tensor<B, 4>,
        target: Tensor<B, 4>,
        source_locations: Tensor<B, 2, Int>,
        boundaries: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = source.dims();
        let [_, samples] = source_locations.dims();
        let pixels = height * width;

        // One descriptor per row, so queries are a flat row selection.
        let rows = source
            .reshape([batch, channels, pixels])
            .swap_dims(1, 2)
            .reshape([batch * pixels, channels]);
        let queries = rows
            .select(0, offset_indices(source_locations, pixels))
            .reshape([batch, samples, channels]);

        let queries = l2_normalize(queries, 2);
        let target = l2_normalize(target.reshape([batch, channels, pixels]), 1);

        let similarity = queries.matmul(target);
        let response = sigmoid(similarity.sub_scalar(self.threshold).mul_scalar(self.scale));

        response.reshape([batch, samples, height, width]) * boundaries
    }
}

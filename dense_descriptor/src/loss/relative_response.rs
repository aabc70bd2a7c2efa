//! Relative response loss.

use burn::prelude::*;

use crate::matching::offset_indices;

/// Added to the normalized response before the logarithm.
pub const DEFAULT_EPS: f32 = 1.0e-10;

/// Loss that concentrates each response field at its true correspondence.
///
/// Every field is divided by its own sum, so `p_true` is the share of the
/// total response found at the ground-truth pixel:
///
/// L = Σ valid(true) * -ln(eps + p_true) / (1 + Σ valid(true))
///
/// where `valid(true)` is the boundary mask at the ground-truth pixel. The
/// loss is bounded below by `-ln(1 + eps)` and decreases as the true-location
/// response grows relative to the rest of its field. An all-zero field gives
/// a non-finite loss; callers are expected to check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeResponseLoss {
    eps: f32,
}

impl Default for RelativeResponseLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl RelativeResponseLoss {
    /// Create the loss with the default epsilon.
    pub fn new() -> Self {
        Self { eps: DEFAULT_EPS }
    }

    /// Create the loss with a custom epsilon.
    pub fn with_eps(eps: f32) -> Self {
        Self { eps }
    }

    /// Lower bound of the loss.
    pub fn lower_bound(&self) -> f32 {
        -(1.0 + self.eps).ln()
    }

    /// Compute the loss.
    ///
    /// Inputs:
    /// - response: [batch, samples, height, width] response fields
    /// - true_locations: [batch, samples] flattened ground-truth target pixels
    /// - boundaries: [batch, 1, height, width]
    ///
    /// Output: scalar loss of shape [1]
    pub fn forward<B: Backend>(
        &self,
        response: Tensor<B, 4>,
        true_locations: Tensor<B, 2, Int>,
        boundaries: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let [batch, samples, height, width] = response.dims();
        let pixels = height * width;

        let fields = response.reshape([batch * samples, pixels]);
        let normalized = fields.clone() / fields.sum_dim(1);

        let field_index = offset_indices(true_locations.clone().reshape([batch * samples, 1]), pixels);
        let p_true = normalized.reshape([batch * samples * pixels]).select(0, field_index);

        let valid = boundaries
            .reshape([batch * pixels])
            .select(0, offset_indices(true_locations, pixels));

        let losses = p_true.add_scalar(self.eps).log().neg();
        (valid.clone() * losses).sum() / valid.sum().add_scalar(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn field_with_peak(peak: f32, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        let mut values = vec![0.1f32; 9];
        values[4] = peak;
        Tensor::from_data(TensorData::new(values, [1, 1, 3, 3]), device)
    }

    fn loss_value(response: Tensor<TestBackend, 4>, boundaries: Tensor<TestBackend, 4>) -> f32 {
        let device = response.device();
        let truth = Tensor::<TestBackend, 2, Int>::from_data([[4]], &device);
        RelativeResponseLoss::new()
            .forward(response, truth, boundaries)
            .into_scalar()
    }

    #[test]
    fn test_matches_closed_form() {
        let device = Default::default();
        let boundaries = Tensor::ones([1, 1, 3, 3], &device);

        // p_true = 0.9 / (0.9 + 8 * 0.1) and one valid query.
        let p_true = 0.9f32 / 1.7;
        let expected = -(p_true + DEFAULT_EPS).ln() / 2.0;

        let loss = loss_value(field_with_peak(0.9, &device), boundaries);
        assert!((loss - expected).abs() < 1e-5, "{} vs {}", loss, expected);
    }

    #[test]
    fn test_masked_truth_contributes_nothing() {
        let device = Default::default();
        let mut mask = vec![1.0f32; 9];
        mask[4] = 0.0;
        let boundaries = Tensor::from_data(TensorData::new(mask, [1, 1, 3, 3]), &device);

        assert_eq!(loss_value(field_with_peak(0.9, &device), boundaries), 0.0);
    }

    #[test]
    fn test_monotonic_and_bounded() {
        let device = Default::default();
        let lower_bound = RelativeResponseLoss::new().lower_bound();

        let mut previous = f32::INFINITY;
        for peak in [0.1f32, 0.3, 0.6, 0.9, 1.0] {
            let boundaries = Tensor::ones([1, 1, 3, 3], &device);
            let loss = loss_value(field_with_peak(peak, &device), boundaries);
            assert!(loss < previous, "loss {} not below {}", loss, previous);
            assert!(loss >= lower_bound);
            previous = loss;
        }
    }

    #[test]
    fn test_all_zero_field_is_not_finite() {
        let device = Default::default();
        let response = Tensor::zeros([1, 1, 3, 3], &device);
        let boundaries = Tensor::ones([1, 1, 3, 3], &device);
        assert!(!loss_value(response, boundaries).is_finite());
    }
}

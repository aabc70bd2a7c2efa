//! Integration tests for response maps, the relative response loss and
//! matching accuracy working together.

use burn::backend::NdArray;
use burn::prelude::*;

use dense_descriptor::{
    loss::RelativeResponseLoss,
    matching::{FeatureResponseGenerator, MatchingAccuracyMetric},
};

type TestBackend = NdArray;

const HEIGHT: usize = 3;
const WIDTH: usize = 3;

/// Every pixel gets its own one-hot descriptor.
fn one_hot_features(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
    let pixels = HEIGHT * WIDTH;
    let mut values = vec![0.0f32; pixels * pixels];
    for pixel in 0..pixels {
        values[pixel * pixels + pixel] = 1.0;
    }
    Tensor::from_data(TensorData::new(values, [1, pixels, HEIGHT, WIDTH]), device)
}

fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
    tensor.into_data().iter::<f32>().next().unwrap()
}

#[test]
fn test_distinct_descriptors_give_near_zero_loss() {
    let device = Default::default();
    let features = one_hot_features(&device);
    let boundaries = Tensor::<TestBackend, 4>::ones([1, 1, HEIGHT, WIDTH], &device);
    let locations = Tensor::<TestBackend, 2, Int>::from_data(
        TensorData::new(vec![0i64, 4, 8], [1, 3]),
        &device,
    );

    let generator = FeatureResponseGenerator::new(20.0, 0.9);
    let response = generator.generate(
        features.clone(),
        features,
        locations.clone(),
        boundaries.clone(),
    );
    let loss = scalar(RelativeResponseLoss::new().forward(response, locations, boundaries));

    assert!(loss >= 0.0, "Expected non-negative loss, got {}", loss);
    assert!(loss < 1e-4, "Expected near-zero loss, got {}", loss);
}

#[test]
fn test_uniform_descriptors_give_log_area_loss() {
    let device = Default::default();
    let features = Tensor::<TestBackend, 4>::ones([1, 4, HEIGHT, WIDTH], &device);
    let boundaries = Tensor::<TestBackend, 4>::ones([1, 1, HEIGHT, WIDTH], &device);
    let locations = Tensor::<TestBackend, 2, Int>::from_data(
        TensorData::new(vec![1i64, 7], [1, 2]),
        &device,
    );

    let generator = FeatureResponseGenerator::new(20.0, 0.9);
    let response = generator.generate(
        features.clone(),
        features,
        locations.clone(),
        boundaries.clone(),
    );
    let loss = scalar(RelativeResponseLoss::new().forward(response, locations, boundaries));

    // Every pixel gets probability 1/9; two valid samples plus one in the denominator.
    let expected = 2.0 * (9.0f32).ln() / 3.0;
    assert!(
        (loss - expected).abs() < 1e-4,
        "Expected {}, got {}",
        expected,
        loss
    );
}

#[test]
fn test_distinct_descriptors_match_perfectly() {
    let device = Default::default();
    let features = one_hot_features(&device);
    let boundaries = Tensor::<TestBackend, 4>::ones([1, 1, HEIGHT, WIDTH], &device);
    let locations = Tensor::<TestBackend, 2, Int>::from_data(
        TensorData::new(vec![2i64, 6], [1, 2]),
        &device,
    );
    // (row, col) of flat locations 2 and 6.
    let targets = Tensor::<TestBackend, 3>::from_data(
        TensorData::new(vec![0.0f32, 2.0, 2.0, 0.0], [1, 2, 2]),
        &device,
    );

    let generator = FeatureResponseGenerator::new(20.0, 0.9);
    let response = generator.generate(features.clone(), features, locations, boundaries.clone());
    let accuracy = MatchingAccuracyMetric::new(0.5, 1.0, 2.0).evaluate(response, targets, boundaries);

    assert_eq!(accuracy.as_array(), [1.0, 1.0, 1.0]);
}

#[test]
fn test_masked_region_never_matches() {
    let device = Default::default();
    let features = Tensor::<TestBackend, 4>::ones([1, 4, HEIGHT, WIDTH], &device);
    let locations = Tensor::<TestBackend, 2, Int>::from_data(
        TensorData::new(vec![0i64], [1, 1]),
        &device,
    );
    // Only the last pixel is inside the boundary.
    let mut mask = vec![0.0f32; HEIGHT * WIDTH];
    mask[8] = 1.0;
    let boundaries =
        Tensor::<TestBackend, 4>::from_data(TensorData::new(mask, [1, 1, HEIGHT, WIDTH]), &device);
    let targets = Tensor::<TestBackend, 3>::from_data(
        TensorData::new(vec![0.0f32, 0.0], [1, 1, 2]),
        &device,
    );

    let generator = FeatureResponseGenerator::new(20.0, 0.9);
    let response = generator.generate(features.clone(), features, locations, boundaries.clone());

    let values: Vec<f32> = response.clone().into_data().iter::<f32>().collect();
    assert!(values[..8].iter().all(|&v| v == 0.0));
    assert!(values[8] > 0.0);

    // The arg-max sits at (2, 2), farther than 2 pixels from (0, 0).
    let accuracy = MatchingAccuracyMetric::new(0.5, 1.0, 2.0).evaluate(response, targets, boundaries);
    assert_eq!(accuracy.as_array(), [0.0, 0.0, 0.0]);
}

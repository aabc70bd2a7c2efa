//! Dense descriptor network.

use burn::module::{Module, ParamId};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d, Relu};
use burn::prelude::*;

use crate::config::DescriptorNetConfig;

/// Added under the square root when normalizing descriptors.
const NORM_EPS: f32 = 1.0e-12;

/// A network mapping color images to per-pixel descriptors.
///
/// This is the interface the trainer needs from the descriptor network:
/// a dense forward pass and stable parameter names, which checkpoints use to
/// restore parameters by name rather than by structure.
pub trait DescriptorModel<B: Backend>: Module<B> {
    /// Compute descriptors.
    ///
    /// Input: images of shape [batch, channels, height, width]
    /// Output: descriptors of shape [batch, feature_length, height, width]
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Descriptor length.
    fn feature_length(&self) -> usize;

    /// Stable, hierarchical names of every float parameter.
    fn parameter_names(&self) -> Vec<(ParamId, String)>;
}

impl DescriptorNetConfig {
    /// Initialize the network with Kaiming-normal (fan-in, ReLU gain) weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DescriptorNet<B> {
        let conv3x3 = |channels_in: usize, channels_out: usize| -> Conv2d<B> {
            Conv2dConfig::new([channels_in, channels_out], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_initializer(kaiming_relu())
                .init(device)
        };

        let stem = conv3x3(self.in_channels, self.out_chans_first_conv);

        let mut dense_layers = Vec::with_capacity(self.num_dense_layers);
        let mut channels = self.out_chans_first_conv;
        for _ in 0..self.num_dense_layers {
            dense_layers.push(conv3x3(channels, self.filter_growth_rate));
            channels += self.filter_growth_rate;
        }

        let head = Conv2dConfig::new([channels, self.feature_length], [1, 1])
            .with_initializer(kaiming_relu())
            .init(device);

        DescriptorNet {
            stem,
            dense_layers,
            head,
            activation: Relu::new(),
            normalize: self.normalize,
            feature_length: self.feature_length,
        }
    }
}

fn kaiming_relu() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}

/// Densely connected fully convolutional descriptor network.
///
/// Every dense layer sees the concatenation of the stem output and all
/// previous dense layer outputs; a 1x1 head projects the stack to the
/// descriptor length. Spatial resolution is preserved.
#[derive(Module, Debug)]
pub struct DescriptorNet<B: Backend> {
    stem: Conv2d<B>,
    dense_layers: Vec<Conv2d<B>>,
    head: Conv2d<B>,
    activation: Relu,
    normalize: bool,
    feature_length: usize,
}

impl<B: Backend> DescriptorModel<B> for DescriptorNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut stack = self.activation.forward(self.stem.forward(images));

        for layer in &self.dense_layers {
            let grown = self.activation.forward(layer.forward(stack.clone()));
            stack = Tensor::cat(vec![stack, grown], 1);
        }

        let descriptors = self.head.forward(stack);

        if self.normalize {
            l2_normalize(descriptors, 1)
        } else {
            descriptors
        }
    }

    fn feature_length(&self) -> usize {
        self.feature_length
    }

    fn parameter_names(&self) -> Vec<(ParamId, String)> {
        let mut names = Vec::with_capacity(2 * (self.dense_layers.len() + 2));
        push_conv_names(&mut names, "stem", &self.stem);
        for (i, layer) in self.dense_layers.iter().enumerate() {
            push_conv_names(&mut names, &format!("dense_layers.{}", i), layer);
        }
        push_conv_names(&mut names, "head", &self.head);
        names
    }
}

fn push_conv_names<B: Backend>(names: &mut Vec<(ParamId, String)>, prefix: &str, conv: &Conv2d<B>) {
    names.push((conv.weight.id, format!("{}.weight", prefix)));
    if let Some(bias) = &conv.bias {
        names.push((bias.id, format!("{}.bias", prefix)));
    }
}

/// Normalize `x` to unit L2 length along `dim`.
pub fn l2_normalize<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let norm = x
        .clone()
        .powf_scalar(2.0)
        .sum_dim(dim)
        .add_scalar(NORM_EPS)
        .sqrt();
    x / norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> DescriptorNetConfig {
        DescriptorNetConfig::new()
            .with_feature_length(8)
            .with_filter_growth_rate(4)
            .with_out_chans_first_conv(4)
            .with_num_dense_layers(2)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let net = small_config().init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 6, 5], &device);
        let descriptors = net.forward(images);

        assert_eq!(descriptors.dims(), [2, 8, 6, 5]);
    }

    #[test]
    fn test_descriptors_unit_length() {
        let device = Default::default();
        let net = small_config().init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random(
            [1, 3, 4, 4],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let descriptors = net.forward(images);
        let norms: Vec<f32> = descriptors
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .to_data()
            .to_vec()
            .unwrap();

        for norm in norms {
            assert!((norm - 1.0).abs() < 1e-3, "norm {}", norm);
        }
    }

    #[test]
    fn test_parameter_names() {
        let device = Default::default();
        let net = small_config().init::<TestBackend>(&device);

        let names: Vec<String> = net.parameter_names().into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            vec![
                "stem.weight",
                "stem.bias",
                "dense_layers.0.weight",
                "dense_layers.0.bias",
                "dense_layers.1.weight",
                "dense_layers.1.bias",
                "head.weight",
                "head.bias",
            ]
        );
    }
}

//! Descriptor network configuration types.

use burn::config::Config;

/// Configuration for the dense descriptor network.
///
/// The network is a densely connected fully convolutional stack: a stem
/// convolution, `num_dense_layers` layers that each append
/// `filter_growth_rate` channels to the running feature stack, and a 1x1 head
/// projecting to `feature_length` channels.
#[derive(Config, Debug)]
pub struct DescriptorNetConfig {
    /// Output channel dimension (descriptor length).
    #[config(default = 128)]
    pub feature_length: usize,

    /// Channels added by every dense layer.
    #[config(default = 10)]
    pub filter_growth_rate: usize,

    /// Output channels of the stem convolution.
    #[config(default = 16)]
    pub out_chans_first_conv: usize,

    /// Number of dense layers.
    #[config(default = 4)]
    pub num_dense_layers: usize,

    /// Number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Whether descriptors are L2-normalized along the channel axis.
    #[config(default = true)]
    pub normalize: bool,
}

impl DescriptorNetConfig {
    /// Channels entering the head after the last dense layer.
    pub fn stack_channels(&self) -> usize {
        self.out_chans_first_conv + self.num_dense_layers * self.filter_growth_rate
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_length == 0 {
            return Err("feature_length must be positive".to_string());
        }
        if self.out_chans_first_conv == 0 {
            return Err("out_chans_first_conv must be positive".to_string());
        }
        if self.in_channels == 0 {
            return Err("in_channels must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network_config() {
        let config = DescriptorNetConfig::new();
        assert_eq!(config.feature_length, 128);
        assert_eq!(config.filter_growth_rate, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stack_channels() {
        let config = DescriptorNetConfig::new()
            .with_out_chans_first_conv(8)
            .with_num_dense_layers(3)
            .with_filter_growth_rate(4);
        assert_eq!(config.stack_channels(), 8 + 3 * 4);
    }

    #[test]
    fn test_zero_feature_length_rejected() {
        let config = DescriptorNetConfig::new().with_feature_length(0);
        assert!(config.validate().is_err());
    }
}

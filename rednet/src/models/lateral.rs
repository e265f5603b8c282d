//! Lateral adapters between encoder and decoder.
//!
//! Each encoder scale is reduced to the channel width the decoder holds at
//! the matching fusion point with a 1x1 convolution, batch norm and ReLU,
//! so the two features can be fused additively.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use super::conv_initializer;

/// Channel-width-matching transform applied to an encoder feature before it
/// is added into the decoder path.
#[derive(Module, Debug)]
pub struct LateralAdapter<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> LateralAdapter<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = self.bn.forward(out);
        self.relu.forward(out)
    }

    /// Create a new lateral adapter.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self {
            conv,
            bn,
            relu: Relu::new(),
        }
    }
}

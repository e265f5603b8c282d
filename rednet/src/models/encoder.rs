//! Residual encoder building blocks.
//!
//! The bottleneck blocks and stage composition follow the torchvision ResNet
//! lineage: within a stage, the first block carries the stage stride and the
//! projection shortcut, and the remaining blocks are identity-shaped at the
//! expanded channel width.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use super::conv_initializer;

/// Fixed multiplier between a bottleneck's internal working width and its
/// output channel width.
pub(crate) const BOTTLENECK_EXPANSION: usize = 4;

/// Input stem: 7x7 stride-2 convolution, batch norm, ReLU.
///
/// Max pooling is deliberately not part of the stem: its output is retained
/// as the first fusion scale, and the caller pools afterwards.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> Stem<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = self.bn.forward(out);
        self.relu.forward(out)
    }

    /// Create a new stem.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
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

/// Bottleneck residual block: 1x1 reduce, 3x3 spatial (carrying the block
/// stride), 1x1 expand to `planes * 4`, with an optional projection
/// shortcut.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv3.forward(out);
        let out = self.bn3.forward(out);

        let out = match &self.downsample {
            Some(downsample) => out + downsample.forward(identity),
            None => out + identity,
        };

        self.relu.forward(out)
    }

    /// Create a new bottleneck block.
    ///
    /// The shortcut is an identity whenever `inplanes` already equals the
    /// expanded output width and the stride is 1; otherwise the input is
    /// projected with a strided 1x1 convolution.
    pub fn new(inplanes: usize, planes: usize, stride: usize, device: &Device<B>) -> Self {
        let expanded = planes * BOTTLENECK_EXPANSION;

        // conv1x1 reduce
        let conv1 = Conv2dConfig::new([inplanes, planes], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn1 = BatchNormConfig::new(planes).init(device);

        // conv3x3, stride lives here
        let conv2 = Conv2dConfig::new([planes, planes], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn2 = BatchNormConfig::new(planes).init(device);

        // conv1x1 expand
        let conv3 = Conv2dConfig::new([planes, expanded], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn3 = BatchNormConfig::new(expanded).init(device);

        let downsample = (stride != 1 || inplanes != expanded)
            .then(|| Downsample::new(inplanes, expanded, stride, device));

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }
}

/// Projection shortcut: a 1x1 convolution reducing the resolution and
/// adjusting the channel count, followed by batch norm.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }

    /// Create a new projection shortcut.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }
}

/// Ordered sequence of bottleneck blocks forming one encoder scale.
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> EncoderStage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Create a stage of `num_blocks` bottleneck blocks.
    ///
    /// Only the first block may change stride or channel width; the rest
    /// operate at `planes * 4` with stride 1 and identity shortcuts.
    pub fn new(
        num_blocks: usize,
        inplanes: usize,
        planes: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let mut blocks = Vec::with_capacity(num_blocks);
        blocks.push(Bottleneck::new(inplanes, planes, stride, device));
        for _ in 1..num_blocks {
            blocks.push(Bottleneck::new(
                planes * BOTTLENECK_EXPANSION,
                planes,
                1,
                device,
            ));
        }

        Self { blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn stem_halves_resolution() {
        let device = Default::default();
        let stem = Stem::<TestBackend>::new(3, 64, &device);

        let input = Tensor::zeros([1, 3, 64, 64], &device);
        assert_eq!(stem.forward(input).dims(), [1, 64, 32, 32]);
    }

    #[test]
    fn bottleneck_expands_channels_and_applies_stride() {
        let device = Default::default();
        let block = Bottleneck::<TestBackend>::new(256, 128, 2, &device);

        let input = Tensor::zeros([2, 256, 16, 16], &device);
        assert_eq!(block.forward(input).dims(), [2, 512, 8, 8]);
        assert!(block.downsample.is_some());
    }

    #[test]
    fn bottleneck_identity_when_shape_is_preserved() {
        let device = Default::default();
        let block = Bottleneck::<TestBackend>::new(256, 64, 1, &device);

        let input = Tensor::zeros([1, 256, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 256, 8, 8]);
        assert!(block.downsample.is_none());
    }

    #[test]
    fn stage_projects_only_in_first_block() {
        let device = Default::default();
        let stage = EncoderStage::<TestBackend>::new(4, 256, 128, 2, &device);

        assert_eq!(stage.blocks.len(), 4);
        assert!(stage.blocks[0].downsample.is_some());
        assert!(stage.blocks[1..]
            .iter()
            .all(|block| block.downsample.is_none()));

        let input = Tensor::zeros([1, 256, 16, 16], &device);
        assert_eq!(stage.forward(input).dims(), [1, 512, 8, 8]);
    }

    #[test]
    fn batch_norm_starts_at_unit_scale_zero_shift() {
        let device = Default::default();
        let stem = Stem::<TestBackend>::new(3, 64, &device);

        let gamma_mean: f32 = stem.bn.gamma.val().mean().into_scalar();
        let beta_abs_sum: f32 = stem.bn.beta.val().abs().sum().into_scalar();
        assert!((gamma_mean - 1.0).abs() < 1e-6);
        assert!(beta_abs_sum < 1e-6);
    }
}

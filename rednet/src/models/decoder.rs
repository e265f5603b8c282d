//! Transpose-residual decoder building blocks.
//!
//! Decoder stages invert the encoder's composition: the identity blocks run
//! first, at the pre-upsample channel width, and the single stride-carrying
//! block comes last. This keeps the transposed convolution isolated to one
//! block per stage.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use super::{conv_initializer, deconv_initializer};

/// Second convolution of a transpose block: fractionally strided when the
/// block upsamples, a plain 3x3 otherwise.
#[derive(Module, Debug)]
enum SpatialConv<B: Backend> {
    Plain(Conv2d<B>),
    Strided(ConvTranspose2d<B>),
}

impl<B: Backend> SpatialConv<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Plain(conv) => conv.forward(input),
            Self::Strided(conv) => conv.forward(input),
        }
    }
}

/// Transpose-residual block: 3x3 convolution at the input width, then a
/// second convolution to `planes` channels which is the sole
/// resolution-increasing operator in the network when the block carries a
/// stride.
#[derive(Module, Debug)]
pub struct TransBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: SpatialConv<B>,
    bn2: BatchNorm<B, 2>,
    upsample: Option<TransShortcut<B>>,
}

impl<B: Backend> TransBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);

        let out = match &self.upsample {
            Some(upsample) => out + upsample.forward(identity),
            None => out + identity,
        };

        self.relu.forward(out)
    }

    /// Create a new transpose-residual block.
    ///
    /// A stride other than 1 selects a kernel-3 transposed convolution with
    /// output padding 1 for the second convolution, so the output spatial
    /// size is exactly `stride` times the input.
    pub fn new(inplanes: usize, planes: usize, stride: usize, device: &Device<B>) -> Self {
        let conv1 = Conv2dConfig::new([inplanes, inplanes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(conv_initializer())
            .init(device);
        let bn1 = BatchNormConfig::new(inplanes).init(device);

        let conv2 = if stride == 1 {
            SpatialConv::Plain(
                Conv2dConfig::new([inplanes, planes], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_bias(false)
                    .with_initializer(conv_initializer())
                    .init(device),
            )
        } else {
            SpatialConv::Strided(
                ConvTranspose2dConfig::new([inplanes, planes], [3, 3])
                    .with_stride([stride, stride])
                    .with_padding([1, 1])
                    .with_padding_out([1, 1])
                    .with_bias(false)
                    .with_initializer(deconv_initializer())
                    .init(device),
            )
        };
        let bn2 = BatchNormConfig::new(planes).init(device);

        let upsample = (stride != 1 || inplanes != planes)
            .then(|| TransShortcut::new(inplanes, planes, stride, device));

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            upsample,
        }
    }
}

/// Shortcut path of a transpose block: a kernel-2 stride-2 transposed
/// convolution when upsampling, a 1x1 convolution when only the channel
/// width changes, always followed by batch norm.
#[derive(Module, Debug)]
pub struct TransShortcut<B: Backend> {
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> TransShortcut<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }

    /// Create a new shortcut.
    pub fn new(inplanes: usize, planes: usize, stride: usize, device: &Device<B>) -> Self {
        let conv = if stride == 1 {
            SpatialConv::Plain(
                Conv2dConfig::new([inplanes, planes], [1, 1])
                    .with_padding(PaddingConfig2d::Valid)
                    .with_bias(false)
                    .with_initializer(conv_initializer())
                    .init(device),
            )
        } else {
            SpatialConv::Strided(
                ConvTranspose2dConfig::new([inplanes, planes], [2, 2])
                    .with_stride([stride, stride])
                    .with_bias(false)
                    .with_initializer(deconv_initializer())
                    .init(device),
            )
        };
        let bn = BatchNormConfig::new(planes).init(device);

        Self { conv, bn }
    }
}

/// Ordered sequence of transpose-residual blocks forming one decoder scale.
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    blocks: Vec<TransBlock<B>>,
}

impl<B: Backend> DecoderStage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Create a stage of `num_blocks` transpose-residual blocks.
    ///
    /// The first `num_blocks - 1` blocks refine at the input width with
    /// stride 1; the last block carries the stage stride and, when the
    /// stride or channel width changes, the projection shortcut.
    pub fn new(
        num_blocks: usize,
        inplanes: usize,
        planes: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 1..num_blocks {
            blocks.push(TransBlock::new(inplanes, inplanes, 1, device));
        }
        blocks.push(TransBlock::new(inplanes, planes, stride, device));

        Self { blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn trans_block_doubles_resolution_when_strided() {
        let device = Default::default();
        let block = TransBlock::<TestBackend>::new(256, 128, 2, &device);

        let input = Tensor::zeros([1, 256, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 128, 16, 16]);
        assert!(block.upsample.is_some());
    }

    #[test]
    fn trans_block_projects_on_channel_change_without_stride() {
        let device = Default::default();
        let block = TransBlock::<TestBackend>::new(128, 64, 1, &device);

        let input = Tensor::zeros([1, 128, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 64, 8, 8]);
        assert!(block.upsample.is_some());
    }

    #[test]
    fn trans_block_identity_when_shape_is_preserved() {
        let device = Default::default();
        let block = TransBlock::<TestBackend>::new(64, 64, 1, &device);

        let input = Tensor::zeros([2, 64, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [2, 64, 8, 8]);
        assert!(block.upsample.is_none());
    }

    #[test]
    fn stage_projects_only_in_last_block() {
        let device = Default::default();
        let stage = DecoderStage::<TestBackend>::new(4, 256, 128, 2, &device);

        assert_eq!(stage.blocks.len(), 4);
        let (last, rest) = stage.blocks.split_last().unwrap();
        assert!(last.upsample.is_some());
        assert!(rest.iter().all(|block| block.upsample.is_none()));

        let input = Tensor::zeros([1, 256, 8, 8], &device);
        assert_eq!(stage.forward(input).dims(), [1, 128, 16, 16]);
    }

    #[test]
    fn single_block_stage_still_upsamples() {
        let device = Default::default();
        let stage = DecoderStage::<TestBackend>::new(1, 64, 64, 2, &device);

        assert_eq!(stage.blocks.len(), 1);
        let input = Tensor::zeros([1, 64, 4, 4], &device);
        assert_eq!(stage.forward(input).dims(), [1, 64, 8, 8]);
    }
}

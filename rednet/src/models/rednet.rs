//! # RedNet model implementation
//!
//! The encoder side is a ResNet-50-style bottleneck stack whose per-stage
//! outputs (`fuse0` through `fuse4`) are all retained. The decoder consumes
//! the deepest feature and upsamples it back to the input resolution in four
//! stride-2 stages, additively fusing a lateral-adapted encoder feature
//! after every stage. A final stride-1 refinement stage and a kernel-2
//! transposed convolution produce full-resolution class logits.
//!
//! Training-mode forward passes additionally emit four auxiliary logit maps,
//! one per decoder scale, tapped before each fusion. The two regimes are
//! separate, statically-typed entry points ([`RedNet::forward`] and
//! [`RedNet::forward_train`]) rather than a mutable mode flag, so the output
//! arity is fixed by the method signature.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use super::{
    conv_initializer,
    deconv_initializer,
    decoder::DecoderStage,
    encoder::{EncoderStage, Stem, BOTTLENECK_EXPANSION},
    lateral::LateralAdapter,
};
use crate::{
    config::RedNetConfig,
    error::{RedNetError, RedNetResult},
};

/// Expected channel count of the input image.
const IN_CHANNELS: usize = 3;

/// Channel width produced by the stem.
const STEM_WIDTH: usize = 64;

/// Internal (pre-expansion) widths of the four encoder stages.
const ENCODER_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Output widths of the four decoder stages, deepest first.
const DECODER_WIDTHS: [usize; 4] = [256, 128, 64, 64];

/// Block count of the final stride-1 refinement stage.
const REFINE_DEPTH: usize = 3;

/// Total spatial reduction between the input and the deepest feature: the
/// stem and the max pool each halve the resolution, stages 2-4 halve it
/// three more times. Input height and width must be divisible by this.
const TOTAL_STRIDE: usize = 32;

impl RedNetConfig {
    /// Initializes a [`RedNet`] model with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RedNetError::InvalidConfiguration`] when
    /// [`validate`](Self::validate) rejects the configuration. No tensor is
    /// allocated in that case.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> RedNetResult<RedNet<B>> {
        self.validate()?;

        let stem = Stem::new(IN_CHANNELS, STEM_WIDTH, device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [planes1, planes2, planes3, planes4] = ENCODER_PLANES;
        let expanded = |planes: usize| planes * BOTTLENECK_EXPANSION;

        let [depth1, depth2, depth3, depth4] = self.encoder_depths;
        let layer1 = EncoderStage::new(depth1, STEM_WIDTH, planes1, 1, device);
        let layer2 = EncoderStage::new(depth2, expanded(planes1), planes2, 2, device);
        let layer3 = EncoderStage::new(depth3, expanded(planes2), planes3, 2, device);
        let layer4 = EncoderStage::new(depth4, expanded(planes3), planes4, 2, device);

        // The deepest lateral adapter feeds the decoder directly, the other
        // four are fused after each decoder stage.
        let lateral0 = LateralAdapter::new(STEM_WIDTH, DECODER_WIDTHS[3], device);
        let lateral1 = LateralAdapter::new(expanded(planes1), DECODER_WIDTHS[2], device);
        let lateral2 = LateralAdapter::new(expanded(planes2), DECODER_WIDTHS[1], device);
        let lateral3 = LateralAdapter::new(expanded(planes3), DECODER_WIDTHS[0], device);
        let lateral4 = LateralAdapter::new(expanded(planes4), planes4, device);

        let [up_depth1, up_depth2, up_depth3, up_depth4] = self.decoder_depths;
        let deconv1 = DecoderStage::new(up_depth1, planes4, DECODER_WIDTHS[0], 2, device);
        let deconv2 = DecoderStage::new(up_depth2, DECODER_WIDTHS[0], DECODER_WIDTHS[1], 2, device);
        let deconv3 = DecoderStage::new(up_depth3, DECODER_WIDTHS[1], DECODER_WIDTHS[2], 2, device);
        let deconv4 = DecoderStage::new(up_depth4, DECODER_WIDTHS[2], DECODER_WIDTHS[3], 2, device);

        let final_refine =
            DecoderStage::new(REFINE_DEPTH, DECODER_WIDTHS[3], DECODER_WIDTHS[3], 1, device);
        let final_deconv = ConvTranspose2dConfig::new([DECODER_WIDTHS[3], self.num_classes], [2, 2])
            .with_stride([2, 2])
            .with_initializer(deconv_initializer())
            .init(device);

        let aux_head = |width: usize| {
            Conv2dConfig::new([width, self.num_classes], [1, 1])
                .with_padding(PaddingConfig2d::Valid)
                .with_initializer(conv_initializer())
                .init(device)
        };
        let out5_conv = aux_head(DECODER_WIDTHS[0]);
        let out4_conv = aux_head(DECODER_WIDTHS[1]);
        let out3_conv = aux_head(DECODER_WIDTHS[2]);
        let out2_conv = aux_head(DECODER_WIDTHS[3]);

        Ok(RedNet {
            stem,
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            lateral0,
            lateral1,
            lateral2,
            lateral3,
            lateral4,
            deconv1,
            deconv2,
            deconv3,
            deconv4,
            final_refine,
            final_deconv,
            out5_conv,
            out4_conv,
            out3_conv,
            out2_conv,
        })
    }
}

/// The RedNet segmentation model.
#[derive(Module, Debug)]
pub struct RedNet<B: Backend> {
    /// Input stem producing the first fusion scale.
    stem: Stem<B>,
    /// Pooling between the stem output and the first residual stage.
    maxpool: MaxPool2d,
    layer1: EncoderStage<B>,
    layer2: EncoderStage<B>,
    layer3: EncoderStage<B>,
    layer4: EncoderStage<B>,
    lateral0: LateralAdapter<B>,
    lateral1: LateralAdapter<B>,
    lateral2: LateralAdapter<B>,
    lateral3: LateralAdapter<B>,
    lateral4: LateralAdapter<B>,
    deconv1: DecoderStage<B>,
    deconv2: DecoderStage<B>,
    deconv3: DecoderStage<B>,
    deconv4: DecoderStage<B>,
    /// Stride-1 refinement stage applied after the last fusion.
    final_refine: DecoderStage<B>,
    /// Kernel-2 stride-2 transposed convolution to `num_classes` channels at
    /// full input resolution, bias enabled.
    final_deconv: ConvTranspose2d<B>,
    out5_conv: Conv2d<B>,
    out4_conv: Conv2d<B>,
    out3_conv: Conv2d<B>,
    out2_conv: Conv2d<B>,
}

/// Multi-scale logit maps produced by a training-mode forward pass.
///
/// `out` is at full input resolution; `out2` through `out5` halve the
/// resolution at each step, `out5` being the coarsest. All five carry
/// `num_classes` channels. The loss collaborator is responsible for
/// downsampling ground-truth labels to each auxiliary resolution.
#[derive(Debug, Clone)]
pub struct RedNetOutput<B: Backend> {
    /// Full-resolution logits.
    pub out: Tensor<B, 4>,
    /// Auxiliary logits at 1/2 resolution.
    pub out2: Tensor<B, 4>,
    /// Auxiliary logits at 1/4 resolution.
    pub out3: Tensor<B, 4>,
    /// Auxiliary logits at 1/8 resolution.
    pub out4: Tensor<B, 4>,
    /// Auxiliary logits at 1/16 resolution.
    pub out5: Tensor<B, 4>,
}

impl<B: Backend> RedNet<B> {
    /// Runs the encoder, retaining every fusion scale.
    ///
    /// # Errors
    ///
    /// Returns [`RedNetError::InvalidTensorShape`] unless the input is
    /// `[N, 3, H, W]` with `H` and `W` non-zero multiples of 32.
    pub fn forward_downsample(&self, input: Tensor<B, 4>) -> RedNetResult<[Tensor<B, 4>; 5]> {
        check_input_shape(input.dims())?;

        let fuse0 = self.stem.forward(input);
        let pooled = self.maxpool.forward(fuse0.clone());
        let fuse1 = self.layer1.forward(pooled);
        let fuse2 = self.layer2.forward(fuse1.clone());
        let fuse3 = self.layer3.forward(fuse2.clone());
        let fuse4 = self.layer4.forward(fuse3.clone());

        Ok([fuse0, fuse1, fuse2, fuse3, fuse4])
    }

    /// Runs the decoder over the retained encoder features and returns the
    /// full-resolution logits.
    pub fn forward_upsample(&self, features: [Tensor<B, 4>; 5]) -> Tensor<B, 4> {
        let [fuse0, fuse1, fuse2, fuse3, fuse4] = features;

        let x = self.deconv1.forward(self.lateral4.forward(fuse4));
        let x = fuse_add(x, self.lateral3.forward(fuse3));
        let x = self.deconv2.forward(x);
        let x = fuse_add(x, self.lateral2.forward(fuse2));
        let x = self.deconv3.forward(x);
        let x = fuse_add(x, self.lateral1.forward(fuse1));
        let x = self.deconv4.forward(x);
        let x = fuse_add(x, self.lateral0.forward(fuse0));

        let x = self.final_refine.forward(x);
        self.final_deconv.forward(x)
    }

    /// Runs the decoder as in [`forward_upsample`](Self::forward_upsample),
    /// additionally tapping an auxiliary logit map at each decoder scale
    /// before the lateral fusion.
    pub fn forward_upsample_train(&self, features: [Tensor<B, 4>; 5]) -> RedNetOutput<B> {
        let [fuse0, fuse1, fuse2, fuse3, fuse4] = features;

        let x = self.deconv1.forward(self.lateral4.forward(fuse4));
        let out5 = self.out5_conv.forward(x.clone());
        let x = fuse_add(x, self.lateral3.forward(fuse3));

        let x = self.deconv2.forward(x);
        let out4 = self.out4_conv.forward(x.clone());
        let x = fuse_add(x, self.lateral2.forward(fuse2));

        let x = self.deconv3.forward(x);
        let out3 = self.out3_conv.forward(x.clone());
        let x = fuse_add(x, self.lateral1.forward(fuse1));

        let x = self.deconv4.forward(x);
        let out2 = self.out2_conv.forward(x.clone());
        let x = fuse_add(x, self.lateral0.forward(fuse0));

        let x = self.final_refine.forward(x);
        let out = self.final_deconv.forward(x);

        RedNetOutput {
            out,
            out2,
            out3,
            out4,
            out5,
        }
    }

    /// Evaluation forward pass: full-resolution logits only.
    ///
    /// # Errors
    ///
    /// Returns [`RedNetError::InvalidTensorShape`] for inputs violating the
    /// `[N, 3, H, W]`, `H`/`W` divisible-by-32 contract.
    pub fn forward(&self, input: Tensor<B, 4>) -> RedNetResult<Tensor<B, 4>> {
        let features = self.forward_downsample(input)?;
        Ok(self.forward_upsample(features))
    }

    /// Training forward pass: full-resolution logits plus the four
    /// auxiliary scales.
    ///
    /// # Errors
    ///
    /// Same shape contract as [`forward`](Self::forward).
    pub fn forward_train(&self, input: Tensor<B, 4>) -> RedNetResult<RedNetOutput<B>> {
        let features = self.forward_downsample(input)?;
        Ok(self.forward_upsample_train(features))
    }
}

/// Additive fusion of a decoder feature and a lateral-adapted encoder
/// feature. The channel/stride schedule guarantees agreement by
/// construction; the assertion turns a wiring bug into a precise diagnostic
/// instead of a backend shape error.
fn fuse_add<B: Backend>(decoded: Tensor<B, 4>, lateral: Tensor<B, 4>) -> Tensor<B, 4> {
    assert_eq!(
        decoded.dims(),
        lateral.dims(),
        "fusion operands must have identical [N, C, H, W] shapes",
    );
    decoded + lateral
}

fn check_input_shape(dims: [usize; 4]) -> RedNetResult<()> {
    let [_, channels, height, width] = dims;
    let valid = channels == IN_CHANNELS
        && height != 0
        && width != 0
        && height % TOTAL_STRIDE == 0
        && width % TOTAL_STRIDE == 0;
    if !valid {
        return Err(RedNetError::InvalidTensorShape {
            expected: format!("[N, {IN_CHANNELS}, H, W] with H and W divisible by {TOTAL_STRIDE}"),
            actual: format!("{dims:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Tolerance};

    type TestBackend = NdArray<f32>;

    #[test]
    fn encoder_feature_schedule() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::zeros([1, 3, 64, 64], &device);
        let [fuse0, fuse1, fuse2, fuse3, fuse4] = model.forward_downsample(input).unwrap();

        assert_eq!(fuse0.dims(), [1, 64, 32, 32]);
        assert_eq!(fuse1.dims(), [1, 256, 16, 16]);
        assert_eq!(fuse2.dims(), [1, 512, 8, 8]);
        assert_eq!(fuse3.dims(), [1, 1024, 4, 4]);
        assert_eq!(fuse4.dims(), [1, 2048, 2, 2]);
    }

    #[test]
    fn evaluation_output_matches_input_resolution() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::random(
            [1, 3, 224, 224],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input).unwrap();

        assert_eq!(output.dims(), [1, 2, 224, 224]);
    }

    #[test]
    fn training_outputs_follow_the_scale_ladder() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::zeros([2, 3, 64, 64], &device);
        let output = model.forward_train(input).unwrap();

        assert_eq!(output.out.dims(), [2, 2, 64, 64]);
        assert_eq!(output.out2.dims(), [2, 2, 32, 32]);
        assert_eq!(output.out3.dims(), [2, 2, 16, 16]);
        assert_eq!(output.out4.dims(), [2, 2, 8, 8]);
        assert_eq!(output.out5.dims(), [2, 2, 4, 4]);
    }

    #[test]
    fn class_count_only_affects_head_depth() {
        let device = Default::default();
        let model = RedNetConfig::new(21).init::<TestBackend>(&device).unwrap();

        let input = Tensor::zeros([1, 3, 32, 32], &device);
        let output = model.forward_train(input).unwrap();

        assert_eq!(output.out.dims(), [1, 21, 32, 32]);
        assert_eq!(output.out5.dims(), [1, 21, 2, 2]);
    }

    #[test]
    fn rejects_input_not_divisible_by_32() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::zeros([1, 3, 50, 64], &device);
        match model.forward(input) {
            Err(RedNetError::InvalidTensorShape { actual, .. }) => {
                assert!(actual.contains("50"));
            }
            _ => panic!("Expected InvalidTensorShape error"),
        }
    }

    #[test]
    fn rejects_non_rgb_input() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::zeros([1, 4, 64, 64], &device);
        assert!(model.forward(input).is_err());
    }

    #[test]
    fn forward_is_deterministic_in_evaluation() {
        let device = Default::default();
        let model = RedNetConfig::new(2).init::<TestBackend>(&device).unwrap();

        let input = Tensor::random(
            [1, 3, 32, 32],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let first = model.forward(input.clone()).unwrap();
        let second = model.forward(input).unwrap();

        first
            .into_data()
            .assert_approx_eq::<f32>(&second.into_data(), Tolerance::relative(1e-6));
    }
}

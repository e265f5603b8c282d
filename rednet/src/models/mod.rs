//! # Model architecture
//!
//! This module aggregates the components of the RedNet architecture:
//!
//! - `encoder`: the stem and the bottleneck-residual encoder stages.
//! - `decoder`: the transpose-residual decoder stages.
//! - `lateral`: the 1x1 adapters that match encoder widths to decoder widths
//!   at each fusion point.
//! - `rednet`: the top-level model wiring the above into the full forward
//!   pass.

pub mod decoder;
pub mod encoder;
pub mod lateral;
pub mod rednet;

pub use rednet::{RedNet, RedNetOutput};

use burn::nn::Initializer;
use core::f64::consts::SQRT_2;

/// Fan-out scaled normal initializer used for every convolution kernel in
/// the network, matching the rectifying nonlinearities that follow them.
pub(crate) fn conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    }
}

/// Same fan-out scaled normal initializer for transposed convolution
/// kernels. Burn's `ConvTranspose2dConfig::init` only supplies a fan-in,
/// computed as `out_channels / groups * kernel_area` because the transposed
/// weight layout swaps the channel axes — with `groups == 1` that value is
/// exactly the fan-out the policy calls for, so scaling by fan-in here
/// yields the identical `2 / (kernel_area * out_channels)` variance.
pub(crate) fn deconv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: false,
    }
}

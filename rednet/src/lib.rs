//! # RedNet-Burn
//!
//! A Rust implementation of RedNet, a fully-convolutional residual
//! encoder-decoder network for dense semantic segmentation, built with the
//! Burn deep learning framework.
//!
//! The encoder is a ResNet-50-style bottleneck stack; the decoder mirrors it
//! with transpose-residual stages that progressively restore the input
//! resolution, additively fusing lateral-adapted encoder features at every
//! scale. During training the decoder additionally emits four lower
//! resolution auxiliary logit maps for multi-scale supervision.
//!
//! ## Key components
//!
//! - [`RedNetConfig`]: construction-time configuration and validation.
//! - [`RedNet`]: the model itself, with separate evaluation and training
//!   forward passes.
//! - [`RedNetOutput`]: the five logit maps produced by the training pass.
//! - [`RedNetError`]: the enum for all possible errors.

mod config;
mod error;
mod models;

#[doc(inline)]
pub use config::RedNetConfig;
#[doc(inline)]
pub use error::{RedNetError, RedNetResult};
#[doc(inline)]
pub use models::{RedNet, RedNetOutput};

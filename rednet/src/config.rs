//! Construction-time configuration for the RedNet model.
//!
//! The configuration fixes everything the forward pass relies on: the class
//! count of every output head and the block count of every stage. All other
//! shape arithmetic (channel widths, strides, the x4 bottleneck expansion)
//! is a fixed schedule derived from these values at build time.

use burn::prelude::*;

use crate::error::{RedNetError, RedNetResult};

/// Configuration for the [`RedNet`](crate::RedNet) model.
#[derive(Config, Debug)]
pub struct RedNetConfig {
    /// Channel depth of the main output and every auxiliary head.
    pub num_classes: usize,
    /// Bottleneck blocks per encoder stage, shallowest first.
    #[config(default = "[3, 4, 6, 3]")]
    pub encoder_depths: [usize; 4],
    /// Transpose-residual blocks per decoder stage, deepest first.
    #[config(default = "[6, 4, 3, 3]")]
    pub decoder_depths: [usize; 4],
}

impl RedNetConfig {
    /// Checks the configuration for logical consistency.
    ///
    /// # Errors
    ///
    /// Returns [`RedNetError::InvalidConfiguration`] when the class count is
    /// zero or any stage has a block count of zero. Called by
    /// [`init`](Self::init) before any tensor is allocated.
    pub fn validate(&self) -> RedNetResult<()> {
        if self.num_classes < 1 {
            return Err(RedNetError::InvalidConfiguration {
                reason: format!("num_classes must be at least 1, got {}", self.num_classes),
            });
        }
        if self.encoder_depths.contains(&0) {
            return Err(RedNetError::InvalidConfiguration {
                reason: format!(
                    "encoder stages need at least one block each, got {:?}",
                    self.encoder_depths
                ),
            });
        }
        if self.decoder_depths.contains(&0) {
            return Err(RedNetError::InvalidConfiguration {
                reason: format!(
                    "decoder stages need at least one block each, got {:?}",
                    self.decoder_depths
                ),
            });
        }
        Ok(())
    }
}

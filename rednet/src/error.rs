use thiserror::Error;

/// The error type for `rednet-burn` operations.
///
/// Every failure is either a construction-time configuration problem or an
/// immediately-fatal shape violation at the start of a forward pass; there
/// are no transient conditions and no retries.
#[derive(Error, Debug)]
pub enum RedNetError {
    /// Error for when an invalid model configuration is provided.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },
}

/// A specialized `Result` type for `rednet-burn` operations.
pub type RedNetResult<T> = Result<T, RedNetError>;

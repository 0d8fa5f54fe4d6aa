//! Codec error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while converting between images and wire tensors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The source bytes could not be rasterized into an image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The tensor payload is truncated or otherwise malformed.
    #[error("invalid tensor data: {0}")]
    InvalidData(String),

    /// The tensor describes a layout this codec cannot turn into RGB.
    #[error("tensor conversion failed: {0}")]
    ConversionFailed(String),

    /// The server sent a compressed tensor.
    #[error("compressed tensors are not supported")]
    CompressionNotSupported,
}

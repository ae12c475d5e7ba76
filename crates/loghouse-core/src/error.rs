//! Codec error types.
//!
//! Encoding and decoding are the only fallible operations in this crate, so
//! the error enum distinguishes exactly those two directions. All functions
//! return `Result<T>` aliased to `Result<T, CodecError>` for clean `?`
//! propagation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
}

//! Error types for the encoder module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during encoding and muxing.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The output path cannot be written.
    #[error("Invalid output path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// I/O failure while writing the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoder initialization failed.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// The container reached its size limit.
    #[error("Container size limit reached at {0} bytes")]
    ContainerFull(u64),

    /// The requested codec is not compiled in.
    #[error("Codec not supported: {0}")]
    NotSupported(String),

    /// The file is not a readable AVI container.
    #[error("Malformed container: {0}")]
    Malformed(String),

    /// The muxer was already finalized.
    #[error("Muxer already finalized")]
    Finalized,
}

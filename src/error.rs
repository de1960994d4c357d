//! Error types for the GSDN upsampling block.

use thiserror::Error;

use crate::sparse::Coord;

/// Errors raised by sparse tensor operations and the GSDN block.
#[derive(Error, Debug)]
pub enum GsdnError {
    /// Tensor shape mismatch.
    #[error("tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Two sparse tensors do not live on the same tensor stride.
    #[error("tensor stride mismatch: expected {expected}, got {got}")]
    StrideMismatch {
        /// Expected tensor stride.
        expected: usize,
        /// Actual tensor stride.
        got: usize,
    },

    /// Feature width does not match what the layer expects.
    #[error("channel mismatch: expected {expected} channels, got {got}")]
    ChannelMismatch {
        /// Expected number of channels.
        expected: usize,
        /// Actual number of channels.
        got: usize,
    },

    /// A coordinate is duplicated or not aligned on the tensor stride.
    #[error("invalid coordinate {coord:?}: {reason}")]
    InvalidCoordinate {
        /// Offending coordinate.
        coord: Coord,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Tensor data could not be read back to the host.
    #[error("tensor data error: {message}")]
    Data {
        /// Description of the error.
        message: String,
    },

    /// A configuration file could not be loaded.
    #[error("config error: {message}")]
    Config {
        /// Description of the error.
        message: String,
    },

    /// I/O error while exporting results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for GSDN operations.
pub type Result<T> = std::result::Result<T, GsdnError>;

//! Error types for atlas building.
//!
//! This module provides structured error types for the atlas fitting
//! workflow and its collaborators (datasets, process groups, streaming
//! averages). Errors from the transform and sampling layer are wrapped.

use thiserror::Error;
use warpkit_core::WarpError;

/// Main error type for atlas operations.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// Error raised by transform algebra or sampling.
    #[error("Core error: {0}")]
    Core(#[from] WarpError),

    /// Error reading samples from a dataset.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error in a collective operation.
    #[error("Distributed error: {0}")]
    Distributed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A streaming average was finalized before any data arrived.
    #[error("Streaming average is empty")]
    EmptyStream,
}

/// Result type for atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;

impl AtlasError {
    /// Create a dataset error.
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// Create a distributed error.
    pub fn distributed(msg: impl Into<String>) -> Self {
        Self::Distributed(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

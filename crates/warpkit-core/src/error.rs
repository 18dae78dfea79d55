//! Error types for transform algebra, sampling and resampling.
//!
//! Every configuration problem is reported before any tensor work starts.
//! Singular matrices are deliberately not an error: inverting one yields
//! non-finite values, and callers are expected to pass invertible input.

use thiserror::Error;

/// Main error type for core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WarpError {
    /// Spatial dimension other than 2 or 3.
    #[error("Unsupported dimension: {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),

    /// Malformed or contradictory arguments.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Paired inputs disagree on shape.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Feature that exists as an extension point only.
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// Failure reported by a sampling backend.
    #[error("Sampling error: {0}")]
    Sampling(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, WarpError>;

impl WarpError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unimplemented-feature error.
    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    /// Create a sampling error.
    pub fn sampling(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }

    /// Create a shape mismatch error from any two shape-like slices.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Reject any spatial dimension other than 2 or 3.
pub fn ensure_supported_dimension(dim: usize) -> Result<()> {
    match dim {
        2 | 3 => Ok(()),
        other => Err(WarpError::UnsupportedDimension(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WarpError::invalid_configuration("test error");
        assert_eq!(err.to_string(), "Invalid configuration: test error");
    }

    #[test]
    fn test_shape_mismatch() {
        let err = WarpError::shape_mismatch(&[4, 2, 2], &[4, 3, 3]);
        let err_str = err.to_string();
        assert!(err_str.contains("expected"));
        assert!(err_str.contains("got"));
    }

    #[test]
    fn test_supported_dimensions() {
        assert!(ensure_supported_dimension(2).is_ok());
        assert!(ensure_supported_dimension(3).is_ok());
        assert_eq!(
            ensure_supported_dimension(4),
            Err(WarpError::UnsupportedDimension(4))
        );
        assert!(ensure_supported_dimension(1).is_err());
    }
}

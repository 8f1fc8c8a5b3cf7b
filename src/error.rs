//! Error types for the bundle-schur library
//!
//! Configuration and structural problems are reported through [`BundleError`].
//! Numeric degeneracies (a camera-frame point with `z == 0`, a lens model
//! evaluated outside its domain) are not errors: they propagate as `NaN`/`Inf`
//! and are left to the consuming solver's step-acceptance logic.

use thiserror::Error;

/// Main result type used throughout the bundle-schur library
pub type BundleResult<T> = Result<T, BundleError>;

/// Main error type for the bundle-schur library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BundleError {
    /// An observation refers to a point (or rigid-body point) that does not exist
    #[error("Observation index error: view {view} references {stream} point {index} but only {available} exist")]
    ObservationIndex {
        view: usize,
        stream: &'static str,
        index: usize,
        available: usize,
    },

    /// A parameter or residual vector has the wrong length for the configured scene
    #[error("Parameter length mismatch: expected {expected}, got {actual}")]
    ParameterLength { expected: usize, actual: usize },

    /// The scene graph is malformed (parent cycle, non-monotone parent, dangling reference)
    #[error("Scene structure error: {0}")]
    Structure(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sparse matrix assembly failed
    #[error("Sparse assembly error: {0}")]
    SparseAssembly(String),
}

impl BundleError {
    /// Shorthand used by the codec and evaluators when checking slice lengths.
    pub(crate) fn check_length(expected: usize, actual: usize) -> BundleResult<()> {
        if expected != actual {
            return Err(BundleError::ParameterLength { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_error_display() {
        let error = BundleError::Structure("view 2 has parent 3".to_string());
        assert_eq!(
            error.to_string(),
            "Scene structure error: view 2 has parent 3"
        );
    }

    #[test]
    fn test_observation_index_display() {
        let error = BundleError::ObservationIndex {
            view: 1,
            stream: "general",
            index: 12,
            available: 10,
        };
        let msg = error.to_string();
        assert!(msg.contains("view 1"));
        assert!(msg.contains("general point 12"));
    }

    #[test]
    fn test_check_length() {
        assert!(BundleError::check_length(4, 4).is_ok());
        match BundleError::check_length(4, 5) {
            Err(BundleError::ParameterLength { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 5);
            }
            other => panic!("Expected ParameterLength, got {other:?}"),
        }
    }

    #[test]
    fn test_bundle_result_err() {
        let result: BundleResult<i32> = Err(BundleError::InvalidInput("Test error".to_string()));
        assert!(result.is_err());
    }
}

//! Error types for Trocear
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Trocear operations
pub type Result<T> = std::result::Result<T, TrocearError>;

/// Error type for all Trocear operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrocearError {
    /// A file (model artifact, vocabulary) does not exist or the path is empty
    #[error("Not found: {path}")]
    NotFound {
        /// Offending path
        path: String,
    },

    /// An internal invariant was violated
    #[error("Internal error: {reason}")]
    Internal {
        /// What went wrong
        reason: String,
    },

    /// A caller-supplied argument is out of range or inapplicable
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Why the argument was rejected
        reason: String,
    },
}

impl TrocearError {
    /// Shorthand for [`TrocearError::Internal`]
    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`TrocearError::InvalidArgument`]
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrocearError::NotFound {
            path: "model.json".to_string(),
        };
        assert!(err.to_string().contains("model.json"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = TrocearError::internal("empty piece");
        let err2 = TrocearError::internal("empty piece");
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = TrocearError::invalid_argument("nbest_size must be <= 512");
        assert!(err.to_string().contains("nbest_size"));
        assert!(err.to_string().starts_with("Invalid argument"));
    }
}

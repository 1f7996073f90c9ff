//! Error types for the access policy.

use thiserror::Error;

/// Errors raised while building or enforcing an access policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A rule in the configuration could not be used.
    #[error("invalid access rule for '{operation}': {reason}")]
    InvalidRule {
        /// Operation the rule belongs to.
        operation: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The caller may not invoke the operation.
    #[error("Protected function call ({operation}) denied: {reason}")]
    AccessDenied {
        /// Operation that was called.
        operation: String,
        /// Deny reason.
        reason: String,
    },
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

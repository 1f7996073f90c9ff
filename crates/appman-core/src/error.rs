//! Error types for the foundation crate.

use thiserror::Error;

/// Errors raised while constructing or validating core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An application id failed validation.
    #[error("invalid application id '{id}': {reason}")]
    InvalidApplicationId {
        /// The rejected id
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// A call named a member the interface does not declare.
    #[error("interface {interface} has no member '{member}'")]
    UnknownMember {
        /// Interface name
        interface: String,
        /// Member name
        member: String,
    },

    /// A call's arguments did not match the declared signature.
    #[error("argument mismatch calling {interface}.{member}: {reason}")]
    ArgumentMismatch {
        /// Interface name
        interface: String,
        /// Member name
        member: String,
        /// What did not match
        reason: String,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

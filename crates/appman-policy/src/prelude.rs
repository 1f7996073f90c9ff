//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_policy::prelude::*;` to import all essential types.

// Errors
pub use crate::{PolicyError, PolicyResult};

// Policy
pub use crate::{AccessDecision, AccessPolicy, AccessRule};

// Callers
pub use crate::{CallerResolver, ProcfsCallerResolver};

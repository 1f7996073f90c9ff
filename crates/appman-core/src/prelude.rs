//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult};

// Applications
pub use crate::{Application, ApplicationDirectory, ApplicationId, InMemoryDirectory};

// Lifecycle
pub use crate::{ExitKind, ExitStatus, RuntimeId, RuntimeState};

// Values and schemas
pub use crate::{InterfaceSchema, MethodSignature, ParameterMap, Value, ValueKind};

// Timeouts
pub use crate::TimeoutFactor;

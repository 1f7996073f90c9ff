//! Appman Core - Foundation types for the application manager.
//!
//! This crate provides:
//! - Application identity and descriptors
//! - The application directory seam used to resolve ids and capabilities
//! - Dynamically typed parameter values and interface schemas
//! - Runtime lifecycle states and exit classification types
//! - The global timeout scaling factor

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod application;
pub mod error;
pub mod lifecycle;
pub mod schema;
pub mod timeout;
pub mod value;

pub use application::{
    Application, ApplicationDirectory, ApplicationId, BROADCAST_REQUESTER, InMemoryDirectory,
    SYSTEM_UI,
};
pub use error::{CoreError, CoreResult};
pub use lifecycle::{ExitKind, ExitStatus, RuntimeId, RuntimeState};
pub use schema::{InterfaceSchema, MethodSignature};
pub use timeout::TimeoutFactor;
pub use value::{ParameterMap, Value, ValueKind};

//! Access policy for protected application manager operations.
//!
//! Calls such as `startApplication` or `stopApplication` arriving over IPC
//! are checked against per-operation rules loaded from the
//! `[access_policy.<operation>]` configuration sections. A rule can require
//! a capability, block caller executables and block caller uids.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod caller;
pub mod error;
pub mod policy;

pub use caller::{CallerResolver, ProcfsCallerResolver};
pub use error::{PolicyError, PolicyResult};
pub use policy::{
    AccessDecision, AccessPolicy, AccessRule, REASON_EXECUTABLE_BLOCKED,
    REASON_INSUFFICIENT_CAPABILITIES, REASON_NO_EXECUTABLE, REASON_UID_BLOCKED,
};

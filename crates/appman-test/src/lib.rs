//! Appman Test - shared test utilities for the application manager.
//!
//! This crate provides mock implementations and fixtures that can be used
//! across the workspace as a dev-dependency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use appman_core::ExitStatus;
//! use appman_test::{MockContainerBackend, test_application};
//!
//! let backend = MockContainerBackend::new("process");
//! let app = test_application("com.example.music", "native");
//! // ... start a runtime, then script its exit:
//! backend.exit(backend.started_pids()[0], ExitStatus::Code(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

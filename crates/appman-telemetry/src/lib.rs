//! Appman Telemetry - Logging and request correlation for the application
//! manager.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - A request context that ties every log line of one intent request to its
//!   request id
//!
//! # Example
//!
//! ```rust,no_run
//! use appman_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), appman_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("appman_ipc=trace");
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("share", "com.example.gallery");
//! let _guard = ctx.span().entered();
//! tracing::info!("routing request");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};

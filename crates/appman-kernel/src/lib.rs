//! Appman Kernel - the manager context.
//!
//! The [`Kernel`] owns every long-lived component and the loops that drive
//! them:
//! - the runtime supervisor and its signal queue
//! - the quick launcher pool, refilled as runtimes end
//! - the intent broker and its signal queue
//! - the dispatcher that turns client calls into broker requests and
//!   policy-checked manager operations
//!
//! A fatal runtime failure records its reason and requests shutdown; the
//! daemon observes it through [`Kernel::wait_for_shutdown`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod dispatch;
pub mod error;
mod kernel;
pub mod launcher;

pub use dispatch::OPEN_URL_INTENT;
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelOptions};
pub use launcher::{AppLauncher, FatalState};

//! Appman Events - Event bus for the application manager.
//!
//! This crate provides:
//! - Event types for runtime lifecycle, quick launcher and intent activity
//! - A broadcast-based event bus for async subscribers
//!
//! Runtimes publish lifecycle events here instead of calling their
//! collaborators directly. The intent broker, the quick launcher pool and the
//! window layer each hold a receiver and react on their own loop turn.
//!
//! # Example
//!
//! ```rust
//! use appman_core::RuntimeId;
//! use appman_events::{AppManEvent, EventBus, EventMetadata};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(AppManEvent::ApplicationInterfaceReady {
//!     metadata: EventMetadata::new("runtime"),
//!     runtime_id: RuntimeId::new(1),
//!     application_id: None,
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "application_interface_ready");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{AppManEvent, EventMetadata};

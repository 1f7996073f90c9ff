//! Appman Intents - intent registration and request routing.
//!
//! This crate provides:
//! - [`IntentCatalog`]: intents advertised by installed packages, with
//!   parameter filters and visibility
//! - [`IntentBroker`]: routes requests to handler applications, starting
//!   them on demand, with disambiguation, broadcasts and reply timeouts
//! - [`IntentClient`]: the requesting and handling side for in-process
//!   applications
//!
//! # Request flow
//!
//! 1. A client calls `requestToSystem`; the broker answers with
//!    `requestAccepted` carrying the assigned id.
//! 2. Matching intents are collected. Several candidates are offered to the
//!    system UI if it registered as disambiguation handler.
//! 3. The handler is started if needed and receives `requestToApplication`.
//! 4. Its `replyFromApplication`, or a timeout, finishes the request and the
//!    requester receives `replyFromSystem`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod broker;
pub mod catalog;
pub mod client;
pub mod error;
pub mod intent;
pub mod request;
pub mod settings;

pub use broker::{
    ApplicationStarter, BrokerSignal, BrokerSignalReceiver, BrokerSignalSender, IntentBroker,
    SharedBroker, run,
};
pub use catalog::IntentCatalog;
pub use client::{CallResult, IncomingIntent, IntentClient, IntentHandler, NO_HANDLER_FOUND};
pub use error::{IntentError, IntentResult, NO_MATCHING_HANDLER};
pub use intent::{Intent, IntentDefinition, MatchKind, Visibility};
pub use request::{Direction, ERROR_MESSAGE_KEY, IntentOutcome, IntentRequest, RequestState};
pub use settings::IntentSettings;

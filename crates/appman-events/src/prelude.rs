//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_events::prelude::*;` to import all essential types.

pub use crate::{AppManEvent, EventBus, EventMetadata, EventReceiver};

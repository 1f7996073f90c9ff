//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_intents::prelude::*;` to import all essential types.

// Errors
pub use crate::{IntentError, IntentResult};

// Catalog
pub use crate::{Intent, IntentCatalog, IntentDefinition, Visibility};

// Broker
pub use crate::{ApplicationStarter, IntentBroker, IntentOutcome, IntentSettings, SharedBroker};

// Clients
pub use crate::{IncomingIntent, IntentClient, IntentHandler};

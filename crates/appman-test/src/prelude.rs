//! Prelude module - commonly used test helpers.
//!
//! Use `use appman_test::prelude::*;` to import all essential helpers.

// Mocks
pub use crate::{MockAncestry, MockCallers, MockContainerBackend, RecordingHandler};

// Fixtures
pub use crate::{FakeProc, init_test_logging, test_application, test_config, test_directory};

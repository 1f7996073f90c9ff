//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_kernel::prelude::*;` to import all essential types.

// Errors
pub use crate::{KernelError, KernelResult};

// Manager
pub use crate::{AppLauncher, Kernel, KernelOptions};

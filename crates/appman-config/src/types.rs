//! Configuration types for the application manager.
//!
//! Every struct implements [`Default`] with production defaults so that a
//! bare `[section]` header in TOML produces a working configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runtime lifecycle settings.
    pub runtime: RuntimeSection,
    /// Pre-started runtime pool.
    pub quick_launcher: QuickLauncherSection,
    /// Intent broker timeouts.
    pub intents: IntentsSection,
    /// Debugging aids.
    pub debug: DebugSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
    /// Access rules keyed by protected operation name.
    pub access_policy: BTreeMap<String, AccessPolicySection>,
}

// ---------------------------------------------------------------------------
// RuntimeSection
// ---------------------------------------------------------------------------

/// Runtime lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Grace period between a quit request and forced termination.
    pub quit_grace_ms: u64,
    /// Directory holding per-runtime peer channel sockets. Defaults to the
    /// system temp directory.
    pub peer_socket_dir: Option<PathBuf>,
    /// Directory holding `appman-launcher-<runtime>` stubs.
    pub launcher_dir: PathBuf,
    /// How many ancestors of a connecting process are checked against the
    /// spawned pid.
    pub max_ancestry_depth: u32,
    /// Container backend used when an application does not pick one.
    pub default_container: String,
    /// Propagated to every new runtime; slows down UI animations.
    pub slow_animations: bool,
    /// Opaque per-runtime-backend configuration, passed to the process.
    pub backends: BTreeMap<String, toml::Value>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            quit_grace_ms: 250,
            peer_socket_dir: None,
            launcher_dir: PathBuf::from("/usr/lib/appman"),
            max_ancestry_depth: 4,
            default_container: "process".to_owned(),
            slow_animations: false,
            backends: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// QuickLauncherSection
// ---------------------------------------------------------------------------

/// Pre-started runtime pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickLauncherSection {
    /// Idle instances kept per (container, runtime) slot. Zero disables the
    /// pool.
    pub runtimes_per_container: u32,
    /// Delay before the next refill pass while slots are short.
    pub rebuild_delay_ms: u64,
    /// Failed starts within `failed_start_window_ms` after which a slot stops
    /// being refilled.
    pub failed_start_limit: u32,
    /// Window for `failed_start_limit`.
    pub failed_start_window_ms: u64,
}

impl Default for QuickLauncherSection {
    fn default() -> Self {
        Self {
            runtimes_per_container: 0,
            rebuild_delay_ms: 1000,
            failed_start_limit: 5,
            failed_start_window_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// IntentsSection
// ---------------------------------------------------------------------------

/// Intent broker timeouts, in milliseconds before slow-motion scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentsSection {
    /// Time the system UI has to pick among several handlers.
    pub disambiguation_timeout_ms: u64,
    /// Time a target application has to come up and connect.
    pub start_application_timeout_ms: u64,
    /// Time a handler application has to reply.
    pub reply_from_application_timeout_ms: u64,
    /// Time a system-side handler has to reply.
    pub reply_from_system_timeout_ms: u64,
}

impl Default for IntentsSection {
    fn default() -> Self {
        Self {
            disambiguation_timeout_ms: 10_000,
            start_application_timeout_ms: 3_000,
            reply_from_application_timeout_ms: 5_000,
            reply_from_system_timeout_ms: 20_000,
        }
    }
}

// ---------------------------------------------------------------------------
// DebugSection
// ---------------------------------------------------------------------------

/// Debugging aids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    /// Multiplier applied to every timeout above.
    pub timeout_factor: u32,
}

impl Default for DebugSection {
    fn default() -> Self {
        Self { timeout_factor: 1 }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Output target: `"stdout"`, `"stderr"` or `"file"`.
    pub target: String,
    /// Directory for `"file"` output.
    pub directory: Option<PathBuf>,
    /// Per-crate tracing directives (e.g. `["appman_ipc=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            target: "stderr".to_owned(),
            directory: None,
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// AccessPolicySection
// ---------------------------------------------------------------------------

/// Restrictions on one protected operation. An empty list places no
/// restriction of that kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicySection {
    /// Caller uids.
    pub uids: Vec<u32>,
    /// Blocked executable paths.
    pub executables: Vec<String>,
    /// Capabilities, any one of which admits the caller.
    pub capabilities: Vec<String>,
}

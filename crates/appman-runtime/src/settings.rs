//! Resolved runtime-layer settings.
//!
//! Configured millisecond values are scaled by the timeout factor here and
//! nowhere else.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use appman_config::Config;
use appman_core::TimeoutFactor;

/// Settings shared by every runtime.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Grace period between a quit request and termination, already scaled.
    pub quit_grace: Duration,
    /// Ancestry depth checked when a peer connects.
    pub max_ancestry_depth: u32,
    /// Directory holding launcher stubs.
    pub launcher_dir: PathBuf,
    /// Container backend used for out-of-process runtimes.
    pub default_container: String,
    /// Slow-animation debug toggle, copied into new runtimes.
    pub slow_animations: bool,
    /// Logging filter handed to launched processes.
    pub log_filter: String,
    /// Per-backend configuration blobs.
    pub backend_config: BTreeMap<String, serde_json::Value>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            quit_grace: Duration::from_millis(250),
            max_ancestry_depth: 4,
            launcher_dir: PathBuf::from("/usr/lib/appman"),
            default_container: "process".to_owned(),
            slow_animations: false,
            log_filter: "info".to_owned(),
            backend_config: BTreeMap::new(),
        }
    }
}

impl RuntimeSettings {
    /// Resolve from configuration.
    #[must_use]
    pub fn from_config(config: &Config, factor: TimeoutFactor) -> Self {
        let r = &config.runtime;
        let backend_config = r
            .backends
            .iter()
            .filter_map(|(id, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|json| (id.clone(), json))
            })
            .collect();

        let mut log_filter = config.logging.level.clone();
        for directive in &config.logging.directives {
            log_filter.push(',');
            log_filter.push_str(directive);
        }

        Self {
            quit_grace: factor.scale_ms(r.quit_grace_ms),
            max_ancestry_depth: r.max_ancestry_depth,
            launcher_dir: r.launcher_dir.clone(),
            default_container: r.default_container.clone(),
            slow_animations: r.slow_animations,
            log_filter,
            backend_config,
        }
    }
}

/// Quick launcher pool settings.
#[derive(Debug, Clone)]
pub struct QuickLaunchSettings {
    /// Idle instances per slot.
    pub runtimes_per_container: usize,
    /// Delay between refill passes, already scaled.
    pub rebuild_delay: Duration,
    /// Failed starts tolerated within `failed_start_window`.
    pub failed_start_limit: usize,
    /// Window for `failed_start_limit`.
    pub failed_start_window: Duration,
}

impl Default for QuickLaunchSettings {
    fn default() -> Self {
        Self {
            runtimes_per_container: 1,
            rebuild_delay: Duration::from_secs(1),
            failed_start_limit: 5,
            failed_start_window: Duration::from_secs(10),
        }
    }
}

impl QuickLaunchSettings {
    /// Resolve from configuration.
    #[must_use]
    pub fn from_config(config: &Config, factor: TimeoutFactor) -> Self {
        let q = &config.quick_launcher;
        Self {
            runtimes_per_container: usize::try_from(q.runtimes_per_container).unwrap_or(0),
            rebuild_delay: factor.scale_ms(q.rebuild_delay_ms),
            failed_start_limit: usize::try_from(q.failed_start_limit).unwrap_or(usize::MAX),
            failed_start_window: factor.scale_ms(q.failed_start_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_once() {
        let mut config = Config::default();
        config.runtime.quit_grace_ms = 300;
        config.logging.directives = vec!["appman_ipc=trace".to_owned()];

        let settings = RuntimeSettings::from_config(&config, TimeoutFactor::new(2));
        assert_eq!(settings.quit_grace, Duration::from_millis(600));
        assert_eq!(settings.log_filter, "info,appman_ipc=trace");

        let ql = QuickLaunchSettings::from_config(&config, TimeoutFactor::new(2));
        assert_eq!(ql.rebuild_delay, Duration::from_secs(2));
        assert_eq!(ql.runtimes_per_container, 0);
    }
}

//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound on the quit grace period.
const MAX_QUIT_GRACE_MS: u64 = 60_000;
/// Upper bound on idle quick launchers per slot.
const MAX_RUNTIMES_PER_CONTAINER: u32 = 10;
/// Upper bound on the ancestry walk.
const MAX_ANCESTRY_DEPTH: u32 = 32;
/// Upper bound on the slow-motion factor.
const MAX_TIMEOUT_FACTOR: u32 = 1000;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_runtime(config)?;
    validate_quick_launcher(config)?;
    validate_intents(config)?;
    validate_debug(config)?;
    validate_logging(config)?;
    validate_access_policy(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_runtime(config: &Config) -> ConfigResult<()> {
    let r = &config.runtime;

    if r.quit_grace_ms == 0 || r.quit_grace_ms > MAX_QUIT_GRACE_MS {
        return Err(invalid(
            "runtime.quit_grace_ms",
            format!("must be between 1 and {MAX_QUIT_GRACE_MS}"),
        ));
    }
    if r.max_ancestry_depth == 0 || r.max_ancestry_depth > MAX_ANCESTRY_DEPTH {
        return Err(invalid(
            "runtime.max_ancestry_depth",
            format!("must be between 1 and {MAX_ANCESTRY_DEPTH}"),
        ));
    }
    if r.default_container.is_empty() {
        return Err(invalid("runtime.default_container", "must not be empty"));
    }
    Ok(())
}

fn validate_quick_launcher(config: &Config) -> ConfigResult<()> {
    let q = &config.quick_launcher;

    if q.runtimes_per_container > MAX_RUNTIMES_PER_CONTAINER {
        return Err(invalid(
            "quick_launcher.runtimes_per_container",
            format!("must be at most {MAX_RUNTIMES_PER_CONTAINER}"),
        ));
    }
    if q.rebuild_delay_ms == 0 {
        return Err(invalid("quick_launcher.rebuild_delay_ms", "must be positive"));
    }
    Ok(())
}

fn validate_intents(config: &Config) -> ConfigResult<()> {
    let i = &config.intents;
    for (field, value) in [
        ("intents.disambiguation_timeout_ms", i.disambiguation_timeout_ms),
        (
            "intents.start_application_timeout_ms",
            i.start_application_timeout_ms,
        ),
        (
            "intents.reply_from_application_timeout_ms",
            i.reply_from_application_timeout_ms,
        ),
        (
            "intents.reply_from_system_timeout_ms",
            i.reply_from_system_timeout_ms,
        ),
    ] {
        if value == 0 {
            return Err(invalid(field, "timeouts must be positive"));
        }
    }
    Ok(())
}

fn validate_debug(config: &Config) -> ConfigResult<()> {
    let f = config.debug.timeout_factor;
    if f == 0 || f > MAX_TIMEOUT_FACTOR {
        return Err(invalid(
            "debug.timeout_factor",
            format!("must be between 1 and {MAX_TIMEOUT_FACTOR}"),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    match l.target.as_str() {
        "stdout" | "stderr" => {},
        "file" if l.directory.is_some() => {},
        "file" => {
            return Err(invalid(
                "logging.directory",
                "required when logging.target is \"file\"",
            ));
        },
        other => {
            return Err(invalid(
                "logging.target",
                format!("unknown target '{other}'"),
            ));
        },
    }
    Ok(())
}

fn validate_access_policy(config: &Config) -> ConfigResult<()> {
    for (operation, rule) in &config.access_policy {
        if operation.is_empty() {
            return Err(invalid("access_policy", "operation names must not be empty"));
        }
        if let Some(bad) = rule.executables.iter().find(|e| !e.starts_with('/')) {
            return Err(invalid(
                &format!("access_policy.{operation}.executables"),
                format!("'{bad}' is not an absolute path"),
            ));
        }
        if rule.capabilities.iter().any(String::is_empty) {
            return Err(invalid(
                &format!("access_policy.{operation}.capabilities"),
                "capabilities must not be empty strings",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccessPolicySection;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_factor() {
        let mut config = Config::default();
        config.debug.timeout_factor = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_file_target_without_directory() {
        let mut config = Config::default();
        config.logging.target = "file".to_owned();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("logging.directory"));
    }

    #[test]
    fn test_rejects_relative_executable() {
        let mut config = Config::default();
        config.access_policy.insert(
            "openUrl".to_owned(),
            AccessPolicySection {
                executables: vec!["evil".to_owned()],
                ..AccessPolicySection::default()
            },
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_too_many_quick_launchers() {
        let mut config = Config::default();
        config.quick_launcher.runtimes_per_container = 11;
        assert!(validate(&config).is_err());
    }
}

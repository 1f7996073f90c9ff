//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/appman/config.toml` (system)
//! 3. Merge `$XDG_CONFIG_HOME/appman/config.toml` (user)
//! 4. Merge the explicit file, which must exist
//! 5. Apply env var fallbacks for unset fields
//! 6. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{SetFields, deep_merge};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the configuration with layered file precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, if the explicit
/// file is missing, or if the merged configuration fails validation.
pub fn load(explicit: Option<&Path>) -> ConfigResult<Config> {
    let mut layers = vec![(PathBuf::from("/etc/appman/config.toml"), false)];
    if let Some(user) = user_config_path() {
        layers.push((user, false));
    }
    if let Some(path) = explicit {
        layers.push((path.to_path_buf(), true));
    }
    load_layers(&layers, &collect_env_vars())
}

/// Load from an explicit layer list. `required` layers must exist.
pub(crate) fn load_layers<S: ::std::hash::BuildHasher>(
    layers: &[(PathBuf, bool)],
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let mut merged = parse_defaults()?;
    let mut set_fields = SetFields::new();

    for (path, required) in layers {
        let overlay = if *required {
            Some(read_file(path)?)
        } else {
            try_load_file(path)?
        };
        if let Some(overlay) = overlay {
            deep_merge(&mut merged, &overlay, "", &mut set_fields);
            info!(path = %path.display(), "loaded config layer");
        }
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut set_fields, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    finish(merged, "<merged config>")
}

/// Load a config from a specific file path on top of the defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = read_file(path)?;
    let mut merged = parse_defaults()?;
    deep_merge(&mut merged, &overlay, "", &mut SetFields::new());
    finish(merged, &path.display().to_string())
}

/// Parse a TOML document on top of the defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] on parse or validation failure.
pub fn from_toml_str(content: &str, label: &str) -> ConfigResult<Config> {
    let overlay: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: label.to_owned(),
        source: e,
    })?;
    let mut merged = parse_defaults()?;
    deep_merge(&mut merged, &overlay, "", &mut SetFields::new());
    finish(merged, label)
}

fn parse_defaults() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

fn finish(merged: toml::Value, label: &str) -> ConfigResult<Config> {
    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: label.to_owned(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(oversized(path, metadata.len()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(path, &content)
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(oversized(path, content.len() as u64));
    }
    parse(path, &content).map(Some)
}

fn parse(path: &Path, content: &str) -> ConfigResult<toml::Value> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

fn oversized(path: &Path, len: u64) -> ConfigError {
    ConfigError::ValidationError {
        field: path.display().to_string(),
        message: format!(
            "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
        ),
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("appman").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_try_load_file_missing() {
        let result = try_load_file(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_from_toml_str_overrides_defaults() {
        let config = from_toml_str(
            r#"
            [runtime]
            quit_grace_ms = 1000

            [access_policy.openUrl]
            executables = ["/bin/evil"]
            capabilities = ["browser"]
        "#,
            "test",
        )
        .unwrap();

        assert_eq!(config.runtime.quit_grace_ms, 1000);
        assert_eq!(config.runtime.max_ancestry_depth, 4);
        assert_eq!(config.intents.reply_from_application_timeout_ms, 5000);
        let rule = &config.access_policy["openUrl"];
        assert_eq!(rule.executables, vec!["/bin/evil".to_owned()]);
        assert!(rule.uids.is_empty());
    }

    #[test]
    fn test_layers_and_env_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let env: HashMap<String, String> = [
            ("APPMAN_LOG_LEVEL".to_owned(), "trace".to_owned()),
            ("APPMAN_TIMEOUT_FACTOR".to_owned(), "5".to_owned()),
        ]
        .into_iter()
        .collect();

        let config = load_layers(
            &[
                (PathBuf::from("/nonexistent/appman.toml"), false),
                (file.path().to_path_buf(), true),
            ],
            &env,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.debug.timeout_factor, 5);
    }

    #[test]
    fn test_required_layer_must_exist() {
        let result = load_layers(
            &[(PathBuf::from("/nonexistent/appman.toml"), true)],
            &HashMap::<String, String>::new(),
        );
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = from_toml_str("[runtime]\nquit_grace_ms = 0", "test");
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}

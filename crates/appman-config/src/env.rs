//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override. They are only applied to fields
//! that no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::SetFields;

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `APPMAN_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "APPMAN_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "APPMAN_LOG_FORMAT",
        field_path: "logging.format",
    },
    EnvMapping {
        var_name: "APPMAN_TIMEOUT_FACTOR",
        field_path: "debug.timeout_factor",
    },
    EnvMapping {
        var_name: "APPMAN_QUICK_LAUNCH_RUNTIMES",
        field_path: "quick_launcher.runtimes_per_container",
    },
    EnvMapping {
        var_name: "APPMAN_SLOW_ANIMATIONS",
        field_path: "runtime.slow_animations",
    },
];

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    set_fields: &mut SetFields,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if set_fields.contains(mapping.field_path) {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );

            set_field_from_string(merged, mapping.field_path, val);
            set_fields.insert(mapping.field_path.to_owned());
            count = count.saturating_add(1);
        }
    }

    count
}

/// Set a field in the TOML tree from a string value, creating intermediate
/// tables as needed.
fn set_field_from_string(root: &mut toml::Value, path: &str, val: &str) {
    let toml_val = coerce_to_toml_value(val);

    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment)
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), toml_val);
    }
}

/// Booleans and integers become typed TOML values; everything else stays a
/// string.
fn coerce_to_toml_value(val: &str) -> toml::Value {
    if let Ok(b) = val.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = val.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(val.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_only_for_unset_fields() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut set = SetFields::new();
        set.insert("logging.level".to_owned());

        let env: HashMap<String, String> = [
            ("APPMAN_LOG_LEVEL".to_owned(), "trace".to_owned()),
            ("APPMAN_TIMEOUT_FACTOR".to_owned(), "3".to_owned()),
            ("APPMAN_SLOW_ANIMATIONS".to_owned(), "true".to_owned()),
        ]
        .into_iter()
        .collect();

        let applied = apply_env_fallbacks(&mut merged, &mut set, &env);
        assert_eq!(applied, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
        assert_eq!(merged["debug"]["timeout_factor"].as_integer(), Some(3));
        assert_eq!(merged["runtime"]["slow_animations"].as_bool(), Some(true));
    }
}

use std::collections::BTreeSet;

/// Dotted paths of leaf fields set by some file layer.
pub type SetFields = BTreeSet<String>;

/// Merge `overlay` into `base`. Tables merge recursively, everything else
/// (including arrays) replaces. Every replaced leaf path is recorded in
/// `set_fields`.
pub fn deep_merge(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    set_fields: &mut SetFields,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_child) in overlay_table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match base_table.get_mut(key) {
                    Some(base_child) if base_child.is_table() && overlay_child.is_table() => {
                        deep_merge(base_child, overlay_child, &path, set_fields);
                    },
                    _ => {
                        record_leaves(overlay_child, &path, set_fields);
                        base_table.insert(key.clone(), overlay_child.clone());
                    },
                }
            }
        },
        (base, overlay) => {
            record_leaves(overlay, prefix, set_fields);
            *base = overlay.clone();
        },
    }
}

fn record_leaves(val: &toml::Value, prefix: &str, set_fields: &mut SetFields) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &format!("{prefix}.{key}"), set_fields);
        }
    } else {
        set_fields.insert(prefix.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_tables_and_track_paths() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [runtime]
            quit_grace_ms = 250
            default_container = "process"
        "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [runtime]
            quit_grace_ms = 500
            [access_policy.openUrl]
            executables = ["/bin/evil"]
        "#,
        )
        .unwrap();

        let mut set = SetFields::new();
        deep_merge(&mut base, &overlay, "", &mut set);

        assert_eq!(base["runtime"]["quit_grace_ms"].as_integer(), Some(500));
        assert_eq!(
            base["runtime"]["default_container"].as_str(),
            Some("process")
        );
        assert!(set.contains("runtime.quit_grace_ms"));
        assert!(set.contains("access_policy.openUrl.executables"));
        assert!(!set.contains("runtime.default_container"));
    }
}

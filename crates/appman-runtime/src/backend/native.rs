//! Out-of-process backends: native binaries and launcher stubs.

use std::collections::BTreeMap;

use appman_core::{Application, Value};

use super::{Handshake, LaunchSpec, RuntimeBackend};
use crate::error::{RuntimeError, RuntimeResult};
use crate::settings::RuntimeSettings;

/// File name prefix of launcher stubs inside the launcher directory.
pub const LAUNCHER_PREFIX: &str = "appman-launcher-";

/// Runtime parameter holding extra command line arguments.
const ARGUMENTS_PARAMETER: &str = "arguments";

/// Runtime parameter holding extra environment variables.
const ENVIRONMENT_PARAMETER: &str = "environmentVariables";

/// Runs the application's own executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl RuntimeBackend for NativeBackend {
    fn id(&self) -> &str {
        "native"
    }

    fn handshake(&self) -> Handshake {
        Handshake::PeerChannel
    }

    fn launch_spec(
        &self,
        application: Option<&Application>,
        _settings: &RuntimeSettings,
    ) -> RuntimeResult<LaunchSpec> {
        let app = application.ok_or_else(|| {
            RuntimeError::LaunchConfiguration("native runtimes need an application".to_owned())
        })?;
        if app.main_file.is_empty() {
            return Err(RuntimeError::LaunchConfiguration(format!(
                "application '{}' has no main file",
                app.id
            )));
        }

        Ok(LaunchSpec {
            program: app.code_dir.join(&app.main_file),
            args: string_list(app.runtime_parameters.get(ARGUMENTS_PARAMETER)),
            env: string_map(app.runtime_parameters.get(ENVIRONMENT_PARAMETER)),
            via_launcher: false,
        })
    }
}

/// Runs a generic launcher stub that loads the application once told to.
///
/// Can be started without an application, which makes it usable for the
/// quick launcher.
#[derive(Debug, Clone)]
pub struct LauncherBackend {
    id: String,
}

impl LauncherBackend {
    /// Backend for runtime `id`, executing `appman-launcher-<id>`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl RuntimeBackend for LauncherBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_quick_launch(&self) -> bool {
        true
    }

    fn handshake(&self) -> Handshake {
        Handshake::PeerChannel
    }

    fn launch_spec(
        &self,
        application: Option<&Application>,
        settings: &RuntimeSettings,
    ) -> RuntimeResult<LaunchSpec> {
        let env = application
            .map(|app| string_map(app.runtime_parameters.get(ENVIRONMENT_PARAMETER)))
            .unwrap_or_default();
        Ok(LaunchSpec {
            program: settings
                .launcher_dir
                .join(format!("{LAUNCHER_PREFIX}{}", self.id)),
            args: Vec::new(),
            env,
            via_launcher: true,
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(ToOwned::to_owned))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k.clone(), s.clone())),
                    Value::Int(i) => Some((k.clone(), i.to_string())),
                    Value::Bool(b) => Some((k.clone(), b.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

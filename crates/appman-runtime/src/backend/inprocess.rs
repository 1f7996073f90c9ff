//! Backend for runtimes that execute inside the manager process.

use appman_core::Application;

use super::{Handshake, LaunchSpec, RuntimeBackend};
use crate::error::RuntimeResult;
use crate::settings::RuntimeSettings;

/// In-process runtime. Running as soon as it is started; there is no peer
/// handshake and no quick launch.
#[derive(Debug, Clone)]
pub struct InProcessBackend {
    id: String,
}

impl InProcessBackend {
    /// Backend registered under `id`, conventionally `<runtime>-inprocess`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl RuntimeBackend for InProcessBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_in_process(&self) -> bool {
        true
    }

    fn handshake(&self) -> Handshake {
        Handshake::None
    }

    fn launch_spec(
        &self,
        application: Option<&Application>,
        _settings: &RuntimeSettings,
    ) -> RuntimeResult<LaunchSpec> {
        let program = application
            .filter(|app| !app.main_file.is_empty())
            .map_or_else(|| self.id.clone().into(), |app| app.code_dir.join(&app.main_file));
        Ok(LaunchSpec {
            program,
            ..LaunchSpec::default()
        })
    }
}

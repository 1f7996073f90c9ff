//! Test fixtures for common types.

use std::path::Path;
use std::sync::Arc;

use appman_config::Config;
use appman_core::{Application, ApplicationId, InMemoryDirectory};
use tempfile::TempDir;

/// Create an application with a main file, runnable by the native backend.
///
/// # Panics
///
/// Panics if `id` is not a valid application id.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_application(id: &str, runtime: &str) -> Application {
    let code_dir = format!("/opt/apps/{id}");
    let id = ApplicationId::new(id).expect("valid test application id");
    Application::new(id, runtime)
        .with_code_dir(code_dir)
        .with_main_file("main")
}

/// [`test_application`] holding `capabilities`.
#[must_use]
pub fn test_application_with_capabilities(
    id: &str,
    runtime: &str,
    capabilities: &[&str],
) -> Application {
    test_application(id, runtime).with_capabilities(capabilities.iter().copied())
}

/// Shared directory holding `apps`.
#[must_use]
pub fn test_directory(apps: impl IntoIterator<Item = Application>) -> Arc<InMemoryDirectory> {
    Arc::new(apps.into_iter().collect())
}

/// Configuration with the pool disabled, a short quit grace period and
/// sockets under `socket_dir` if given.
#[must_use]
pub fn test_config(socket_dir: Option<&Path>) -> Config {
    let mut config = Config::default();
    config.runtime.quit_grace_ms = 250;
    config.runtime.peer_socket_dir = socket_dir.map(Path::to_path_buf);
    config.quick_launcher.runtimes_per_container = 0;
    config
}

/// A fake `/proc` tree for ancestry and caller lookups.
#[derive(Debug)]
pub struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    /// Empty tree.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create fake proc root"),
        }
    }

    /// Root to hand to `ProcfsAncestry::new` or `ProcfsCallerResolver::new`.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Add a process with its parent, real uid and, if given, the target of
    /// its `exe` link.
    ///
    /// # Panics
    ///
    /// Panics if the entry cannot be written.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_process(self, pid: u32, ppid: u32, uid: u32, exe: Option<&str>) -> Self {
        let pid_dir = self.dir.path().join(pid.to_string());
        std::fs::create_dir_all(&pid_dir).expect("create pid dir");
        std::fs::write(
            pid_dir.join("status"),
            format!("Name:\tproc{pid}\nState:\tS (sleeping)\nPPid:\t{ppid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        )
        .expect("write status");
        if let Some(exe) = exe {
            std::os::unix::fs::symlink(exe, pid_dir.join("exe")).expect("link exe");
        }
        self
    }
}

impl Default for FakeProc {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    use appman_core::ApplicationDirectory;

    #[test]
    fn test_directory_lookup() {
        let dir = test_directory([
            test_application_with_capabilities("com.example.camera", "native", &["camera"]),
            test_application("com.example.music", "native"),
        ]);
        let camera = ApplicationId::new("com.example.camera").unwrap();
        assert!(dir.capabilities(&camera).contains("camera"));
        assert!(dir.application(&camera).is_some());
    }

    #[test]
    fn test_fake_proc_layout() {
        let proc = FakeProc::new().with_process(42, 1, 1000, Some("/bin/evil"));
        let status = std::fs::read_to_string(proc.root().join("42/status")).unwrap();
        assert!(status.contains("PPid:\t1"));
        assert_eq!(
            std::fs::read_link(proc.root().join("42/exe")).unwrap(),
            std::path::PathBuf::from("/bin/evil")
        );
    }
}

//! Plain host process container.

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};

use appman_core::{Application, ExitStatus};
use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Container, ContainerBackend, ContainerProcess, SpawnedProcess};
use crate::error::{ContainerError, ContainerResult};

/// `ENOMEM` as reported by `fork`/`posix_spawn`.
const ENOMEM: i32 = 12;

/// Runs programs as ordinary child processes of the manager.
#[derive(Debug, Clone)]
pub struct ProcessContainerBackend {
    base_dir: PathBuf,
}

impl Default for ProcessContainerBackend {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/"),
        }
    }
}

impl ProcessContainerBackend {
    /// Backend whose processes start in `base_dir` unless the application
    /// provides a code directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl ContainerBackend for ProcessContainerBackend {
    fn id(&self) -> &str {
        "process"
    }

    fn supports_quick_launch(&self) -> bool {
        true
    }

    fn create(&self, application: Option<&Application>) -> ContainerResult<Box<dyn Container>> {
        let base_dir = application
            .map(|app| app.code_dir.clone())
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| self.base_dir.clone());
        Ok(Box::new(ProcessContainer {
            base_dir,
            program: None,
        }))
    }
}

#[derive(Debug)]
struct ProcessContainer {
    base_dir: PathBuf,
    program: Option<PathBuf>,
}

#[async_trait]
impl Container for ProcessContainer {
    fn backend_id(&self) -> &str {
        "process"
    }

    fn set_program(&mut self, program: PathBuf) -> ContainerResult<()> {
        if self.program.is_some() {
            return Err(ContainerError::ProgramAlreadySet);
        }
        self.program = Some(program);
        Ok(())
    }

    fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn start(
        &mut self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> ContainerResult<SpawnedProcess> {
        let program = self.program.clone().ok_or(ContainerError::NoProgram)?;

        let mut command = Command::new(&program);
        command.args(&args).envs(&env);
        if self.base_dir.is_dir() {
            command.current_dir(&self.base_dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.raw_os_error() == Some(ENOMEM) {
                ContainerError::OutOfMemory {
                    program: program.clone(),
                }
            } else {
                ContainerError::StartFailed {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id();
        debug!(program = %program.display(), pid, "Process started");

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => status
                    .code()
                    .map(ExitStatus::Code)
                    .or_else(|| status.signal().map(ExitStatus::Signal))
                    .unwrap_or(ExitStatus::Code(-1)),
                Err(e) => {
                    warn!(error = %e, "Failed to wait for child process");
                    ExitStatus::Code(-1)
                },
            };
            let _ = tx.send(status);
        });

        Ok(SpawnedProcess {
            handle: Box::new(HostProcess { pid }),
            exited: rx,
        })
    }
}

#[derive(Debug)]
struct HostProcess {
    pid: Option<u32>,
}

impl HostProcess {
    fn signal(&self, signal: Signal) -> ContainerResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).map_err(|_| ContainerError::Signal {
            pid,
            message: "pid out of range".to_owned(),
        })?;
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ContainerError::Signal {
                pid,
                message: e.to_string(),
            }),
        }
    }
}

impl ContainerProcess for HostProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self) -> ContainerResult<()> {
        self.signal(Signal::SIGTERM)
    }

    fn kill(&self) -> ContainerResult<()> {
        self.signal(Signal::SIGKILL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_set_once() {
        let backend = ProcessContainerBackend::default();
        let mut container = backend.create(None).unwrap();
        container.set_program(PathBuf::from("/bin/true")).unwrap();
        assert!(matches!(
            container.set_program(PathBuf::from("/bin/false")),
            Err(ContainerError::ProgramAlreadySet)
        ));
        assert_eq!(container.program(), Some(Path::new("/bin/true")));
    }

    #[tokio::test]
    async fn test_start_without_program_fails() {
        let backend = ProcessContainerBackend::default();
        let mut container = backend.create(None).unwrap();
        let err = container.start(vec![], BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, ContainerError::NoProgram));
    }

    #[tokio::test]
    async fn test_reports_exit_code() {
        let backend = ProcessContainerBackend::default();
        let mut container = backend.create(None).unwrap();
        container.set_program(PathBuf::from("/bin/sh")).unwrap();
        let spawned = container
            .start(vec!["-c".into(), "exit 3".into()], BTreeMap::new())
            .await
            .unwrap();
        assert!(spawned.handle.pid().is_some());
        assert_eq!(spawned.exited.await.unwrap(), ExitStatus::Code(3));
    }

    #[tokio::test]
    async fn test_terminate_reports_signal() {
        let backend = ProcessContainerBackend::default();
        let mut container = backend.create(None).unwrap();
        container.set_program(PathBuf::from("/bin/sleep")).unwrap();
        let spawned = container
            .start(vec!["30".into()], BTreeMap::new())
            .await
            .unwrap();
        spawned.handle.terminate().unwrap();
        assert_eq!(spawned.exited.await.unwrap(), ExitStatus::Signal(15));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let backend = ProcessContainerBackend::default();
        let mut container = backend.create(None).unwrap();
        container
            .set_program(PathBuf::from("/nonexistent/appman-test-binary"))
            .unwrap();
        let err = container.start(vec![], BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, ContainerError::StartFailed { .. }));
        assert!(!err.is_fatal());
    }
}

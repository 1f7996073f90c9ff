//! Container for runtimes executing inside the manager process.
//!
//! There is no OS process to signal. Terminate and kill resolve the exit
//! receiver with the matching signal number so the runtime sees the same
//! classification it would for a real process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use appman_core::{Application, ExitStatus};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::sync::oneshot;

use super::{Container, ContainerBackend, ContainerProcess, SpawnedProcess};
use crate::error::{ContainerError, ContainerResult};

/// Backend for in-process runtimes.
#[derive(Debug, Default)]
pub struct InProcessContainerBackend;

impl InProcessContainerBackend {
    /// Create the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ContainerBackend for InProcessContainerBackend {
    fn id(&self) -> &str {
        "inprocess"
    }

    fn supports_quick_launch(&self) -> bool {
        false
    }

    fn is_in_process(&self) -> bool {
        true
    }

    fn create(&self, application: Option<&Application>) -> ContainerResult<Box<dyn Container>> {
        Ok(Box::new(InProcessContainer {
            base_dir: application.map(|a| a.code_dir.clone()).unwrap_or_default(),
            program: None,
        }))
    }
}

#[derive(Debug)]
struct InProcessContainer {
    base_dir: PathBuf,
    program: Option<PathBuf>,
}

#[async_trait]
impl Container for InProcessContainer {
    fn backend_id(&self) -> &str {
        "inprocess"
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
        _args: Vec<String>,
        _env: BTreeMap<String, String>,
    ) -> ContainerResult<SpawnedProcess> {
        let (tx, rx) = oneshot::channel();
        Ok(SpawnedProcess {
            handle: Box::new(InProcessHandle {
                exit: Mutex::new(Some(tx)),
            }),
            exited: rx,
        })
    }
}

#[derive(Debug)]
struct InProcessHandle {
    exit: Mutex<Option<oneshot::Sender<ExitStatus>>>,
}

impl InProcessHandle {
    fn finish(&self, signal: Signal) {
        let sender = self
            .exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(ExitStatus::Signal(signal as i32));
        }
    }
}

impl ContainerProcess for InProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    fn terminate(&self) -> ContainerResult<()> {
        self.finish(Signal::SIGTERM);
        Ok(())
    }

    fn kill(&self) -> ContainerResult<()> {
        self.finish(Signal::SIGKILL);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_resolves_exit_once() {
        let mut container = InProcessContainerBackend::new().create(None).unwrap();
        let spawned = container.start(vec![], BTreeMap::new()).await.unwrap();
        assert_eq!(spawned.handle.pid(), Some(std::process::id()));

        spawned.handle.terminate().unwrap();
        spawned.handle.kill().unwrap();
        assert_eq!(spawned.exited.await.unwrap(), ExitStatus::Signal(15));
    }
}

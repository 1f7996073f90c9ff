//! Scripted container backend for unit tests of the supervisor and pool.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use appman_core::{Application, ExitStatus};
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::container::{Container, ContainerBackend, ContainerProcess, SpawnedProcess};
use crate::error::{ContainerError, ContainerResult};

#[derive(Debug, Default)]
pub(crate) struct Log {
    pub(crate) created: usize,
    pub(crate) started: Vec<PathBuf>,
    pub(crate) signals: Vec<(u32, &'static str)>,
    pub(crate) exits: HashMap<u32, oneshot::Sender<ExitStatus>>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeBackend {
    pub(crate) id: &'static str,
    pub(crate) fail_start: bool,
    pub(crate) log: Arc<Mutex<Log>>,
    next_pid: Arc<AtomicU32>,
}

impl FakeBackend {
    pub(crate) fn new(id: &'static str) -> Self {
        Self {
            id,
            fail_start: false,
            log: Arc::default(),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    pub(crate) fn failing(id: &'static str) -> Self {
        Self {
            fail_start: true,
            ..Self::new(id)
        }
    }

    pub(crate) fn exit(&self, pid: u32, status: ExitStatus) {
        if let Some(tx) = self.log.lock().unwrap().exits.remove(&pid) {
            let _ = tx.send(status);
        }
    }
}

impl ContainerBackend for FakeBackend {
    fn id(&self) -> &str {
        self.id
    }

    fn supports_quick_launch(&self) -> bool {
        true
    }

    fn create(&self, _application: Option<&Application>) -> ContainerResult<Box<dyn Container>> {
        self.log.lock().unwrap().created += 1;
        Ok(Box::new(FakeContainer {
            backend: self.clone(),
            program: None,
        }))
    }
}

#[derive(Debug)]
struct FakeContainer {
    backend: FakeBackend,
    program: Option<PathBuf>,
}

#[async_trait]
impl Container for FakeContainer {
    fn backend_id(&self) -> &str {
        self.backend.id
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
        Path::new("/")
    }

    async fn start(
        &mut self,
        _args: Vec<String>,
        _env: BTreeMap<String, String>,
    ) -> ContainerResult<SpawnedProcess> {
        let program = self.program.clone().ok_or(ContainerError::NoProgram)?;
        if self.backend.fail_start {
            return Err(ContainerError::StartFailed {
                program,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let pid = self.backend.next_pid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut log = self.backend.log.lock().unwrap();
        log.started.push(program);
        log.exits.insert(pid, tx);
        Ok(SpawnedProcess {
            handle: Box::new(FakeProcess {
                pid,
                log: Arc::clone(&self.backend.log),
            }),
            exited: rx,
        })
    }
}

#[derive(Debug)]
struct FakeProcess {
    pid: u32,
    log: Arc<Mutex<Log>>,
}

impl ContainerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&self) -> ContainerResult<()> {
        self.log.lock().unwrap().signals.push((self.pid, "terminate"));
        Ok(())
    }

    fn kill(&self) -> ContainerResult<()> {
        let mut log = self.log.lock().unwrap();
        log.signals.push((self.pid, "kill"));
        if let Some(tx) = log.exits.remove(&self.pid) {
            let _ = tx.send(ExitStatus::Signal(9));
        }
        Ok(())
    }
}

//! Mock implementations for testing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use appman_core::{Application, ExitStatus, ParameterMap};
use appman_intents::{IncomingIntent, IntentHandler};
use appman_policy::CallerResolver;
use appman_runtime::{
    Container, ContainerBackend, ContainerError, ContainerProcess, ContainerResult,
    ProcessAncestry, SpawnedProcess,
};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Signal recorded by [`MockContainerBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSignal {
    /// `terminate()` was called.
    Terminate,
    /// `kill()` was called.
    Kill,
}

/// One process started by [`MockContainerBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    /// Assigned pid.
    pub pid: u32,
    /// Program the container was told to run.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MockLog {
    created: usize,
    started: Vec<StartedProcess>,
    signals: Vec<(u32, MockSignal)>,
    exits: HashMap<u32, oneshot::Sender<ExitStatus>>,
}

/// Container backend whose processes only exist as records.
///
/// Processes never exit on their own. Tests end them with
/// [`exit`](Self::exit); `kill()` ends them with signal 9 and, if
/// [`exit_on_terminate`](Self::exit_on_terminate) is set, `terminate()`
/// ends them with signal 15.
#[derive(Debug, Clone)]
pub struct MockContainerBackend {
    id: String,
    quick_launch: bool,
    fail_start: bool,
    exit_on_terminate: bool,
    log: Arc<Mutex<MockLog>>,
    next_pid: Arc<AtomicU32>,
}

impl MockContainerBackend {
    /// Backend registered as `id`, quick-launch capable.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quick_launch: true,
            fail_start: false,
            exit_on_terminate: false,
            log: Arc::default(),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Every `start()` fails with a spawn error.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Containers cannot be prepared for the quick launcher.
    #[must_use]
    pub fn without_quick_launch(mut self) -> Self {
        self.quick_launch = false;
        self
    }

    /// `terminate()` ends the process right away.
    #[must_use]
    pub fn exit_on_terminate(mut self) -> Self {
        self.exit_on_terminate = true;
        self
    }

    fn log(&self) -> std::sync::MutexGuard<'_, MockLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report `status` for a running process. Returns `false` if it already
    /// exited.
    pub fn exit(&self, pid: u32, status: ExitStatus) -> bool {
        match self.log().exits.remove(&pid) {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    /// Containers created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.log().created
    }

    /// Processes started so far, in order.
    #[must_use]
    pub fn started(&self) -> Vec<StartedProcess> {
        self.log().started.clone()
    }

    /// Pids of the processes started so far, in order.
    #[must_use]
    pub fn started_pids(&self) -> Vec<u32> {
        self.log().started.iter().map(|p| p.pid).collect()
    }

    /// Signals delivered so far, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<(u32, MockSignal)> {
        self.log().signals.clone()
    }

    /// Pids that have not exited.
    #[must_use]
    pub fn running_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.log().exits.keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}

impl ContainerBackend for MockContainerBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_quick_launch(&self) -> bool {
        self.quick_launch
    }

    fn create(&self, _application: Option<&Application>) -> ContainerResult<Box<dyn Container>> {
        let mut log = self.log();
        log.created = log.created.saturating_add(1);
        Ok(Box::new(MockContainer {
            backend: self.clone(),
            program: None,
        }))
    }
}

#[derive(Debug)]
struct MockContainer {
    backend: MockContainerBackend,
    program: Option<PathBuf>,
}

#[async_trait]
impl Container for MockContainer {
    fn backend_id(&self) -> &str {
        &self.backend.id
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
        args: Vec<String>,
        env: BTreeMap<String, String>,
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
        let mut log = self.backend.log();
        log.started.push(StartedProcess {
            pid,
            program,
            args,
            env,
        });
        log.exits.insert(pid, tx);
        Ok(SpawnedProcess {
            handle: Box::new(MockProcess {
                pid,
                backend: self.backend.clone(),
            }),
            exited: rx,
        })
    }
}

#[derive(Debug)]
struct MockProcess {
    pid: u32,
    backend: MockContainerBackend,
}

impl MockProcess {
    fn record(&self, signal: MockSignal, exit: Option<ExitStatus>) {
        let mut log = self.backend.log();
        log.signals.push((self.pid, signal));
        if let Some(status) = exit
            && let Some(tx) = log.exits.remove(&self.pid)
        {
            let _ = tx.send(status);
        }
    }
}

impl ContainerProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&self) -> ContainerResult<()> {
        let exit = self.backend.exit_on_terminate.then_some(ExitStatus::Signal(15));
        self.record(MockSignal::Terminate, exit);
        Ok(())
    }

    fn kill(&self) -> ContainerResult<()> {
        self.record(MockSignal::Kill, Some(ExitStatus::Signal(9)));
        Ok(())
    }
}

/// Process ancestry from a fixed pid to parent table.
#[derive(Debug, Clone, Default)]
pub struct MockAncestry {
    parents: HashMap<u32, u32>,
}

impl MockAncestry {
    /// Empty table: every pid is its own root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `pid`'s parent.
    #[must_use]
    pub fn with_parent(mut self, pid: u32, parent: u32) -> Self {
        self.parents.insert(pid, parent);
        self
    }
}

impl ProcessAncestry for MockAncestry {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.parents.get(&pid).copied()
    }
}

/// Caller identities from fixed tables.
#[derive(Debug, Clone, Default)]
pub struct MockCallers {
    uids: HashMap<u32, u32>,
    executables: HashMap<u32, PathBuf>,
}

impl MockCallers {
    /// No known callers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a caller.
    #[must_use]
    pub fn with_caller(mut self, pid: u32, uid: u32, executable: impl Into<PathBuf>) -> Self {
        self.uids.insert(pid, uid);
        self.executables.insert(pid, executable.into());
        self
    }
}

impl CallerResolver for MockCallers {
    fn uid(&self, pid: u32) -> Option<u32> {
        self.uids.get(&pid).copied()
    }

    fn executable(&self, pid: u32) -> Option<PathBuf> {
        self.executables.get(&pid).cloned()
    }
}

/// Intent handler that records what it receives and answers with a fixed
/// result.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<IncomingIntent>>>,
    result: ParameterMap,
    error: Option<String>,
}

impl RecordingHandler {
    /// Handler answering with an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer with `result`.
    #[must_use]
    pub fn with_result(mut self, result: ParameterMap) -> Self {
        self.result = result;
        self
    }

    /// Fail every request with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Requests handled so far.
    #[must_use]
    pub fn received(&self) -> Vec<IncomingIntent> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests handled so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl IntentHandler for RecordingHandler {
    async fn handle(&self, intent: IncomingIntent) -> Result<ParameterMap, String> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(intent);
        match &self.error {
            Some(message) => Err(message.clone()),
            None => Ok(self.result.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_records_and_exits() {
        let backend = MockContainerBackend::new("process");
        let mut container = backend.create(None).unwrap();
        container.set_program(PathBuf::from("/opt/app/bin")).unwrap();
        assert!(matches!(
            container.set_program(PathBuf::from("/other")),
            Err(ContainerError::ProgramAlreadySet)
        ));

        let spawned = container
            .start(vec!["--flag".into()], BTreeMap::new())
            .await
            .unwrap();
        let pid = spawned.handle.pid().unwrap();
        assert_eq!(backend.created(), 1);
        assert_eq!(backend.started()[0].args, vec!["--flag".to_owned()]);
        assert_eq!(backend.running_pids(), vec![pid]);

        spawned.handle.terminate().unwrap();
        assert_eq!(backend.running_pids(), vec![pid]);
        assert!(backend.exit(pid, ExitStatus::Code(3)));
        assert_eq!(spawned.exited.await.unwrap(), ExitStatus::Code(3));
        assert!(!backend.exit(pid, ExitStatus::Code(0)));
        assert_eq!(backend.signals(), vec![(pid, MockSignal::Terminate)]);
    }

    #[tokio::test]
    async fn test_mock_backend_kill_and_failing_start() {
        let backend = MockContainerBackend::new("process");
        let mut container = backend.create(None).unwrap();
        container.set_program(PathBuf::from("/bin/app")).unwrap();
        let spawned = container.start(Vec::new(), BTreeMap::new()).await.unwrap();
        spawned.handle.kill().unwrap();
        assert_eq!(spawned.exited.await.unwrap(), ExitStatus::Signal(9));

        let failing = MockContainerBackend::new("process").failing();
        let mut container = failing.create(None).unwrap();
        container.set_program(PathBuf::from("/bin/app")).unwrap();
        assert!(container.start(Vec::new(), BTreeMap::new()).await.is_err());
        assert!(failing.started().is_empty());
    }

    #[test]
    fn test_mock_ancestry_walks_table() {
        let ancestry = MockAncestry::new().with_parent(300, 200).with_parent(200, 100);
        assert!(ancestry.descends_from(300, 100, 2));
        assert!(!ancestry.descends_from(300, 100, 1));
    }
}

//! The runtime state machine.
//!
//! A [`Runtime`] owns one application process from spawn to exit. It never
//! reacts to the outside world on its own: the supervisor feeds it
//! [`RuntimeSignal`](crate::RuntimeSignal)s and calls the `on_*` handlers on
//! its turn.
//!
//! ```text
//! NotRunning --start--> StartingUp --handshake--> Running
//!      ^                    |                        |
//!      |                    +--------stop------------+
//!      |                                v
//!      +-------------exit------- ShuttingDown
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use appman_core::{Application, ExitKind, ExitStatus, RuntimeId, RuntimeState};
use appman_events::{AppManEvent, EventBus, EventMetadata};
use nix::sys::signal::Signal;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ancestry::ProcessAncestry;
use crate::backend::{Handshake, RuntimeBackend};
use crate::container::{Container, ContainerProcess};
use crate::error::{RuntimeError, RuntimeResult};
use crate::peer::{ControlCall, PeerEndpoints, PeerLink};
use crate::settings::RuntimeSettings;
use crate::signal::{RuntimeSignal, SignalSender, signal_channel};

/// Environment variable carrying the per-runtime security token.
pub const ENV_SECURITY_TOKEN: &str = "AM_SECURITY_TOKEN";
/// Environment variable carrying the peer channel address.
pub const ENV_PEER_ADDRESS: &str = "AM_PEER_ADDRESS";
/// Environment variable carrying the serialized launch configuration.
pub const ENV_RUNTIME_CONFIGURATION: &str = "AM_RUNTIME_CONFIGURATION";
/// Environment variable carrying the base directory inside the container.
pub const ENV_BASE_DIR: &str = "AM_BASE_DIR";
/// Argument introducing a document to open on start.
pub const START_ARGUMENT: &str = "--start-argument";

/// Length of the security token in bytes, before hex encoding.
const SECURITY_TOKEN_LEN: usize = 16;

const EVENT_SOURCE: &str = "appman-runtime";

/// Shared plumbing handed to every runtime.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Lifecycle events go here.
    pub bus: EventBus,
    /// Watchers and timers post here.
    pub signals: SignalSender,
    /// Resolved settings.
    pub settings: Arc<RuntimeSettings>,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RuntimeContext {
    /// Build a context.
    #[must_use]
    pub fn new(bus: EventBus, signals: SignalSender, settings: Arc<RuntimeSettings>) -> Self {
        Self {
            bus,
            signals,
            settings,
        }
    }

    /// Context whose signals go nowhere. Useful where a runtime is created
    /// but never started.
    #[must_use]
    pub fn detached() -> Self {
        let (signals, _) = signal_channel();
        Self::new(
            EventBus::new(),
            signals,
            Arc::new(RuntimeSettings::default()),
        )
    }
}

/// Where a stop request currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    None,
    AwaitingQuit,
    AwaitingTerminate,
}

/// Configuration blob serialized into [`ENV_RUNTIME_CONFIGURATION`].
#[derive(Debug, Serialize)]
struct LaunchConfiguration<'a> {
    runtime_id: RuntimeId,
    application: Option<&'a Application>,
    runtime_configuration: Option<&'a serde_json::Value>,
    logging_rules: &'a str,
    peer_address: Option<&'a str>,
    base_dir: String,
    slow_animations: bool,
    quick_launcher: bool,
}

/// One application process and its lifecycle.
pub struct Runtime {
    id: RuntimeId,
    backend: Arc<dyn RuntimeBackend>,
    container: Box<dyn Container>,
    application: Option<Application>,
    state: RuntimeState,
    is_quick_launcher: bool,
    started_via_launcher: bool,
    process: Option<Box<dyn ContainerProcess>>,
    peer_address: Option<String>,
    security_token: Option<String>,
    peer: Option<Arc<dyn PeerLink>>,
    connected_to_peer: bool,
    launcher_initialized: bool,
    application_interface_ready: bool,
    slow_animations: bool,
    pending_document: Option<String>,
    escalation: Escalation,
    stop_generation: u64,
    ctx: RuntimeContext,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("backend", &self.backend.id())
            .field("application", &self.application.as_ref().map(|a| &a.id))
            .field("state", &self.state)
            .field("is_quick_launcher", &self.is_quick_launcher)
            .field("connected_to_peer", &self.connected_to_peer)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime in the `NotRunning` state. Normally called through
    /// [`RuntimeBackendRegistry`](crate::RuntimeBackendRegistry).
    #[must_use]
    pub fn new(
        id: RuntimeId,
        backend: Arc<dyn RuntimeBackend>,
        container: Box<dyn Container>,
        application: Option<Application>,
        is_quick_launcher: bool,
        slow_animations: bool,
        ctx: RuntimeContext,
    ) -> Self {
        Self {
            id,
            backend,
            container,
            application,
            state: RuntimeState::NotRunning,
            is_quick_launcher,
            started_via_launcher: false,
            process: None,
            peer_address: None,
            security_token: None,
            peer: None,
            connected_to_peer: false,
            launcher_initialized: false,
            application_interface_ready: false,
            slow_animations,
            pending_document: None,
            escalation: Escalation::None,
            stop_generation: 0,
            ctx,
        }
    }

    /// Runtime handle.
    #[must_use]
    pub fn id(&self) -> RuntimeId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Bound application.
    #[must_use]
    pub fn application(&self) -> Option<&Application> {
        self.application.as_ref()
    }

    /// Backend this runtime was created by.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn RuntimeBackend> {
        &self.backend
    }

    /// Id of the container backend.
    #[must_use]
    pub fn container_id(&self) -> &str {
        self.container.backend_id()
    }

    /// Whether this runtime was created for the quick launcher.
    #[must_use]
    pub fn is_quick_launcher(&self) -> bool {
        self.is_quick_launcher
    }

    /// Whether this is a quick launcher no application was attached to yet.
    #[must_use]
    pub fn is_idle_quick_launcher(&self) -> bool {
        self.is_quick_launcher && self.application.is_none()
    }

    /// Whether the process is a launcher stub.
    #[must_use]
    pub fn started_via_launcher(&self) -> bool {
        self.started_via_launcher
    }

    /// Host pid of the spawned process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Private peer channel address, once started.
    #[must_use]
    pub fn peer_address(&self) -> Option<&str> {
        self.peer_address.as_deref()
    }

    /// Hex security token handed to the process.
    #[must_use]
    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_deref()
    }

    /// Whether handshake step 1 completed.
    #[must_use]
    pub fn connected_to_peer(&self) -> bool {
        self.connected_to_peer
    }

    /// Whether handshake step 2 completed for the bound application.
    #[must_use]
    pub fn application_interface_ready(&self) -> bool {
        self.application_interface_ready
    }

    /// Whether an idle quick launcher completed both handshake steps.
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.connected_to_peer && self.launcher_initialized
    }

    /// Slow-animation debug toggle captured at creation.
    #[must_use]
    pub fn slow_animations(&self) -> bool {
        self.slow_animations
    }

    /// Document queued for the next start.
    #[must_use]
    pub fn pending_document(&self) -> Option<&str> {
        self.pending_document.as_deref()
    }

    fn handshake(&self) -> Handshake {
        self.backend.handshake()
    }

    fn set_state(&mut self, state: RuntimeState) {
        if self.state == state {
            return;
        }
        debug!(runtime_id = %self.id, from = %self.state, to = %state, "Runtime state changed");
        self.state = state;
        self.ctx.bus.publish(AppManEvent::RuntimeStateChanged {
            metadata: EventMetadata::new(EVENT_SOURCE),
            runtime_id: self.id,
            application_id: self.application.as_ref().map(|a| a.id.clone()),
            state,
        });
    }

    fn generate_security_token() -> RuntimeResult<String> {
        let mut bytes = [0u8; SECURITY_TOKEN_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| RuntimeError::Entropy(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    /// Start the process.
    ///
    /// A no-op while starting up or running.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ShuttingDown`] while a stop is in progress.
    /// - [`RuntimeError::NoApplication`] if nothing is bound and this is not
    ///   a quick launcher. The state does not change.
    /// - Endpoint, configuration and container errors. The runtime is back
    ///   in `NotRunning` afterwards.
    pub async fn start(&mut self, endpoints: &dyn PeerEndpoints) -> RuntimeResult<()> {
        match self.state {
            RuntimeState::StartingUp | RuntimeState::Running => return Ok(()),
            RuntimeState::ShuttingDown => return Err(RuntimeError::ShuttingDown(self.id)),
            RuntimeState::NotRunning => {},
        }
        if self.application.is_none() && !self.is_quick_launcher {
            return Err(RuntimeError::NoApplication(self.id));
        }

        let spec = self
            .backend
            .launch_spec(self.application.as_ref(), &self.ctx.settings)?;
        let token = Self::generate_security_token()?;

        let peer_address = match self.handshake() {
            Handshake::PeerChannel => Some(endpoints.open(self.id, self.ctx.signals.clone())?),
            Handshake::None => None,
        };

        let base_dir = self
            .application
            .as_ref()
            .map(|app| self.container.map_host_path(&app.code_dir))
            .unwrap_or_else(|| self.container.base_dir().to_path_buf());

        let configuration = LaunchConfiguration {
            runtime_id: self.id,
            application: self.application.as_ref(),
            runtime_configuration: self.ctx.settings.backend_config.get(self.backend.id()),
            logging_rules: &self.ctx.settings.log_filter,
            peer_address: peer_address.as_deref(),
            base_dir: base_dir.display().to_string(),
            slow_animations: self.slow_animations,
            quick_launcher: self.is_quick_launcher,
        };
        let configuration = match serde_json::to_string(&configuration) {
            Ok(json) => json,
            Err(e) => {
                endpoints.close(self.id);
                return Err(RuntimeError::LaunchConfiguration(e.to_string()));
            },
        };

        let mut env: BTreeMap<String, String> = spec.env;
        env.insert(ENV_SECURITY_TOKEN.to_owned(), token.clone());
        env.insert(ENV_RUNTIME_CONFIGURATION.to_owned(), configuration);
        env.insert(ENV_BASE_DIR.to_owned(), base_dir.display().to_string());
        if let Some(address) = &peer_address {
            env.insert(ENV_PEER_ADDRESS.to_owned(), address.clone());
        }

        let mut args = spec.args;
        if !spec.via_launcher
            && let Some(document) = self.pending_document.take()
        {
            args.push(START_ARGUMENT.to_owned());
            args.push(document);
        }

        if self.container.program().is_none() {
            self.container.set_program(spec.program.clone())?;
        }

        self.started_via_launcher = spec.via_launcher;
        self.security_token = Some(token);
        self.peer_address.clone_from(&peer_address);
        self.set_state(RuntimeState::StartingUp);

        let spawned = match self.container.start(args, env).await {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(
                    runtime_id = %self.id,
                    program = %spec.program.display(),
                    error = %e,
                    "Failed to start runtime process"
                );
                if peer_address.is_some() {
                    endpoints.close(self.id);
                }
                self.peer_address = None;
                self.security_token = None;
                self.set_state(RuntimeState::NotRunning);
                return Err(e.into());
            },
        };

        let pid = spawned.handle.pid();
        info!(
            runtime_id = %self.id,
            backend_id = self.backend.id(),
            app_id = self.application.as_ref().map(|a| a.id.as_str()).unwrap_or("<quick-launcher>"),
            pid,
            "Runtime process started"
        );

        self.process = Some(spawned.handle);
        let signals = self.ctx.signals.clone();
        let runtime_id = self.id;
        let exited = spawned.exited;
        tokio::spawn(async move {
            let status = exited.await.unwrap_or(ExitStatus::Code(-1));
            let _ = signals.send(RuntimeSignal::ProcessExited { runtime_id, status });
        });

        if self.handshake() == Handshake::None {
            self.complete_startup();
        }
        Ok(())
    }

    /// Stop the process.
    ///
    /// `force` kills right away. Otherwise a runtime that has not completed
    /// the handshake is terminated right away, and one that has is asked to
    /// quit and given the grace period before it is terminated, then killed.
    pub fn stop(&mut self, force: bool) {
        if self.process.is_none() || self.state == RuntimeState::NotRunning {
            return;
        }

        self.set_state(RuntimeState::ShuttingDown);
        self.stop_generation = self.stop_generation.wrapping_add(1);

        if force {
            self.kill_process();
            self.escalation = Escalation::None;
            return;
        }

        // Both handshake steps, not just the connection.
        let handshake_done = self.application_interface_ready
            || (self.handshake() == Handshake::PeerChannel && self.is_warm());
        let quit_sent = handshake_done
            && self
                .peer
                .as_ref()
                .is_some_and(|peer| peer.send_control(ControlCall::Quit));

        if quit_sent {
            debug!(runtime_id = %self.id, grace = ?self.ctx.settings.quit_grace, "Asked runtime to quit");
            self.escalation = Escalation::AwaitingQuit;
        } else {
            self.terminate_process();
            self.escalation = Escalation::AwaitingTerminate;
        }
        self.arm_grace_timer();
    }

    fn terminate_process(&self) {
        if let Some(process) = &self.process {
            debug!(runtime_id = %self.id, "Terminating runtime");
            if let Err(e) = process.terminate() {
                warn!(runtime_id = %self.id, error = %e, "Failed to terminate runtime");
            }
        }
    }

    fn kill_process(&self) {
        if let Some(process) = &self.process {
            debug!(runtime_id = %self.id, "Killing runtime");
            if let Err(e) = process.kill() {
                warn!(runtime_id = %self.id, error = %e, "Failed to kill runtime");
            }
        }
    }

    fn arm_grace_timer(&self) {
        let signals = self.ctx.signals.clone();
        let runtime_id = self.id;
        let generation = self.stop_generation;
        let grace = self.ctx.settings.quit_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = signals.send(RuntimeSignal::GraceExpired {
                runtime_id,
                generation,
            });
        });
    }

    /// A grace timer fired. Stale timers from an earlier stop are ignored.
    pub fn on_grace_expired(&mut self, generation: u64) {
        if generation != self.stop_generation || self.state != RuntimeState::ShuttingDown {
            return;
        }
        match self.escalation {
            Escalation::AwaitingQuit => {
                info!(runtime_id = %self.id, "Runtime did not quit in time, terminating");
                self.terminate_process();
                self.escalation = Escalation::AwaitingTerminate;
                self.stop_generation = self.stop_generation.wrapping_add(1);
                self.arm_grace_timer();
            },
            Escalation::AwaitingTerminate => {
                warn!(runtime_id = %self.id, "Runtime ignored termination, killing");
                self.kill_process();
                self.escalation = Escalation::None;
            },
            Escalation::None => {},
        }
    }

    /// The process exited. Returns `true` if the runtime should be
    /// destroyed; idle quick launchers are left to their pool.
    pub fn on_process_exited(&mut self, status: ExitStatus) -> bool {
        let kind = classify_exit(status);
        let idle_quick_launcher = self.is_idle_quick_launcher();
        let handshake_done = self.application_interface_ready
            || (self.handshake() == Handshake::PeerChannel && self.is_warm());

        if kind == ExitKind::CrashExit && !handshake_done {
            if idle_quick_launcher {
                debug!(runtime_id = %self.id, signal = status.raw(), "Quick launcher crashed during startup");
            } else {
                warn!(runtime_id = %self.id, signal = status.raw(), "Runtime crashed during startup");
            }
        } else if kind == ExitKind::CrashExit {
            warn!(runtime_id = %self.id, signal = status.raw(), "Runtime crashed");
        } else {
            info!(runtime_id = %self.id, exit_code = status.raw(), ?kind, "Runtime exited");
        }

        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        self.process = None;
        self.connected_to_peer = false;
        self.launcher_initialized = false;
        self.application_interface_ready = false;
        self.escalation = Escalation::None;
        self.stop_generation = self.stop_generation.wrapping_add(1);
        self.security_token = None;

        self.set_state(RuntimeState::NotRunning);
        self.ctx.bus.publish(AppManEvent::RuntimeFinished {
            metadata: EventMetadata::new(EVENT_SOURCE),
            runtime_id: self.id,
            application_id: self.application.as_ref().map(|a| a.id.clone()),
            exit_code: status.raw(),
            exit_kind: kind,
            idle_quick_launcher,
        });
        !idle_quick_launcher
    }

    /// Handshake step 1: a process connected to this runtime's endpoint.
    /// Accepted only while starting up, once, and only from the spawned
    /// process or one of its descendants.
    pub fn on_peer_connected(
        &mut self,
        peer_pid: u32,
        link: Arc<dyn PeerLink>,
        ancestry: &dyn ProcessAncestry,
    ) -> bool {
        let accepted = self.state == RuntimeState::StartingUp
            && !self.connected_to_peer
            && self.pid().is_some_and(|pid| {
                ancestry.descends_from(peer_pid, pid, self.ctx.settings.max_ancestry_depth)
            });
        if !accepted {
            warn!(
                runtime_id = %self.id,
                peer_pid,
                state = %self.state,
                "Rejected peer connection"
            );
            link.close();
            return false;
        }

        debug!(runtime_id = %self.id, peer_pid, "Peer connected");
        link.accept();
        self.peer = Some(link);
        self.connected_to_peer = true;
        true
    }

    /// Handshake step 2: the process reported finished initialization.
    pub fn on_finished_initialization(&mut self) {
        if !self.connected_to_peer || self.state != RuntimeState::StartingUp {
            debug!(runtime_id = %self.id, state = %self.state, "Ignoring finished initialization");
            return;
        }
        self.launcher_initialized = true;
        if self.application.is_some() {
            self.complete_startup();
        } else {
            debug!(runtime_id = %self.id, "Quick launcher is warm");
        }
    }

    /// The peer channel closed.
    pub fn on_peer_disconnected(&mut self) {
        if self.peer.take().is_some() {
            debug!(runtime_id = %self.id, "Peer disconnected");
        }
        self.connected_to_peer = false;
        self.application_interface_ready = false;
    }

    fn complete_startup(&mut self) {
        if self.started_via_launcher
            && let (Some(app), Some(peer)) = (&self.application, &self.peer)
        {
            let call = ControlCall::StartApplication {
                base_dir: self
                    .container
                    .map_host_path(&app.code_dir)
                    .display()
                    .to_string(),
                main_file: app.main_file.clone(),
                document: self.pending_document.take(),
                runtime_parameters: app.runtime_parameters.clone(),
            };
            if !peer.send_control(call) {
                warn!(runtime_id = %self.id, "Failed to tell launcher to load application");
            }
        }

        if let (Some(app), Some(peer)) = (&self.application, &self.peer) {
            peer.bind_application(&app.id);
        }
        self.application_interface_ready = true;
        self.set_state(RuntimeState::Running);
        self.ctx.bus.publish(AppManEvent::ApplicationInterfaceReady {
            metadata: EventMetadata::new(EVENT_SOURCE),
            runtime_id: self.id,
            application_id: self.application.as_ref().map(|a| a.id.clone()),
        });
    }

    /// Bind an application to an idle quick launcher.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotQuickLauncher`] if this runtime is not a quick
    ///   launcher started through a launcher stub.
    /// - [`RuntimeError::AlreadyAttached`] on the second call.
    pub fn attach_application_to_quick_launcher(
        &mut self,
        application: Application,
    ) -> RuntimeResult<()> {
        if !self.is_quick_launcher || !self.started_via_launcher || self.process.is_none() {
            return Err(RuntimeError::NotQuickLauncher(self.id));
        }
        if self.application.is_some() {
            return Err(RuntimeError::AlreadyAttached(self.id));
        }

        info!(runtime_id = %self.id, app_id = %application.id, "Attaching application to quick launcher");
        self.application = Some(application);
        self.set_state(RuntimeState::StartingUp);
        if self.is_warm() {
            self.complete_startup();
        }
        Ok(())
    }

    /// Open a document: forwarded to a running process, queued otherwise.
    pub fn open_document(&mut self, document: impl Into<String>, mime_type: impl Into<String>) {
        let document = document.into();
        if self.state == RuntimeState::Running
            && let Some(peer) = &self.peer
            && peer.send_control(ControlCall::OpenDocument {
                document: document.clone(),
                mime_type: mime_type.into(),
            })
        {
            return;
        }
        self.pending_document = Some(document);
    }

    /// Path of the program, once set.
    #[must_use]
    pub fn program(&self) -> Option<PathBuf> {
        self.container.program().map(std::path::Path::to_path_buf)
    }
}

/// Classify a raw termination status.
#[must_use]
pub fn classify_exit(status: ExitStatus) -> ExitKind {
    match status {
        ExitStatus::Code(_) => ExitKind::Normal,
        ExitStatus::Signal(s) if s == Signal::SIGTERM as i32 || s == Signal::SIGKILL as i32 => {
            ExitKind::ForcedExit
        },
        ExitStatus::Signal(_) => ExitKind::CrashExit,
    }
}

//! Peer channel over private Unix sockets.
//!
//! Every runtime gets its own listening socket. The address reaches the
//! process only through its environment. A connecting process is reported to
//! the supervisor, which authenticates it by pid ancestry. Until then its
//! connection is not indexed and none of its frames are read; afterwards
//! they are decoded and forwarded as [`IpcEvent`]s or runtime signals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use appman_core::{ApplicationId, ParameterMap, RuntimeId, Value};
use appman_runtime::{
    ControlCall, PeerEndpoints, PeerLink, RuntimeError, RuntimeResult, RuntimeSignal,
    SignalSender,
};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionId, ConnectionIndex, IpcConnection};
use crate::frame::{read_frame, write_frame};
use crate::message::{Incoming, PeerMessage};

/// Something a client asked the manager to do.
#[derive(Debug)]
pub enum IpcEvent {
    /// New intent request.
    Request {
        /// Requesting connection.
        connection: Arc<IpcConnection>,
        /// Token to echo back with the assigned request id.
        client_token: String,
        /// Intent id.
        intent_id: String,
        /// Target application, empty for any.
        application_id: String,
        /// Parameters.
        parameters: ParameterMap,
    },
    /// Reply to a request the client handled.
    Reply {
        /// Replying connection.
        connection: Arc<IpcConnection>,
        /// Wire request id.
        request_id: String,
        /// Whether the handler failed.
        error: bool,
        /// Result parameters.
        result: ParameterMap,
    },
    /// Protected manager operation.
    ManagerCall {
        /// Calling connection.
        connection: Arc<IpcConnection>,
        /// Member name.
        member: String,
        /// Arguments.
        args: Vec<Value>,
    },
    /// The connection closed.
    Disconnected {
        /// Closed connection.
        connection_id: ConnectionId,
    },
}

/// Sending half of the IPC event queue.
pub type IpcEventSender = mpsc::UnboundedSender<IpcEvent>;

/// Receiving half of the IPC event queue.
pub type IpcEventReceiver = mpsc::UnboundedReceiver<IpcEvent>;

/// Create an IPC event queue.
#[must_use]
pub fn ipc_event_channel() -> (IpcEventSender, IpcEventReceiver) {
    mpsc::unbounded_channel()
}

/// Forward a decoded client call. Returns `false` for calls that were
/// dropped.
pub(crate) fn dispatch_incoming(
    incoming: Incoming,
    connection: &Arc<IpcConnection>,
    runtime_id: Option<RuntimeId>,
    signals: Option<&SignalSender>,
    events: &IpcEventSender,
) -> bool {
    let connection = Arc::clone(connection);
    match incoming {
        Incoming::FinishedInitialization => match (runtime_id, signals) {
            (Some(runtime_id), Some(signals)) => signals
                .send(RuntimeSignal::FinishedInitialization { runtime_id })
                .is_ok(),
            _ => false,
        },
        Incoming::RequestToSystem {
            client_token,
            intent_id,
            application_id,
            parameters,
        } => events
            .send(IpcEvent::Request {
                connection,
                client_token,
                intent_id,
                application_id,
                parameters,
            })
            .is_ok(),
        Incoming::ReplyFromApplication {
            request_id,
            error,
            result,
        } => events
            .send(IpcEvent::Reply {
                connection,
                request_id,
                error,
                result,
            })
            .is_ok(),
        Incoming::ManagerCall { member, args } => events
            .send(IpcEvent::ManagerCall {
                connection,
                member,
                args,
            })
            .is_ok(),
    }
}

/// Link handed to the supervisor for one connected socket.
#[derive(Debug)]
struct SocketPeerLink {
    writer: mpsc::UnboundedSender<PeerMessage>,
    connection: Arc<IpcConnection>,
    index: Arc<ConnectionIndex>,
    accepted: Notify,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl PeerLink for SocketPeerLink {
    fn send_control(&self, call: ControlCall) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.writer.send(PeerMessage::from_control(&call)).is_ok()
    }

    fn accept(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.index.insert(Arc::clone(&self.connection));
        self.accepted.notify_one();
    }

    fn bind_application(&self, application_id: &ApplicationId) {
        if !self.index.bind(self.connection.id(), application_id.clone()) {
            warn!(
                connection_id = %self.connection.id(),
                app_id = %application_id,
                "Could not bind peer connection"
            );
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

#[derive(Debug)]
struct Endpoint {
    path: PathBuf,
    cancel: CancellationToken,
}

/// Per-runtime Unix socket endpoints.
#[derive(Debug)]
pub struct UnixSocketEndpoints {
    socket_dir: PathBuf,
    index: Arc<ConnectionIndex>,
    events: IpcEventSender,
    open: Mutex<HashMap<RuntimeId, Endpoint>>,
}

impl UnixSocketEndpoints {
    /// Endpoints under `socket_dir`. Connections are registered in `index`;
    /// client calls go to `events`.
    #[must_use]
    pub fn new(
        socket_dir: impl Into<PathBuf>,
        index: Arc<ConnectionIndex>,
        events: IpcEventSender,
    ) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            index,
            events,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the sockets.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    fn bind(&self, runtime_id: RuntimeId) -> std::io::Result<(PathBuf, UnixListener)> {
        std::fs::create_dir_all(&self.socket_dir)?;
        let path = self.socket_dir.join(format!("appman-{runtime_id}.sock"));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        Ok((path, listener))
    }
}

impl PeerEndpoints for UnixSocketEndpoints {
    fn open(&self, runtime_id: RuntimeId, signals: SignalSender) -> RuntimeResult<String> {
        let (path, listener) = self.bind(runtime_id).map_err(|e| RuntimeError::PeerEndpoint {
            runtime_id,
            message: e.to_string(),
        })?;

        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            runtime_id,
            signals,
            Arc::clone(&self.index),
            self.events.clone(),
            cancel.clone(),
        ));

        let address = path.display().to_string();
        debug!(runtime_id = %runtime_id, address = %address, "Peer endpoint open");
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(runtime_id, Endpoint { path, cancel });
        Ok(address)
    }

    fn close(&self, runtime_id: RuntimeId) {
        let endpoint = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&runtime_id);
        if let Some(endpoint) = endpoint {
            endpoint.cancel.cancel();
            let _ = std::fs::remove_file(&endpoint.path);
            debug!(runtime_id = %runtime_id, "Peer endpoint closed");
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    runtime_id: RuntimeId,
    signals: SignalSender,
    index: Arc<ConnectionIndex>,
    events: IpcEventSender,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_peer(
                        stream,
                        runtime_id,
                        signals.clone(),
                        Arc::clone(&index),
                        events.clone(),
                        cancel.child_token(),
                    ));
                },
                Err(e) => {
                    warn!(runtime_id = %runtime_id, error = %e, "Failed to accept peer connection");
                },
            },
        }
    }
}

async fn serve_peer(
    stream: UnixStream,
    runtime_id: RuntimeId,
    signals: SignalSender,
    index: Arc<ConnectionIndex>,
    events: IpcEventSender,
    cancel: CancellationToken,
) {
    let peer_pid = stream
        .peer_cred()
        .ok()
        .and_then(|cred| cred.pid())
        .and_then(|pid| u32::try_from(pid).ok());
    let (read_half, mut write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<PeerMessage>();
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = write_frame(&mut write_half, &message).await {
                        debug!(error = %e, "Peer write failed");
                        break;
                    }
                },
            }
        }
    });

    let connection = IpcConnection::peer(runtime_id, peer_pid, tx.clone());
    let link = Arc::new(SocketPeerLink {
        writer: tx,
        connection: Arc::clone(&connection),
        index: Arc::clone(&index),
        accepted: Notify::new(),
        closed: AtomicBool::new(false),
        cancel: cancel.clone(),
    });
    info!(runtime_id = %runtime_id, peer_pid, connection_id = %connection.id(), "Peer connected");
    let reported = signals
        .send(RuntimeSignal::PeerConnected {
            runtime_id,
            peer_pid: peer_pid.unwrap_or(0),
            link: Arc::clone(&link) as Arc<dyn PeerLink>,
        })
        .is_ok();

    let accepted = if reported {
        // An accepted link that closed right away still goes through the
        // cleanup below.
        tokio::select! {
            biased;
            () = link.accepted.notified() => true,
            () = cancel.cancelled() => false,
        }
    } else {
        false
    };
    if !accepted {
        debug!(runtime_id = %runtime_id, connection_id = %connection.id(), "Peer connection not accepted");
        link.close();
        return;
    }

    read_loop(read_half, &connection, runtime_id, &signals, &events, &cancel).await;

    if !link.closed.load(Ordering::Acquire) {
        let _ = signals.send(RuntimeSignal::PeerDisconnected { runtime_id });
    }
    link.close();
    index.remove(connection.id());
    let _ = events.send(IpcEvent::Disconnected {
        connection_id: connection.id(),
    });
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    connection: &Arc<IpcConnection>,
    runtime_id: RuntimeId,
    signals: &SignalSender,
    events: &IpcEventSender,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = read_frame::<_, PeerMessage>(&mut reader) => frame,
        };
        let message = match frame {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "Dropping peer connection");
                return;
            },
        };
        match message.decode_incoming() {
            Ok(incoming) => {
                dispatch_incoming(incoming, connection, Some(runtime_id), Some(signals), events);
            },
            Err(e) => {
                warn!(
                    connection_id = %connection.id(),
                    interface = %message.interface,
                    member = %message.member,
                    error = %e,
                    "Rejected peer call"
                );
            },
        }
    }
}

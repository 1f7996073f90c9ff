//! Connections to application processes and the index over them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use appman_core::{ApplicationId, RuntimeId};
use appman_events::{AppManEvent, EventBus, EventMetadata};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::error::{IpcError, IpcResult};
use crate::message::{ConnectionMessage, PeerMessage};

const EVENT_SOURCE: &str = "appman-ipc";

/// Connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Transport behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Same process; messages are queued and delivered on a later turn.
    InProcess,
    /// Private Unix socket to an application process.
    PeerChannel,
}

#[derive(Debug)]
enum Transport {
    InProcess(mpsc::UnboundedSender<ConnectionMessage>),
    Peer(mpsc::UnboundedSender<PeerMessage>),
}

/// A live channel to one application process or the system UI.
#[derive(Debug)]
pub struct IpcConnection {
    id: ConnectionId,
    application_id: OnceLock<ApplicationId>,
    runtime_id: Option<RuntimeId>,
    peer_pid: Option<u32>,
    ready: AtomicBool,
    transport: Transport,
}

impl IpcConnection {
    /// In-process connection. Returns the receiver the client reads from.
    /// Ready immediately unless `bootstrapping` is set.
    #[must_use]
    pub fn in_process(
        application_id: ApplicationId,
        bootstrapping: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = OnceLock::new();
        let _ = app.set(application_id);
        let connection = Arc::new(Self {
            id: next_connection_id(),
            application_id: app,
            runtime_id: None,
            peer_pid: None,
            ready: AtomicBool::new(!bootstrapping),
            transport: Transport::InProcess(tx),
        });
        (connection, rx)
    }

    /// Peer channel connection. Not ready until the runtime's handshake
    /// completes and the application id is bound.
    #[must_use]
    pub fn peer(
        runtime_id: RuntimeId,
        peer_pid: Option<u32>,
        writer: mpsc::UnboundedSender<PeerMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            application_id: OnceLock::new(),
            runtime_id: Some(runtime_id),
            peer_pid,
            ready: AtomicBool::new(false),
            transport: Transport::Peer(writer),
        })
    }

    /// Connection handle.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Transport kind.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self.transport {
            Transport::InProcess(_) => TransportKind::InProcess,
            Transport::Peer(_) => TransportKind::PeerChannel,
        }
    }

    /// Application on the other end, once known.
    #[must_use]
    pub fn application_id(&self) -> Option<&ApplicationId> {
        self.application_id.get()
    }

    /// Runtime that owns the peer endpoint.
    #[must_use]
    pub fn runtime_id(&self) -> Option<RuntimeId> {
        self.runtime_id
    }

    /// Pid from the socket credentials.
    #[must_use]
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// Whether messages may be sent.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Bind to `application_id` and mark ready. A connection speaks for one
    /// application for its whole life; binding it to another fails.
    fn bind(&self, application_id: &ApplicationId) -> bool {
        let bound = self.application_id.get_or_init(|| application_id.clone());
        if bound != application_id {
            warn!(
                connection_id = %self.id,
                app_id = %application_id,
                bound = %bound,
                "Refusing to rebind connection"
            );
            return false;
        }
        self.ready.store(true, Ordering::Release);
        true
    }

    fn invalidate(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Finish bootstrapping an in-process connection.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Queue a message.
    ///
    /// # Errors
    ///
    /// [`IpcError::NotReady`] before the handshake, [`IpcError::ConnectionLost`]
    /// once the other side is gone.
    pub fn send(&self, message: ConnectionMessage) -> IpcResult<()> {
        if !self.is_ready() {
            return Err(IpcError::NotReady(self.id));
        }
        let sent = match &self.transport {
            Transport::InProcess(tx) => tx.send(message).is_ok(),
            Transport::Peer(tx) => tx.send(message.to_peer_message()).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            self.invalidate();
            Err(IpcError::ConnectionLost(self.id))
        }
    }
}

/// All live connections, indexed by id and application.
#[derive(Debug)]
pub struct ConnectionIndex {
    by_id: DashMap<ConnectionId, Arc<IpcConnection>>,
    by_app: DashMap<ApplicationId, ConnectionId>,
    ready_changed: Notify,
    bus: EventBus,
}

impl ConnectionIndex {
    /// Create an empty index publishing connection events on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            by_id: DashMap::new(),
            by_app: DashMap::new(),
            ready_changed: Notify::new(),
            bus,
        }
    }

    /// Add a connection.
    pub fn insert(&self, connection: Arc<IpcConnection>) {
        let id = connection.id();
        if let Some(app) = connection.application_id() {
            self.by_app.insert(app.clone(), id);
        }
        debug!(connection_id = %id, kind = ?connection.kind(), "Connection added");
        let ready = connection.is_ready();
        let app = connection.application_id().cloned();
        self.by_id.insert(id, connection);
        if ready && let Some(app) = app {
            self.announce_ready(id, app);
        }
    }

    fn announce_ready(&self, id: ConnectionId, application_id: ApplicationId) {
        info!(connection_id = %id, app_id = %application_id, "Connection ready");
        self.bus.publish(AppManEvent::ConnectionReady {
            metadata: EventMetadata::new(EVENT_SOURCE),
            connection_id: id.get(),
            application_id,
        });
        self.ready_changed.notify_waiters();
    }

    /// Bind a registered peer connection to its application and mark it
    /// ready. Returns `false` if the connection is not registered or already
    /// speaks for another application.
    pub fn bind(&self, id: ConnectionId, application_id: ApplicationId) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        if !connection.bind(&application_id) {
            return false;
        }
        self.by_app.insert(application_id.clone(), id);
        self.announce_ready(id, application_id);
        true
    }

    /// Mark a bootstrapping connection ready.
    pub fn mark_ready(&self, id: ConnectionId) {
        if let Some(connection) = self.get(id) {
            connection.mark_ready();
            if let Some(app) = connection.application_id().cloned() {
                self.announce_ready(id, app);
            }
        }
    }

    /// Remove a connection. Returns it if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<IpcConnection>> {
        let (_, connection) = self.by_id.remove(&id)?;
        connection.invalidate();
        if let Some(app) = connection.application_id() {
            self.by_app.remove_if(app, |_, v| *v == id);
        }
        info!(connection_id = %id, app_id = ?connection.application_id(), "Connection lost");
        self.bus.publish(AppManEvent::ConnectionLost {
            metadata: EventMetadata::new(EVENT_SOURCE),
            connection_id: id.get(),
            application_id: connection.application_id().cloned(),
        });
        Some(connection)
    }

    /// Connection by id.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<IpcConnection>> {
        self.by_id.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Connection of an application, ready or not.
    #[must_use]
    pub fn for_application(&self, app: &ApplicationId) -> Option<Arc<IpcConnection>> {
        let id = self.by_app.get(app).map(|e| *e.value())?;
        self.get(id)
    }

    /// Ready connection of an application.
    #[must_use]
    pub fn ready_for_application(&self, app: &ApplicationId) -> Option<Arc<IpcConnection>> {
        self.for_application(app).filter(|c| c.is_ready())
    }

    /// All ready connections.
    #[must_use]
    pub fn ready_connections(&self) -> Vec<Arc<IpcConnection>> {
        let mut ready: Vec<_> = self
            .by_id
            .iter()
            .filter(|e| e.value().is_ready())
            .map(|e| Arc::clone(e.value()))
            .collect();
        ready.sort_by_key(|c| c.id());
        ready
    }

    /// Wait until `app` has a ready connection, at most `timeout`.
    pub async fn wait_ready(
        &self,
        app: &ApplicationId,
        timeout: Duration,
    ) -> Option<Arc<IpcConnection>> {
        let wait = async {
            loop {
                let notified = self.ready_changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(connection) = self.ready_for_application(app) {
                    return connection;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Number of connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> ApplicationId {
        ApplicationId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_in_process_delivery_is_queued() {
        let index = ConnectionIndex::new(EventBus::new());
        let (conn, mut rx) = IpcConnection::in_process(app("com.example.a"), false);
        index.insert(Arc::clone(&conn));

        let found = index.ready_for_application(&app("com.example.a")).unwrap();
        assert_eq!(found.kind(), TransportKind::InProcess);
        found
            .send(ConnectionMessage::CallFinished {
                member: "startApplication".to_owned(),
                succeeded: true,
                message: String::new(),
            })
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionMessage::CallFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_peer_connection_ready_after_bind() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let index = ConnectionIndex::new(bus);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = IpcConnection::peer(RuntimeId::new(7), Some(100), tx);
        index.insert(Arc::clone(&conn));

        assert!(index.for_application(&app("com.example.a")).is_none());
        assert!(matches!(
            conn.send(ConnectionMessage::CallFinished {
                member: "x".to_owned(),
                succeeded: true,
                message: String::new()
            }),
            Err(IpcError::NotReady(_))
        ));

        assert!(index.bind(conn.id(), app("com.example.a")));
        let ready = index.ready_for_application(&app("com.example.a")).unwrap();
        ready
            .send(ConnectionMessage::ReplyFromSystem {
                request_id: uuid::Uuid::new_v4(),
                error: false,
                result: appman_core::ParameterMap::new(),
            })
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().member, "replyFromSystem");
        assert_eq!(events.recv().await.unwrap().event_type(), "connection_ready");
    }

    #[tokio::test]
    async fn test_remove_invalidates() {
        let index = ConnectionIndex::new(EventBus::new());
        let (conn, _rx) = IpcConnection::in_process(app("com.example.a"), false);
        index.insert(Arc::clone(&conn));
        index.remove(conn.id()).unwrap();
        assert!(!conn.is_ready());
        assert!(index.for_application(&app("com.example.a")).is_none());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_closed_receiver_reports_lost() {
        let (conn, rx) = IpcConnection::in_process(app("com.example.a"), false);
        drop(rx);
        let err = conn
            .send(ConnectionMessage::CallFinished {
                member: "x".to_owned(),
                succeeded: true,
                message: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, IpcError::ConnectionLost(_)));
        assert!(!conn.is_ready());
    }

    #[tokio::test]
    async fn test_rebind_to_other_application_refused() {
        let index = ConnectionIndex::new(EventBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = IpcConnection::peer(RuntimeId::new(2), Some(100), tx);
        index.insert(Arc::clone(&conn));

        assert!(index.bind(conn.id(), app("com.example.a")));
        assert!(!index.bind(conn.id(), app("com.example.b")));
        assert_eq!(conn.application_id(), Some(&app("com.example.a")));
        assert!(index.for_application(&app("com.example.b")).is_none());
        assert_eq!(
            index.ready_for_application(&app("com.example.a")).unwrap().id(),
            conn.id()
        );

        // Binding again to the same application is harmless.
        assert!(index.bind(conn.id(), app("com.example.a")));
    }

    #[tokio::test]
    async fn test_bind_unknown_connection_fails() {
        let index = ConnectionIndex::new(EventBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = IpcConnection::peer(RuntimeId::new(3), None, tx);
        assert!(!index.bind(conn.id(), app("com.example.a")));
        assert!(!conn.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let index = Arc::new(ConnectionIndex::new(EventBus::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = IpcConnection::peer(RuntimeId::new(1), None, tx);
        let id = conn.id();
        index.insert(conn);

        assert!(
            index
                .wait_ready(&app("com.example.a"), Duration::from_millis(50))
                .await
                .is_none()
        );

        let binder = Arc::clone(&index);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            binder.bind(id, app("com.example.a"));
        });
        assert!(
            index
                .wait_ready(&app("com.example.a"), Duration::from_secs(1))
                .await
                .is_some()
        );
    }
}

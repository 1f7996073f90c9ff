//! Client ends of both transports, as used by launchers, applications and
//! the system UI.

use std::sync::Arc;

use appman_core::{ParameterMap, Value};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::connection::IpcConnection;
use crate::error::{IpcError, IpcResult};
use crate::frame::{read_frame, write_frame};
use crate::message::{
    ConnectionMessage, INTENT_INTERFACE, Incoming, MANAGER_INTERFACE, PeerMessage,
    RUNTIME_INTERFACE,
};
use crate::peer::{IpcEventSender, dispatch_incoming};

/// Connection from a runtime process to its manager.
#[derive(Debug)]
pub struct PeerClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl PeerClient {
    /// Connect to the address found in `AM_PEER_ADDRESS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be reached.
    pub async fn connect(address: &str) -> IpcResult<Self> {
        let stream = UnixStream::connect(address).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    /// Send a raw message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message fails validation or the write fails.
    pub async fn send(&mut self, message: &PeerMessage) -> IpcResult<()> {
        message.validate()?;
        write_frame(&mut self.writer, message).await
    }

    /// Next message from the manager, `None` once the manager closed.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed frames.
    pub async fn recv(&mut self) -> IpcResult<Option<PeerMessage>> {
        read_frame(&mut self.reader).await
    }

    /// Handshake step 2.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn finished_initialization(&mut self) -> IpcResult<()> {
        self.send(&PeerMessage::new(
            RUNTIME_INTERFACE.name,
            "finishedInitialization",
            vec![],
        ))
        .await
    }

    /// Start an intent request. The manager answers with `requestAccepted`
    /// echoing `client_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn request_to_system(
        &mut self,
        client_token: &str,
        intent_id: &str,
        application_id: &str,
        parameters: ParameterMap,
    ) -> IpcResult<()> {
        self.send(&PeerMessage::new(
            INTENT_INTERFACE.name,
            "requestToSystem",
            vec![
                client_token.into(),
                intent_id.into(),
                application_id.into(),
                Value::Map(parameters),
            ],
        ))
        .await
    }

    /// Answer a request this client was asked to handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn reply_from_application(
        &mut self,
        wire_request_id: &str,
        error: bool,
        result: ParameterMap,
    ) -> IpcResult<()> {
        self.send(&PeerMessage::new(
            INTENT_INTERFACE.name,
            "replyFromApplication",
            vec![wire_request_id.into(), error.into(), Value::Map(result)],
        ))
        .await
    }
}

/// Client end of an in-process connection.
///
/// Calls take the same route as peer channel frames: they become
/// [`IpcEvent`](crate::IpcEvent)s processed on the manager's next turn.
#[derive(Debug)]
pub struct InProcessClient {
    connection: Arc<IpcConnection>,
    inbox: mpsc::UnboundedReceiver<ConnectionMessage>,
    events: IpcEventSender,
}

impl InProcessClient {
    /// Wrap an in-process connection.
    #[must_use]
    pub fn new(
        connection: Arc<IpcConnection>,
        inbox: mpsc::UnboundedReceiver<ConnectionMessage>,
        events: IpcEventSender,
    ) -> Self {
        Self {
            connection,
            inbox,
            events,
        }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<IpcConnection> {
        &self.connection
    }

    /// Next message from the manager, `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ConnectionMessage> {
        self.inbox.recv().await
    }

    /// Message already queued, if any.
    pub fn try_recv(&mut self) -> Option<ConnectionMessage> {
        self.inbox.try_recv().ok()
    }

    /// Start an intent request.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::ConnectionLost`] if the manager stopped listening.
    pub fn request_to_system(
        &self,
        client_token: &str,
        intent_id: &str,
        application_id: &str,
        parameters: ParameterMap,
    ) -> IpcResult<()> {
        self.dispatch(Incoming::RequestToSystem {
            client_token: client_token.to_owned(),
            intent_id: intent_id.to_owned(),
            application_id: application_id.to_owned(),
            parameters,
        })
    }

    /// Answer a request this client was asked to handle.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::ConnectionLost`] if the manager stopped listening.
    pub fn reply_from_application(
        &self,
        wire_request_id: &str,
        error: bool,
        result: ParameterMap,
    ) -> IpcResult<()> {
        self.dispatch(Incoming::ReplyFromApplication {
            request_id: wire_request_id.to_owned(),
            error,
            result,
        })
    }

    /// Invoke a protected manager operation.
    ///
    /// # Errors
    ///
    /// Returns a schema error for unknown members or mismatched arguments,
    /// or [`IpcError::ConnectionLost`].
    pub fn call_manager(&self, member: &str, args: Vec<Value>) -> IpcResult<()> {
        MANAGER_INTERFACE.check_call(member, &args)?;
        self.dispatch(Incoming::ManagerCall {
            member: member.to_owned(),
            args,
        })
    }

    fn dispatch(&self, incoming: Incoming) -> IpcResult<()> {
        if dispatch_incoming(incoming, &self.connection, None, None, &self.events) {
            Ok(())
        } else {
            Err(IpcError::ConnectionLost(self.connection.id()))
        }
    }
}

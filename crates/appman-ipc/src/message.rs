//! Interface schemas and the messages carried over connections.
//!
//! Every frame on the peer channel is a [`PeerMessage`]: an interface name,
//! a member and positional arguments. Frames are checked against the static
//! schemas below before being turned into typed [`Incoming`] calls.

use appman_core::{
    ApplicationId, InterfaceSchema, MethodSignature, ParameterMap, Value, ValueKind,
};
use appman_runtime::ControlCall;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IpcError, IpcResult};
use crate::request_id::encode_request_id;

use ValueKind::{Bool, String as Str, Variant};

/// Calls between the manager and a runtime process about its lifecycle.
pub const RUNTIME_INTERFACE: InterfaceSchema = InterfaceSchema::new(
    "io.appman.RuntimeInterface",
    &[
        // process -> manager
        MethodSignature::new("finishedInitialization", &[]),
        // manager -> process
        MethodSignature::new("startApplication", &[Str, Str, Variant, Variant]),
    ],
);

/// Calls from the manager to a running application.
pub const APPLICATION_INTERFACE: InterfaceSchema = InterfaceSchema::new(
    "io.appman.ApplicationInterface",
    &[
        MethodSignature::new("quit", &[]),
        MethodSignature::new("openDocument", &[Str, Str]),
    ],
);

/// Intent requests and replies in both directions.
pub const INTENT_INTERFACE: InterfaceSchema = InterfaceSchema::new(
    "io.appman.IntentInterface",
    &[
        // client -> manager
        MethodSignature::new("requestToSystem", &[Str, Str, Str, Variant]),
        MethodSignature::new("replyFromApplication", &[Str, Bool, Variant]),
        // manager -> client
        MethodSignature::new("requestAccepted", &[Str, Str]),
        MethodSignature::new("requestToApplication", &[Str, Str, Str, Str, Variant]),
        MethodSignature::new("replyFromSystem", &[Str, Bool, Variant]),
    ],
);

/// Protected manager operations callable by clients.
pub const MANAGER_INTERFACE: InterfaceSchema = InterfaceSchema::new(
    "io.appman.ApplicationManager",
    &[
        MethodSignature::new("startApplication", &[Str, Str]),
        MethodSignature::new("stopApplication", &[Str, Bool]),
        MethodSignature::new("openUrl", &[Str]),
        // manager -> client
        MethodSignature::new("callFinished", &[Str, Bool, Str]),
    ],
);

/// All interfaces known to the peer channel.
pub const INTERFACES: &[InterfaceSchema] = &[
    RUNTIME_INTERFACE,
    APPLICATION_INTERFACE,
    INTENT_INTERFACE,
    MANAGER_INTERFACE,
];

/// Look up an interface by name.
#[must_use]
pub fn schema_for(name: &str) -> Option<&'static InterfaceSchema> {
    INTERFACES.iter().find(|s| s.name == name)
}

/// One frame on the peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Interface name.
    pub interface: String,
    /// Member name.
    pub member: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A validated call from a client to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Handshake step 2.
    FinishedInitialization,
    /// A new intent request. The manager answers with `requestAccepted`
    /// carrying `client_token` and the assigned request id.
    RequestToSystem {
        /// Client-chosen token echoed back in `requestAccepted`.
        client_token: String,
        /// Intent id.
        intent_id: String,
        /// Target application id, empty for "any handler".
        application_id: String,
        /// Request parameters.
        parameters: ParameterMap,
    },
    /// Reply to a request the client was asked to handle.
    ReplyFromApplication {
        /// Wire request id, possibly with broadcast suffix.
        request_id: String,
        /// Whether the handler failed.
        error: bool,
        /// Result parameters, or `{"errorMessage": ...}` on failure.
        result: ParameterMap,
    },
    /// A protected manager operation.
    ManagerCall {
        /// Member name.
        member: String,
        /// Arguments, already schema-checked.
        args: Vec<Value>,
    },
}

fn string_arg(args: &[Value], idx: usize) -> String {
    args.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn map_arg(args: &[Value], idx: usize) -> ParameterMap {
    args.get(idx)
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default()
}

impl PeerMessage {
    /// Build a message.
    #[must_use]
    pub fn new(interface: impl Into<String>, member: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }

    /// Check the message against its interface schema.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::UnknownInterface`] or a schema error.
    pub fn validate(&self) -> IpcResult<&'static InterfaceSchema> {
        let schema = schema_for(&self.interface)
            .ok_or_else(|| IpcError::UnknownInterface(self.interface.clone()))?;
        schema.check_call(&self.member, &self.args)?;
        Ok(schema)
    }

    /// Validate and decode a client-to-manager call.
    ///
    /// # Errors
    ///
    /// Returns a schema error, or [`IpcError::Schema`] style errors for
    /// members that only flow from the manager to clients.
    pub fn decode_incoming(&self) -> IpcResult<Incoming> {
        let schema = self.validate()?;
        let args = &self.args;
        let incoming = match (schema.name, self.member.as_str()) {
            ("io.appman.RuntimeInterface", "finishedInitialization") => {
                Incoming::FinishedInitialization
            },
            ("io.appman.IntentInterface", "requestToSystem") => Incoming::RequestToSystem {
                client_token: string_arg(args, 0),
                intent_id: string_arg(args, 1),
                application_id: string_arg(args, 2),
                parameters: map_arg(args, 3),
            },
            ("io.appman.IntentInterface", "replyFromApplication") => {
                Incoming::ReplyFromApplication {
                    request_id: string_arg(args, 0),
                    error: args.get(1).and_then(Value::as_bool).unwrap_or(true),
                    result: map_arg(args, 2),
                }
            },
            ("io.appman.ApplicationManager", member) if member != "callFinished" => {
                Incoming::ManagerCall {
                    member: member.to_owned(),
                    args: args.clone(),
                }
            },
            (interface, member) => {
                return Err(appman_core::CoreError::UnknownMember {
                    interface: interface.to_owned(),
                    member: format!("{member} (manager-to-client only)"),
                }
                .into());
            },
        };
        Ok(incoming)
    }

    /// Encode a control call for a runtime process.
    #[must_use]
    pub fn from_control(call: &ControlCall) -> Self {
        match call {
            ControlCall::Quit => Self::new(APPLICATION_INTERFACE.name, "quit", vec![]),
            ControlCall::OpenDocument {
                document,
                mime_type,
            } => Self::new(
                APPLICATION_INTERFACE.name,
                "openDocument",
                vec![document.as_str().into(), mime_type.as_str().into()],
            ),
            ControlCall::StartApplication {
                base_dir,
                main_file,
                document,
                runtime_parameters,
            } => Self::new(
                RUNTIME_INTERFACE.name,
                "startApplication",
                vec![
                    base_dir.as_str().into(),
                    main_file.as_str().into(),
                    document.clone().map(Value::String).unwrap_or_default(),
                    Value::Map(runtime_parameters.clone()),
                ],
            ),
        }
    }
}

/// A message from the manager to a connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMessage {
    /// The request started with `client_token` got `request_id`.
    RequestAccepted {
        /// Token from `requestToSystem`.
        client_token: String,
        /// Assigned request id.
        request_id: Uuid,
    },
    /// Handle an intent request.
    RequestToApplication {
        /// Request id.
        request_id: Uuid,
        /// Whether no reply is expected.
        broadcast: bool,
        /// Intent id.
        intent_id: String,
        /// Requester, or `:broadcast:` for broadcasts.
        requesting_application_id: ApplicationId,
        /// Handling application.
        application_id: ApplicationId,
        /// Request parameters.
        parameters: ParameterMap,
    },
    /// Final answer to a request the client made.
    ReplyFromSystem {
        /// Request id.
        request_id: Uuid,
        /// Whether the request failed.
        error: bool,
        /// Result, or `{"errorMessage": ...}` on failure.
        result: ParameterMap,
    },
    /// Result of a protected manager call.
    CallFinished {
        /// Member that was called.
        member: String,
        /// Whether it succeeded.
        succeeded: bool,
        /// Error text, empty on success.
        message: String,
    },
}

impl ConnectionMessage {
    /// Encode for the peer channel.
    #[must_use]
    pub fn to_peer_message(&self) -> PeerMessage {
        match self {
            Self::RequestAccepted {
                client_token,
                request_id,
            } => PeerMessage::new(
                INTENT_INTERFACE.name,
                "requestAccepted",
                vec![
                    client_token.as_str().into(),
                    request_id.to_string().into(),
                ],
            ),
            Self::RequestToApplication {
                request_id,
                broadcast,
                intent_id,
                requesting_application_id,
                application_id,
                parameters,
            } => PeerMessage::new(
                INTENT_INTERFACE.name,
                "requestToApplication",
                vec![
                    encode_request_id(*request_id, *broadcast).into(),
                    intent_id.as_str().into(),
                    requesting_application_id.as_str().into(),
                    application_id.as_str().into(),
                    Value::Map(parameters.clone()),
                ],
            ),
            Self::ReplyFromSystem {
                request_id,
                error,
                result,
            } => PeerMessage::new(
                INTENT_INTERFACE.name,
                "replyFromSystem",
                vec![
                    request_id.to_string().into(),
                    (*error).into(),
                    Value::Map(result.clone()),
                ],
            ),
            Self::CallFinished {
                member,
                succeeded,
                message,
            } => PeerMessage::new(
                MANAGER_INTERFACE.name,
                "callFinished",
                vec![
                    member.as_str().into(),
                    (*succeeded).into(),
                    message.as_str().into(),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_request_to_system() {
        let mut params = ParameterMap::new();
        params.insert("url".to_owned(), "https://example.com".into());
        let msg = PeerMessage::new(
            "io.appman.IntentInterface",
            "requestToSystem",
            vec!["t1".into(), "share".into(), "".into(), Value::Map(params.clone())],
        );
        assert_eq!(
            msg.decode_incoming().unwrap(),
            Incoming::RequestToSystem {
                client_token: "t1".to_owned(),
                intent_id: "share".to_owned(),
                application_id: String::new(),
                parameters: params,
            }
        );
    }

    #[test]
    fn test_rejects_bad_frames() {
        let unknown = PeerMessage::new("io.example.Nope", "x", vec![]);
        assert!(matches!(
            unknown.decode_incoming(),
            Err(IpcError::UnknownInterface(_))
        ));

        let wrong_type = PeerMessage::new(
            "io.appman.IntentInterface",
            "replyFromApplication",
            vec!["id".into(), "yes".into(), Value::Null],
        );
        assert!(matches!(wrong_type.decode_incoming(), Err(IpcError::Schema(_))));

        let outbound_only = PeerMessage::new(
            "io.appman.IntentInterface",
            "replyFromSystem",
            vec!["id".into(), false.into(), Value::Null],
        );
        assert!(outbound_only.decode_incoming().is_err());
    }

    #[test]
    fn test_outgoing_messages_match_schema() {
        let id = Uuid::new_v4();
        let msg = ConnectionMessage::RequestToApplication {
            request_id: id,
            broadcast: true,
            intent_id: "refresh".to_owned(),
            requesting_application_id: ApplicationId::broadcast(),
            application_id: ApplicationId::from_static("com.example.a"),
            parameters: ParameterMap::new(),
        }
        .to_peer_message();
        msg.validate().unwrap();
        assert_eq!(msg.args[0], Value::from(format!("{id}@broadcast")));

        let quit = PeerMessage::from_control(&ControlCall::Quit);
        quit.validate().unwrap();
        let start = PeerMessage::from_control(&ControlCall::StartApplication {
            base_dir: "/apps/a".to_owned(),
            main_file: "main.qml".to_owned(),
            document: None,
            runtime_parameters: ParameterMap::new(),
        });
        start.validate().unwrap();
    }
}

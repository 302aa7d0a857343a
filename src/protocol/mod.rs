//! The apollo websocket protocols: wire types, dialect differences, and
//! client message dispatch.

pub(crate) mod init;
pub(crate) mod subscribe;
pub mod types;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::context::OperationContext;
use crate::error::Error;
use crate::response::{combine_errors, GraphqlError};
use crate::websocket::types::{Connection, Outgoing};
use types::{Message, Operation, Payload};

/// Subprotocol expected by subscriptions-transport-ws implementations.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Subprotocol expected by graphql-ws implementations.
pub const GRAPHQL_TRANSPORT_WS_PROTOCOL: &str = "graphql-transport-ws";

/// The websocket subprotocol negotiated for a connection, which decides
/// message names, error payload shapes, and close semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// The legacy `graphql-ws` subprotocol (GWS).
    GraphqlWs,
    /// The newer `graphql-transport-ws` subprotocol (GTWS).
    GraphqlTransportWs,
}

impl Protocol {
    pub fn subprotocol(self) -> &'static str {
        match self {
            Self::GraphqlWs => GRAPHQL_WS_PROTOCOL,
            Self::GraphqlTransportWs => GRAPHQL_TRANSPORT_WS_PROTOCOL,
        }
    }

    pub fn from_subprotocol(name: &str) -> Option<Self> {
        match name {
            GRAPHQL_WS_PROTOCOL => Some(Self::GraphqlWs),
            GRAPHQL_TRANSPORT_WS_PROTOCOL => Some(Self::GraphqlTransportWs),
            _ => None,
        }
    }

    /// The message type emitted by the keep-alive ticker.
    pub(crate) fn keepalive_operation(self) -> Operation {
        match self {
            Self::GraphqlWs => Operation::KeepAlive,
            Self::GraphqlTransportWs => Operation::Pong,
        }
    }

    /// The message type carrying one operation result.
    pub(crate) fn streaming_operation(self) -> Operation {
        match self {
            Self::GraphqlWs => Operation::Data,
            Self::GraphqlTransportWs => Operation::Next,
        }
    }

    /// Whether operations are rejected until `connection_init` completed.
    pub(crate) fn requires_init(self) -> bool {
        matches!(self, Self::GraphqlTransportWs)
    }

    /// The dialect-specific `error` payload: a single folded object on GWS,
    /// an array of formatted errors on GTWS.
    pub(crate) fn error_payload(self, errors: Vec<GraphqlError>) -> Payload {
        match self {
            Self::GraphqlWs => typed_payload(&combine_errors(errors)),
            Self::GraphqlTransportWs => typed_payload(&errors),
        }
    }
}

pub(crate) fn typed_payload<T: Serialize>(value: &T) -> Payload {
    Payload::Typed(serde_json::to_value(value).unwrap_or(Value::Null))
}

/// Dispatches one decoded client message. An `Err` is terminal for the
/// connection; per-operation failures are reported on the wire instead.
pub(crate) async fn handle_client_message(
    connection: &Arc<Connection>,
    message: Message,
    connect_signal: &mut Option<oneshot::Sender<()>>,
) -> Result<(), Error> {
    tracing::trace!(
        message_type = message.operation.as_str(),
        "incoming protocol message"
    );
    match message.operation {
        Operation::ConnectionInit => {
            init::handle_connection_init(connection, &message, connect_signal).await
        }
        Operation::Start | Operation::Subscribe => {
            subscribe::handle_operation_start(connection, message).await
        }
        Operation::Stop | Operation::Complete => {
            subscribe::handle_operation_stop(connection, &message).await
        }
        Operation::ConnectionTerminate => {
            subscribe::handle_connection_terminate(connection).await
        }
        Operation::Ping => {
            // pong echoes the ping payload bytes
            connection
                .send_message(None, Operation::Pong, message.payload)
                .await;
            Ok(())
        }
        // server-to-client message types arriving from the client, and
        // client pongs, are ignored
        _ => Ok(()),
    }
}

/// Renders an error on the wire according to its kind and the dialect.
///
/// Protocol violations close the socket, preceded by a `connection_error`
/// message on GWS. Result errors and application errors surface as an
/// `error` message for the operation in `ctx`.
pub(crate) async fn handle_error(
    connection: &Arc<Connection>,
    ctx: Option<&Arc<OperationContext>>,
    error: Error,
) {
    match error {
        Error::Protocol(protocol_error) => {
            connection
                .server
                .metrics
                .protocol_error(connection.protocol, protocol_error.code);
            if connection.protocol == Protocol::GraphqlWs {
                let payload = typed_payload(&GraphqlError::new(protocol_error.message.clone()));
                connection
                    .send_message(ctx, Operation::ConnectionError, Some(payload))
                    .await;
            }
            connection.send(Outgoing::Close(protocol_error)).await;
        }
        Error::Result(result_error) => {
            let payload = connection.protocol.error_payload(result_error.result.errors);
            connection
                .send_message(ctx, Operation::Error, Some(payload))
                .await;
        }
        other => {
            let payload = typed_payload(&other.to_graphql_error());
            connection
                .send_message(ctx, Operation::Error, Some(payload))
                .await;
        }
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Message types of the apollo websocket protocols, string-valued on the
/// wire. Both dialects share the envelope; which values are legal depends on
/// the negotiated subprotocol and the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// First message sent by the client, carrying connection params.
    /// [GWS, GTWS]
    #[serde(rename = "connection_init")]
    ConnectionInit,

    /// Server response to a successful `connection_init`. [GWS, GTWS]
    #[serde(rename = "connection_ack")]
    ConnectionAck,

    /// Server response to a failed `connection_init` or another protocol
    /// violation. [GWS]
    #[serde(rename = "connection_error")]
    ConnectionError,

    /// Client request to gracefully close the connection. [GWS]
    #[serde(rename = "connection_terminate")]
    ConnectionTerminate,

    /// Server keep-alive, sent periodically. [GWS]
    #[serde(rename = "ka")]
    KeepAlive,

    /// Liveness probe; answered with `pong` echoing the payload. [GTWS]
    #[serde(rename = "ping")]
    Ping,

    /// Response to `ping`; may also be sent unprompted. [GTWS]
    #[serde(rename = "pong")]
    Pong,

    /// Client request starting a new operation. [GWS]
    #[serde(rename = "start")]
    Start,

    /// Client request starting a new operation. [GTWS]
    #[serde(rename = "subscribe")]
    Subscribe,

    /// Client request stopping a running operation. [GWS]
    #[serde(rename = "stop")]
    Stop,

    /// One result for a running operation. [GWS]
    #[serde(rename = "data")]
    Data,

    /// One result for a running operation. [GTWS]
    #[serde(rename = "next")]
    Next,

    /// Server notice that an operation failed. [GWS, GTWS]
    #[serde(rename = "error")]
    Error,

    /// Server notice that an operation finished; on GTWS also the client
    /// request to unsubscribe. [GWS, GTWS]
    #[serde(rename = "complete")]
    Complete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::ConnectionTerminate => "connection_terminate",
            Self::KeepAlive => "ka",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Start => "start",
            Self::Subscribe => "subscribe",
            Self::Stop => "stop",
            Self::Data => "data",
            Self::Next => "next",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

/// A message payload in one of two modes: the raw JSON exactly as received,
/// or a typed value produced by the server. Raw payloads re-serialize
/// byte-identically, so echoing (`ping` -> `pong`) never re-encodes.
#[derive(Debug, Clone)]
pub enum Payload {
    Raw(Box<RawValue>),
    Typed(Value),
}

impl Payload {
    /// Reinterprets the payload as a typed value.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Self::Raw(raw) => serde_json::from_str(raw.get()),
            Self::Typed(value) => serde_json::from_value(value.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Raw(raw) => raw.get() == "null",
            Self::Typed(value) => value.is_null(),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Raw(raw) => raw.serialize(serializer),
            Self::Typed(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Box::<RawValue>::deserialize(deserializer).map(Payload::Raw)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Typed(value)
    }
}

/// The message envelope shared by both directions and both dialects:
/// `{"id"?, "type", "payload"?}`. The id is omitted on connection-level
/// messages; the payload is omitted when there is no value to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Message {
    pub fn new(id: Option<String>, operation: Operation, payload: Option<Payload>) -> Self {
        Self {
            id,
            operation,
            payload,
        }
    }
}

/// Connection params supplied with `connection_init`, opaque to the
/// transport and handed to the init interceptor chain.
pub type PayloadInit = serde_json::Map<String, Value>;

/// The client-side description of an operation, carried by
/// `start`/`subscribe` messages and plain HTTP request bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadOperation {
    pub query: String,
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "serde_json::Map::is_empty"
    )]
    pub variables: serde_json::Map<String, Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "serde_json::Map::is_empty"
    )]
    pub extensions: serde_json::Map<String, Value>,
}

// clients routinely send `"variables": null` for "no variables"
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

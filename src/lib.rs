//! GraphQL over WebSocket server transport.
//!
//! Serves GraphQL queries, mutations, and subscriptions over plain HTTP and
//! over websockets, speaking both the legacy `graphql-ws` and the newer
//! `graphql-transport-ws` subprotocols. The GraphQL engine stays behind the
//! [`Executor`] seam; this crate owns the wire codec, the connection
//! handshake, the concurrent operation lifecycle, and cancellation.

mod callbacks;
mod context;
mod engine;
mod error;
mod http;
mod interceptor;
mod metrics;
mod pipeline;
mod protocol;
mod response;
mod server;
mod websocket;

pub use callbacks::{
    Callbacks, OnConnect, OnDisconnect, OnOperation, OnOperationDone, OnOperationResult,
    OnOperationValidation, OnRequest, OnRequestDone,
};
pub use context::{OperationContext, RequestContext};
pub use engine::{ExecutionRequest, Executor, Extension, ParseFinisher, ValidationFinisher};
pub use error::{CloseCode, Error, ProtocolError, ResultError};
pub use interceptor::{
    HttpRequest, HttpRequestInterceptor, HttpRequestNext, HttpResponse, InitInterceptor, InitNext,
    Interceptors, OperationExecuteInterceptor, OperationExecuteNext, OperationInterceptor,
    OperationNext, OperationParseInterceptor, OperationParseNext,
};
pub use metrics::{OperationOutcome, ServerMetrics, TracingMetrics};
pub use protocol::types::{Message, Operation, Payload, PayloadInit, PayloadOperation};
pub use protocol::{Protocol, GRAPHQL_TRANSPORT_WS_PROTOCOL, GRAPHQL_WS_PROTOCOL};
pub use response::{combine_errors, GraphqlError, Location, PathSegment, Response};
pub use server::{ResultProcessor, Server, ServerOptions};

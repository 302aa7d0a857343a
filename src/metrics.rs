use crate::error::CloseCode;
use crate::protocol::Protocol;

/// How an operation left the connection's operations table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The result stream drained to completion.
    Completed,
    /// The client stopped the operation before its stream ended.
    Stopped,
    /// The operation ended with an error, before or during execution.
    Failed,
}

/// Observability hooks for the transport, keyed by the negotiated dialect.
/// Every method defaults to a no-op, so an implementation only picks the
/// edges it aggregates.
pub trait ServerMetrics: Send + Sync + 'static {
    /// A websocket session negotiated `protocol` and is now live.
    fn connection_opened(&self, _protocol: Protocol) {}

    /// A websocket session ended and its socket is gone.
    fn connection_closed(&self, _protocol: Protocol) {}

    /// An operation id was admitted and its task spawned.
    fn operation_started(&self, _protocol: Protocol, _operation_id: &str) {}

    /// An operation task finished and released its id.
    fn operation_finished(
        &self,
        _protocol: Protocol,
        _operation_id: &str,
        _outcome: OperationOutcome,
    ) {
    }

    /// A protocol violation is about to close the connection with `code`.
    fn protocol_error(&self, _protocol: Protocol, _code: CloseCode) {}
}

/// The default sink: one `tracing` event per lifecycle edge, carrying the
/// dialect, operation id, and outcome as fields.
#[derive(Clone, Default)]
pub struct TracingMetrics;

impl ServerMetrics for TracingMetrics {
    fn connection_opened(&self, protocol: Protocol) {
        tracing::debug!(
            subprotocol = protocol.subprotocol(),
            "websocket session started"
        );
    }

    fn connection_closed(&self, protocol: Protocol) {
        tracing::debug!(
            subprotocol = protocol.subprotocol(),
            "websocket session finished"
        );
    }

    fn operation_started(&self, protocol: Protocol, operation_id: &str) {
        tracing::debug!(
            subprotocol = protocol.subprotocol(),
            operation_id,
            "operation started"
        );
    }

    fn operation_finished(
        &self,
        protocol: Protocol,
        operation_id: &str,
        outcome: OperationOutcome,
    ) {
        tracing::debug!(
            subprotocol = protocol.subprotocol(),
            operation_id,
            outcome = ?outcome,
            "operation finished"
        );
    }

    fn protocol_error(&self, protocol: Protocol, code: CloseCode) {
        tracing::debug!(
            subprotocol = protocol.subprotocol(),
            code = code.code(),
            "protocol violation closes the connection"
        );
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::OperationContext;
use crate::error::{CloseCode, Error, ProtocolError};
use crate::interceptor::{OperationHandler, OperationNext};
use crate::metrics::OperationOutcome;
use crate::protocol::types::{Message, Operation, PayloadOperation};
use crate::protocol::{self, typed_payload, Protocol};
use crate::response::{GraphqlError, Response};
use crate::server::{process_results, ResultWriter};
use crate::websocket::types::{Connection, Outgoing};

/// Handles `start` (GWS) and `subscribe` (GTWS): admission checks, operation
/// registration, and spawning the operation task.
pub(crate) async fn handle_operation_start(
    connection: &Arc<Connection>,
    message: Message,
) -> Result<(), Error> {
    if connection.protocol.requires_init() && !connection.is_initialized() {
        return Err(ProtocolError::new(CloseCode::Unauthorized).into());
    }

    let id = message.id.clone().unwrap_or_default();
    let ctx = OperationContext::new(&connection.request, message.id.clone());

    if !connection.try_insert_operation(&id, ctx.clone()).await {
        let error = ProtocolError::subscriber_already_exists(&id);
        if connection.protocol == Protocol::GraphqlWs {
            // Reported per-operation; the connection continues.
            let payload = typed_payload(&GraphqlError::new(error.message));
            connection
                .send_message(None, Operation::ConnectionError, Some(payload))
                .await;
            return Ok(());
        }
        return Err(error.into());
    }

    connection
        .server
        .metrics
        .operation_started(connection.protocol, &id);

    let task_connection = connection.clone();
    connection
        .tracker
        .spawn(run_operation(task_connection, id, ctx, message));

    Ok(())
}

/// Handles `stop` (GWS) and a client `complete` (GTWS): marks the operation
/// stopped and cancels its context. Unknown ids are silently ignored.
pub(crate) async fn handle_operation_stop(
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Error> {
    if connection.protocol.requires_init() && !connection.is_initialized() {
        return Err(ProtocolError::new(CloseCode::Unauthorized).into());
    }

    let id = message.id.as_deref().unwrap_or_default();
    if let Some(ctx) = connection.get_operation(id).await {
        ctx.mark_stopped();
        ctx.cancel();
        tracing::debug!(operation_id = %id, "operation stopped by client");
    }

    Ok(())
}

/// Handles `connection_terminate` (GWS only): marks the request stopped and
/// queues a clean close. On GTWS the message type is a violation.
pub(crate) async fn handle_connection_terminate(
    connection: &Arc<Connection>,
) -> Result<(), Error> {
    if connection.protocol == Protocol::GraphqlTransportWs {
        return Err(ProtocolError::new(CloseCode::Unauthorized).into());
    }

    connection.request.mark_stopped();
    connection
        .send(Outgoing::Close(ProtocolError::new(CloseCode::Normal)))
        .await;

    Ok(())
}

/// The per-operation task: decode, run the Operation chain, report, emit
/// `complete`, release the id.
async fn run_operation(
    connection: Arc<Connection>,
    id: String,
    ctx: Arc<OperationContext>,
    message: Message,
) {
    let result = execute_operation(&connection, &ctx, &message).await;
    let outcome = match &result {
        Err(_) => OperationOutcome::Failed,
        Ok(()) if ctx.is_stopped() => OperationOutcome::Stopped,
        Ok(()) => OperationOutcome::Completed,
    };

    if let Err(error) = result {
        // Errors after the execution loop started already surfaced in-band.
        if !ctx.is_executed() {
            protocol::handle_error(&connection, Some(&ctx), error).await;
        }
    }

    // A client-stopped GTWS operation stays silent; GWS always completes.
    if !ctx.is_stopped() || connection.protocol == Protocol::GraphqlWs {
        connection
            .send_message(Some(&ctx), Operation::Complete, None)
            .await;
    }

    ctx.cancel();
    connection.remove_operation(&id).await;
    connection
        .server
        .metrics
        .operation_finished(connection.protocol, &id, outcome);
}

async fn execute_operation(
    connection: &Arc<Connection>,
    ctx: &Arc<OperationContext>,
    message: &Message,
) -> Result<(), Error> {
    let payload: PayloadOperation = match &message.payload {
        Some(payload) => payload
            .read()
            .map_err(|err| decode_error(connection.protocol, err))?,
        None => return Err(decode_error(connection.protocol, "missing operation payload")),
    };

    let tail = WebsocketOperationTail {
        connection: connection.clone(),
    };
    let next = OperationNext {
        interceptors: &connection.server.interceptors.operation,
        tail: &tail,
    };
    next.run(ctx, &payload).await
}

// On GTWS an undecodable operation payload closes the whole connection.
fn decode_error(protocol: Protocol, err: impl std::fmt::Display) -> Error {
    match protocol {
        Protocol::GraphqlTransportWs => {
            ProtocolError::with_detail(CloseCode::InvalidMessage, err).into()
        }
        Protocol::GraphqlWs => Error::application(err.to_string()),
    }
}

/// The Operation stage's tail for websocket transports: parse, execute,
/// pump results onto the outgoing channel.
struct WebsocketOperationTail {
    connection: Arc<Connection>,
}

#[async_trait]
impl OperationHandler for WebsocketOperationTail {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        let server = &self.connection.server;
        server.run_operation_parse(ctx, payload).await?;
        let results = server.run_operation_execute(ctx, payload).await?;

        let mut writer = WebsocketResultWriter {
            connection: self.connection.clone(),
        };
        process_results(server, ctx, payload, results, &mut writer).await
    }
}

struct WebsocketResultWriter {
    connection: Arc<Connection>,
}

#[async_trait]
impl ResultWriter for WebsocketResultWriter {
    async fn write(&mut self, ctx: &Arc<OperationContext>, response: Response) -> Result<(), Error> {
        // Once a GTWS client unsubscribed, late results are suppressed.
        if self.connection.protocol == Protocol::GraphqlTransportWs && ctx.is_stopped() {
            return Ok(());
        }
        let operation = self.connection.protocol.streaming_operation();
        self.connection
            .send_message(Some(ctx), operation, Some(typed_payload(&response)))
            .await;
        Ok(())
    }
}

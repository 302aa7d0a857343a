use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{CloseCode, Error, ProtocolError};
use crate::protocol::types::{Message, Operation, PayloadInit};
use crate::websocket::types::Connection;

/// Handles the `connection_init` message: enforces the single-init rule,
/// releases the init-timeout watchdog, runs the Init interceptor chain, and
/// acknowledges on success. Chain errors are terminal for the connection.
pub(crate) async fn handle_connection_init(
    connection: &Arc<Connection>,
    message: &Message,
    connect_signal: &mut Option<oneshot::Sender<()>>,
) -> Result<(), Error> {
    if connection.is_initialized() {
        return Err(ProtocolError::new(CloseCode::TooManyInitializationRequests).into());
    }
    connection.set_initialized();

    if let Some(signal) = connect_signal.take() {
        let _ = signal.send(());
    }

    let payload = match &message.payload {
        Some(payload) => payload
            .read::<Option<PayloadInit>>()
            .map_err(|err| ProtocolError::with_detail(CloseCode::InvalidMessage, err))?
            .unwrap_or_default(),
        None => PayloadInit::new(),
    };

    connection
        .server
        .run_init(&connection.request, payload)
        .await?;

    connection
        .send_message(None, Operation::ConnectionAck, None)
        .await;
    tracing::debug!("connection initialized");

    Ok(())
}

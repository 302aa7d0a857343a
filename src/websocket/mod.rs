pub(crate) mod tasks;
pub(crate) mod types;

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::context::RequestContext;
use crate::error::CloseCode;
use crate::protocol::Protocol;
use crate::server::ServerInner;
use types::{Connection, OUTGOING_CHANNEL_SIZE};

/// Accepts the websocket upgrade, offering the configured subprotocols.
pub(crate) fn handle_upgrade(
    server: Arc<ServerInner>,
    request: Arc<RequestContext>,
    upgrade: WebSocketUpgrade,
) -> axum::response::Response {
    let offered: Vec<&'static str> = server
        .protocols
        .iter()
        .map(|protocol| protocol.subprotocol())
        .collect();
    upgrade
        .protocols(offered)
        .on_upgrade(move |socket| run_session(server, request, socket))
}

/// One upgraded connection: spawns the reader and the watchdog, then runs
/// the write loop in place until the session is over.
async fn run_session(server: Arc<ServerInner>, request: Arc<RequestContext>, socket: WebSocket) {
    let negotiated = socket
        .protocol()
        .and_then(|value| value.to_str().ok())
        .and_then(Protocol::from_subprotocol)
        .filter(|protocol| server.protocols.contains(protocol));

    let Some(protocol) = negotiated else {
        tracing::debug!("unsupported websocket subprotocol");
        let mut socket = socket;
        let _ = socket
            .send(ws::Message::Close(Some(ws::CloseFrame {
                code: CloseCode::Normal.code(),
                reason: Cow::Borrowed("unknown websocket subprotocol"),
            })))
            .await;
        return;
    };

    request.insert(protocol);
    request.mark_response_started();
    server.metrics.connection_opened(protocol);

    let (sink, stream) = socket.split();
    let (sender, receiver) = mpsc::channel(OUTGOING_CHANNEL_SIZE);
    let connection = Connection::new(server.clone(), request.clone(), protocol, sender);

    let mut connect_signal = None;
    if let Some(timeout) = server.connect_timeout.filter(|timeout| !timeout.is_zero()) {
        let (signal, connected) = oneshot::channel();
        connect_signal = Some(signal);
        tokio::spawn(tasks::connect_timeout_watchdog(
            connection.clone(),
            timeout,
            connected,
        ));
    }

    tokio::spawn(tasks::read_loop(connection.clone(), stream, connect_signal));

    let metrics = server.metrics.clone();
    let keepalive = server.keepalive;
    // The write loop runs until every sender clone of the outgoing channel
    // is gone: the reader's, the watchdog's, and the operation tasks'. This
    // scope must not keep one alive.
    drop(connection);
    drop(server);

    tasks::write_loop(sink, receiver, protocol, request, keepalive).await;

    metrics.connection_closed(protocol);
}

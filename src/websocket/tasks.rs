use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::context::RequestContext;
use crate::error::{CloseCode, Error, ProtocolError};
use crate::protocol::types::Message;
use crate::protocol::{self, Protocol};
use crate::websocket::types::{Connection, Outgoing};

/// The writer task owns the socket's write side. It multiplexes the
/// outgoing channel with the keep-alive ticker, and runs until every sender
/// clone of the channel is gone. Request-context cancellation stops the
/// keep-alives while the remaining queue drains.
pub(crate) async fn write_loop(
    mut sink: SplitSink<ws::WebSocket, ws::Message>,
    mut outgoing: mpsc::Receiver<Outgoing>,
    protocol: Protocol,
    request: Arc<RequestContext>,
    keepalive: Option<Duration>,
) {
    let mut ticker = keepalive
        .filter(|period| !period.is_zero())
        .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));
    let mut closed = false;
    let mut draining = false;

    loop {
        tokio::select! {
            biased;
            entry = outgoing.recv() => match entry {
                None => break,
                Some(Outgoing::Message(message)) => {
                    if !closed {
                        closed = write_json(&mut sink, &message).await;
                    }
                }
                Some(Outgoing::Close(error)) => {
                    if !closed {
                        let _ = sink.send(close_frame(error.code, error.message)).await;
                        closed = true;
                    }
                }
            },
            () = tick(&mut ticker), if !closed && !draining => {
                let message = Message::new(None, protocol.keepalive_operation(), None);
                closed = write_json(&mut sink, &message).await;
            }
            () = request.cancelled(), if !draining => {
                draining = true;
            }
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// Returns true once the socket has been closed; a failed write closes it
// with the error text.
async fn write_json(
    sink: &mut SplitSink<ws::WebSocket, ws::Message>,
    message: &Message,
) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!("unable to serialize outgoing message: {err}");
            let _ = sink.send(close_frame(CloseCode::Normal, err.to_string())).await;
            return true;
        }
    };
    if let Err(err) = sink.send(ws::Message::Text(text)).await {
        tracing::debug!("websocket write failed: {err}");
        let _ = sink.send(close_frame(CloseCode::Normal, err.to_string())).await;
        return true;
    }
    false
}

fn close_frame(code: CloseCode, reason: String) -> ws::Message {
    ws::Message::Close(Some(ws::CloseFrame {
        code: code.code(),
        reason: Cow::Owned(reason),
    }))
}

/// The reader task owns the socket's read side: it decodes client messages
/// and dispatches them until the socket closes or a terminal error occurs.
///
/// Its epilogue runs in a fixed order: report the deferred error, cancel
/// the request context (and with it every operation context), await the
/// operation tasks, and release this task's hold on the outgoing channel.
pub(crate) async fn read_loop(
    connection: Arc<Connection>,
    mut stream: SplitStream<ws::WebSocket>,
    mut connect_signal: Option<oneshot::Sender<()>>,
) {
    let mut deferred: Option<Error> = None;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("websocket read failed: {err}");
                break;
            }
        };
        let data = match frame {
            ws::Message::Close(_) => break,
            ws::Message::Ping(_) | ws::Message::Pong(_) => continue,
            ws::Message::Text(text) => text.into_bytes(),
            ws::Message::Binary(data) => data,
        };
        let message: Message = match serde_json::from_slice(&data) {
            Ok(message) => message,
            Err(err) => {
                deferred = Some(ProtocolError::with_detail(CloseCode::InvalidMessage, err).into());
                break;
            }
        };
        if let Err(err) =
            protocol::handle_client_message(&connection, message, &mut connect_signal).await
        {
            deferred = Some(err);
            break;
        }
    }

    if let Some(error) = deferred {
        protocol::handle_error(&connection, None, error).await;
    }

    // cancel the request context and consequently all pending operation
    // contexts
    connection.request.cancel();

    // await all operations, so nothing writes to the outgoing channel from
    // this point
    connection.tracker.close();
    connection.tracker.wait().await;
    tracing::debug!("websocket reader finished");
}

/// Races the init timeout against the first `connection_init` and the
/// request context.
pub(crate) async fn connect_timeout_watchdog(
    connection: Arc<Connection>,
    timeout: Duration,
    connected: oneshot::Receiver<()>,
) {
    tokio::select! {
        () = tokio::time::sleep(timeout) => {
            protocol::handle_error(
                &connection,
                None,
                ProtocolError::new(CloseCode::InitializationTimeout).into(),
            )
            .await;
        }
        _ = connected => {}
        () = connection.request.cancelled() => {}
    }
}

//! The plain HTTP handler: one-shot responses for queries and mutations, a
//! chunked newline-delimited stream for subscriptions.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::StatusCode;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::context::{OperationContext, RequestContext};
use crate::error::{Error, ResultError};
use crate::interceptor::{HttpRequest, HttpResponse, OperationHandler, OperationNext};
use crate::protocol::types::{PayloadInit, PayloadOperation};
use crate::response::{GraphqlError, Response};
use crate::server::{process_results, ResultWriter, ServerInner};

pub(crate) async fn serve_plain_request(
    server: &Arc<ServerInner>,
    ctx: &Arc<RequestContext>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    if server.reject_http_queries {
        return Err(Error::HttpQueryRejected);
    }

    server.run_init(ctx, PayloadInit::new()).await?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(Error::application)?;
    let payload: PayloadOperation = serde_json::from_slice(&body).map_err(Error::application)?;

    let opctx = OperationContext::new(ctx, None);

    let (response_sender, response_receiver) = oneshot::channel();
    let tail = Arc::new(PlainOperationTail {
        server: server.clone(),
        response_sender: Mutex::new(Some(response_sender)),
        buffer: Mutex::new(Vec::new()),
    });

    let task = tokio::spawn({
        let server = server.clone();
        let opctx = opctx.clone();
        let tail = tail.clone();
        async move {
            let next = OperationNext {
                interceptors: &server.interceptors.operation,
                tail: tail.as_ref(),
            };
            let result = next.run(&opctx, &payload).await;
            // release the handoff slot so a non-streaming request unblocks
            // the handler below
            drop(tail.response_sender.lock().take());
            opctx.cancel();
            result
        }
    });

    match response_receiver.await {
        // The subscription path produced a streaming response; the pump
        // keeps running in the spawned task.
        Ok(response) => Ok(response),
        Err(_) => {
            let result = task
                .await
                .map_err(|err| Error::application(err.to_string()))?;
            let buffer = std::mem::take(&mut *tail.buffer.lock());
            match result {
                Ok(()) => {
                    ctx.cancel();
                    Ok(single_response(buffer))
                }
                // The result reached the buffer before the error surfaced.
                Err(_) if ctx.response_started() && !buffer.is_empty() => {
                    ctx.cancel();
                    Ok(single_response(buffer))
                }
                Err(error) => Err(error),
            }
        }
    }
}

/// Writes an error to the client: 400 with the error text, unless the
/// response already started, in which case the stream simply ends.
pub(crate) fn write_error_response(ctx: &Arc<RequestContext>, error: &Error) -> HttpResponse {
    if ctx.response_started() {
        return ().into_response();
    }
    let text = match error {
        Error::Result(result_error) => result_error.to_string(),
        other => ResultError {
            result: Response::from_errors(vec![GraphqlError::new(other.to_string())]),
        }
        .to_string(),
    };
    let content_length = text.len().to_string();
    (
        StatusCode::BAD_REQUEST,
        [(CONTENT_LENGTH, content_length.as_str())],
        text,
    )
        .into_response()
}

fn single_response(buffer: Vec<u8>) -> HttpResponse {
    let content_length = buffer.len().to_string();
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/json"),
            (CONTENT_LENGTH, content_length.as_str()),
        ],
        buffer,
    )
        .into_response()
}

/// The Operation stage's tail for plain HTTP: parse, execute, then either
/// buffer the single result or hand a streaming response back to the
/// request handler and keep pumping.
struct PlainOperationTail {
    server: Arc<ServerInner>,
    response_sender: Mutex<Option<oneshot::Sender<HttpResponse>>>,
    buffer: Mutex<Vec<u8>>,
}

#[async_trait]
impl OperationHandler for PlainOperationTail {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        self.server.run_operation_parse(ctx, payload).await?;
        let results = self.server.run_operation_execute(ctx, payload).await?;

        if ctx.is_subscription() {
            let (sender, receiver) = mpsc::channel::<Bytes>(16);
            let response = streaming_response(ctx.request().clone(), receiver);
            if let Some(response_sender) = self.response_sender.lock().take() {
                let _ = response_sender.send(response);
            }
            ctx.request().mark_response_started();

            let mut writer = StreamResultWriter { sender };
            process_results(&self.server, ctx, payload, results, &mut writer).await
        } else {
            let mut writer = BufferResultWriter {
                buffer: &self.buffer,
            };
            process_results(&self.server, ctx, payload, results, &mut writer).await
        }
    }
}

fn streaming_response(request: Arc<RequestContext>, receiver: mpsc::Receiver<Bytes>) -> HttpResponse {
    // The guard cancels the request context once the stream finishes or the
    // client goes away.
    let guard = CancelOnDrop(request);
    let stream = ReceiverStream::new(receiver)
        .map(Ok::<_, Infallible>)
        .chain(futures_util::stream::poll_fn(move |_| {
            let _ = &guard;
            Poll::Ready(None)
        }));

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/json"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

struct CancelOnDrop(Arc<RequestContext>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Streams each result as a JSON line, flushed as its own chunk.
struct StreamResultWriter {
    sender: mpsc::Sender<Bytes>,
}

#[async_trait]
impl ResultWriter for StreamResultWriter {
    async fn write(
        &mut self,
        _ctx: &Arc<OperationContext>,
        response: Response,
    ) -> Result<(), Error> {
        let mut bytes = serde_json::to_vec(&response).map_err(Error::application)?;
        bytes.push(b'\n');
        self.sender
            .send(Bytes::from(bytes))
            .await
            .map_err(|_| Error::application("client disconnected"))
    }
}

/// Collects the single query/mutation result for a sized response.
struct BufferResultWriter<'a> {
    buffer: &'a Mutex<Vec<u8>>,
}

#[async_trait]
impl ResultWriter for BufferResultWriter<'_> {
    async fn write(
        &mut self,
        ctx: &Arc<OperationContext>,
        response: Response,
    ) -> Result<(), Error> {
        let mut bytes = serde_json::to_vec(&response).map_err(Error::application)?;
        bytes.push(b'\n');
        self.buffer.lock().extend_from_slice(&bytes);
        ctx.request().mark_response_started();
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use tokio::sync::mpsc;

use crate::context::{OperationContext, RequestContext};
use crate::engine::{ExecutionRequest, Executor, Extension};
use crate::error::{Error, ResultError};
use crate::interceptor::{
    HttpRequest, HttpRequestHandler, HttpRequestNext, HttpResponse, InitNext, Interceptors,
    NoopInitTail, OperationExecuteHandler, OperationExecuteNext, OperationParseHandler,
    OperationParseNext,
};
use crate::metrics::{ServerMetrics, TracingMetrics};
use crate::pipeline;
use crate::protocol::types::{PayloadInit, PayloadOperation};
use crate::protocol::Protocol;
use crate::response::Response;
use crate::websocket;

/// Post-processes every result before it is written.
pub type ResultProcessor =
    dyn Fn(&Arc<OperationContext>, &PayloadOperation, Response) -> Response + Send + Sync;

/// Server configuration. The zero value serves both subprotocols with no
/// keep-alive, no init timeout, and plain HTTP queries enabled.
#[derive(Default)]
pub struct ServerOptions {
    /// Interceptors around the five request-processing stages.
    pub interceptors: Interceptors,
    /// Engine extension hooks driven by the parse/validate pipeline.
    pub extensions: Vec<Arc<dyn Extension>>,
    /// Post-processes each result before it is written.
    pub result_processor: Option<Arc<ResultProcessor>>,
    /// Keep-alive period for websocket connections; `None` disables.
    pub keepalive: Option<Duration>,
    /// How long a client may take to send `connection_init`; `None` waits
    /// forever.
    pub connect_timeout: Option<Duration>,
    /// When set, plain HTTP queries are rejected.
    pub reject_http_queries: bool,
    /// Acceptable websocket subprotocols. `None` serves both; an explicit
    /// empty set disables websocket upgrades entirely, leaving a
    /// plain-HTTP-only server.
    pub subscription_protocols: Option<Vec<Protocol>>,
    /// Root value passed to the executor's root resolvers.
    pub root_value: Option<serde_json::Value>,
    /// Connection/operation metrics sink.
    pub metrics: Option<Arc<dyn ServerMetrics>>,
}

/// A GraphQL transport server over HTTP and websockets. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    pub(crate) schema: Arc<Valid<Schema>>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) interceptors: Interceptors,
    pub(crate) extensions: Vec<Arc<dyn Extension>>,
    pub(crate) result_processor: Arc<ResultProcessor>,
    pub(crate) keepalive: Option<Duration>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) reject_http_queries: bool,
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) root_value: Option<serde_json::Value>,
    pub(crate) metrics: Arc<dyn ServerMetrics>,
}

impl Server {
    pub fn new(
        schema: Arc<Valid<Schema>>,
        executor: Arc<dyn Executor>,
        options: ServerOptions,
    ) -> Self {
        let protocols = options
            .subscription_protocols
            .unwrap_or_else(|| vec![Protocol::GraphqlWs, Protocol::GraphqlTransportWs]);
        let result_processor: Arc<ResultProcessor> = match options.result_processor {
            Some(processor) => processor,
            None => Arc::new(|_, _, result| result),
        };
        let metrics: Arc<dyn ServerMetrics> = match options.metrics {
            Some(metrics) => metrics,
            None => Arc::new(TracingMetrics),
        };

        Self {
            inner: Arc::new(ServerInner {
                schema,
                executor,
                interceptors: options.interceptors,
                extensions: options.extensions,
                result_processor,
                keepalive: options.keepalive,
                connect_timeout: options.connect_timeout,
                reject_http_queries: options.reject_http_queries,
                protocols,
                root_value: options.root_value,
                metrics,
            }),
        }
    }

    /// The single HTTP entrypoint. Requests carrying `Connection` and
    /// `Upgrade` headers become websocket sessions; everything else is
    /// served as a plain GraphQL request.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let ctx = RequestContext::new();
        ctx.insert(request.headers().clone());

        let tail = DispatchTail {
            server: self.inner.clone(),
        };
        let next = HttpRequestNext {
            interceptors: &self.inner.interceptors.http_request,
            tail: &tail,
        };
        match next.run(&ctx, request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!("request failed: {error}");
                let response = crate::http::write_error_response(&ctx, &error);
                ctx.cancel();
                response
            }
        }
    }
}

/// The HTTPRequest stage's tail: dispatch on headers.
struct DispatchTail {
    server: Arc<ServerInner>,
}

#[async_trait]
impl HttpRequestHandler for DispatchTail {
    async fn handle(
        &self,
        ctx: &Arc<RequestContext>,
        request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        let headers = request.headers();
        let is_upgrade = headers
            .get(http::header::CONNECTION)
            .is_some_and(|value| !value.as_bytes().is_empty())
            && headers
                .get(http::header::UPGRADE)
                .is_some_and(|value| !value.as_bytes().is_empty());

        if is_upgrade && !self.server.protocols.is_empty() {
            let (mut parts, _body) = request.into_parts();
            match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(upgrade) => Ok(websocket::handle_upgrade(
                    self.server.clone(),
                    ctx.clone(),
                    upgrade,
                )),
                Err(rejection) => Err(Error::application(rejection.to_string())),
            }
        } else {
            crate::http::serve_plain_request(&self.server, ctx, request).await
        }
    }
}

impl ServerInner {
    pub(crate) async fn run_init(
        self: &Arc<Self>,
        ctx: &Arc<RequestContext>,
        payload: PayloadInit,
    ) -> Result<(), Error> {
        let next = InitNext {
            interceptors: &self.interceptors.init,
            tail: &NoopInitTail,
        };
        next.run(ctx, payload).await
    }

    pub(crate) async fn run_operation_parse(
        self: &Arc<Self>,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        let tail = ParseTail {
            server: self.clone(),
        };
        let next = OperationParseNext {
            interceptors: &self.interceptors.operation_parse,
            tail: &tail,
        };
        next.run(ctx, payload).await
    }

    pub(crate) async fn run_operation_execute(
        self: &Arc<Self>,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<mpsc::Receiver<Response>, Error> {
        let tail = ExecuteTail {
            server: self.clone(),
        };
        let next = OperationExecuteNext {
            interceptors: &self.interceptors.operation_execute,
            tail: &tail,
        };
        next.run(ctx, payload).await
    }
}

/// The OperationParse stage's tail: the parse/validate pipeline.
struct ParseTail {
    server: Arc<ServerInner>,
}

#[async_trait]
impl OperationParseHandler for ParseTail {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        pipeline::parse_operation(&self.server.schema, &self.server.extensions, ctx, payload)
    }
}

/// The OperationExecute stage's tail: hand the parsed operation to the
/// executor, normalizing single results into a one-shot channel.
struct ExecuteTail {
    server: Arc<ServerInner>,
}

#[async_trait]
impl OperationExecuteHandler for ExecuteTail {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<mpsc::Receiver<Response>, Error> {
        let document = ctx
            .document()
            .ok_or_else(|| Error::application("operation was not parsed"))?;
        let request = ExecutionRequest {
            document,
            operation_name: payload.operation_name.clone(),
            variables: payload.variables.clone(),
            extensions: payload.extensions.clone(),
            root_value: self.server.root_value.clone(),
        };

        if ctx.is_subscription() {
            match self.server.executor.subscribe(ctx.clone(), request).await {
                Ok(results) => Ok(results),
                Err(response) => Ok(single_result(response)),
            }
        } else {
            let response = self.server.executor.execute(ctx.clone(), request).await;
            Ok(single_result(response))
        }
    }
}

fn single_result(response: Response) -> mpsc::Receiver<Response> {
    let (sender, receiver) = mpsc::channel(1);
    let _ = sender.try_send(response);
    receiver
}

/// Sink for operation results; websocket and plain HTTP transports each
/// provide one.
#[async_trait]
pub(crate) trait ResultWriter: Send {
    async fn write(&mut self, ctx: &Arc<OperationContext>, response: Response)
        -> Result<(), Error>;
}

/// Drains the result channel, post-processing and writing each result,
/// until the channel closes or the operation context is cancelled. A result
/// carrying errors is written and then terminates the pump.
pub(crate) async fn process_results(
    server: &Arc<ServerInner>,
    ctx: &Arc<OperationContext>,
    payload: &PayloadOperation,
    mut results: mpsc::Receiver<Response>,
    writer: &mut dyn ResultWriter,
) -> Result<(), Error> {
    ctx.mark_executed();

    loop {
        tokio::select! {
            () = ctx.cancelled() => {
                return if ctx.is_stopped() { Ok(()) } else { Err(Error::Cancelled) };
            }
            result = results.recv() => match result {
                None => return Ok(()),
                Some(result) => {
                    let result = (server.result_processor)(ctx, payload, result);
                    if result.has_errors() {
                        writer.write(ctx, result.clone()).await?;
                        return Err(ResultError { result }.into());
                    }
                    writer.write(ctx, result).await?;
                }
            }
        }
    }
}

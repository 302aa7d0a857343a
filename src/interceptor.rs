//! Composable pre/post hooks around the five request-processing stages.
//!
//! Each stage runs its registered interceptors left to right; every
//! interceptor receives a continuation and may replace arguments,
//! short-circuit with an error, or simply call through. The continuation of
//! the last interceptor is the stage's tail handler.
//!
//! Sequence: HTTPRequest -> Init -> [ Operation -> OperationParse ->
//! OperationExecute ]*

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use tokio::sync::mpsc;

use crate::context::{OperationContext, RequestContext};
use crate::error::Error;
use crate::protocol::types::{PayloadInit, PayloadOperation};
use crate::response::Response;

pub type HttpRequest = http::Request<Body>;
pub type HttpResponse = http::Response<Body>;

/// Wraps the dispatch of an incoming HTTP request, before the transport
/// decides between a websocket upgrade and a plain request.
#[async_trait]
pub trait HttpRequestInterceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Arc<RequestContext>,
        request: HttpRequest,
        next: HttpRequestNext<'_>,
    ) -> Result<HttpResponse, Error>;
}

#[async_trait]
pub(crate) trait HttpRequestHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<RequestContext>,
        request: HttpRequest,
    ) -> Result<HttpResponse, Error>;
}

pub struct HttpRequestNext<'a> {
    pub(crate) interceptors: &'a [Arc<dyn HttpRequestInterceptor>],
    pub(crate) tail: &'a dyn HttpRequestHandler,
}

impl HttpRequestNext<'_> {
    pub async fn run(
        self,
        ctx: &Arc<RequestContext>,
        request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = HttpRequestNext {
                    interceptors: rest,
                    tail: self.tail,
                };
                head.intercept(ctx, request, next).await
            }
            None => self.tail.handle(ctx, request).await,
        }
    }
}

/// Wraps connection initialization: the `connection_init` payload on
/// websockets, an empty payload on plain HTTP. The natural place for
/// authentication.
#[async_trait]
pub trait InitInterceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Arc<RequestContext>,
        payload: PayloadInit,
        next: InitNext<'_>,
    ) -> Result<(), Error>;
}

#[async_trait]
pub(crate) trait InitHandler: Send + Sync {
    async fn handle(&self, ctx: &Arc<RequestContext>, payload: PayloadInit) -> Result<(), Error>;
}

pub struct InitNext<'a> {
    pub(crate) interceptors: &'a [Arc<dyn InitInterceptor>],
    pub(crate) tail: &'a dyn InitHandler,
}

impl InitNext<'_> {
    pub async fn run(self, ctx: &Arc<RequestContext>, payload: PayloadInit) -> Result<(), Error> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = InitNext {
                    interceptors: rest,
                    tail: self.tail,
                };
                head.intercept(ctx, payload, next).await
            }
            None => self.tail.handle(ctx, payload).await,
        }
    }
}

/// Wraps a whole operation: parse, execution, and the result stream.
#[async_trait]
pub trait OperationInterceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationNext<'_>,
    ) -> Result<(), Error>;
}

#[async_trait]
pub(crate) trait OperationHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error>;
}

pub struct OperationNext<'a> {
    pub(crate) interceptors: &'a [Arc<dyn OperationInterceptor>],
    pub(crate) tail: &'a dyn OperationHandler,
}

impl OperationNext<'_> {
    pub async fn run(
        self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = OperationNext {
                    interceptors: rest,
                    tail: self.tail,
                };
                head.intercept(ctx, payload, next).await
            }
            None => self.tail.handle(ctx, payload).await,
        }
    }
}

/// Wraps parsing and validation. Afterwards the operation context carries
/// the document and the subscription flag.
#[async_trait]
pub trait OperationParseInterceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationParseNext<'_>,
    ) -> Result<(), Error>;
}

#[async_trait]
pub(crate) trait OperationParseHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error>;
}

pub struct OperationParseNext<'a> {
    pub(crate) interceptors: &'a [Arc<dyn OperationParseInterceptor>],
    pub(crate) tail: &'a dyn OperationParseHandler,
}

impl OperationParseNext<'_> {
    pub async fn run(
        self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<(), Error> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = OperationParseNext {
                    interceptors: rest,
                    tail: self.tail,
                };
                head.intercept(ctx, payload, next).await
            }
            None => self.tail.handle(ctx, payload).await,
        }
    }
}

/// Wraps execution; yields the channel the result pump drains.
#[async_trait]
pub trait OperationExecuteInterceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationExecuteNext<'_>,
    ) -> Result<mpsc::Receiver<Response>, Error>;
}

#[async_trait]
pub(crate) trait OperationExecuteHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<mpsc::Receiver<Response>, Error>;
}

pub struct OperationExecuteNext<'a> {
    pub(crate) interceptors: &'a [Arc<dyn OperationExecuteInterceptor>],
    pub(crate) tail: &'a dyn OperationExecuteHandler,
}

impl OperationExecuteNext<'_> {
    pub async fn run(
        self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
    ) -> Result<mpsc::Receiver<Response>, Error> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = OperationExecuteNext {
                    interceptors: rest,
                    tail: self.tail,
                };
                head.intercept(ctx, payload, next).await
            }
            None => self.tail.handle(ctx, payload).await,
        }
    }
}

/// The Init stage's tail handler: accepting the connection params is the
/// default.
pub(crate) struct NoopInitTail;

#[async_trait]
impl InitHandler for NoopInitTail {
    async fn handle(&self, _ctx: &Arc<RequestContext>, _payload: PayloadInit) -> Result<(), Error> {
        Ok(())
    }
}

/// The interceptors registered for each stage. `append` adds another set
/// after the existing ones, preserving registration order.
#[derive(Clone, Default)]
pub struct Interceptors {
    pub http_request: Vec<Arc<dyn HttpRequestInterceptor>>,
    pub init: Vec<Arc<dyn InitInterceptor>>,
    pub operation: Vec<Arc<dyn OperationInterceptor>>,
    pub operation_parse: Vec<Arc<dyn OperationParseInterceptor>>,
    pub operation_execute: Vec<Arc<dyn OperationExecuteInterceptor>>,
}

impl Interceptors {
    pub fn append(&mut self, other: Interceptors) {
        self.http_request.extend(other.http_request);
        self.init.extend(other.init);
        self.operation.extend(other.operation);
        self.operation_parse.extend(other.operation_parse);
        self.operation_execute.extend(other.operation_execute);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl InitInterceptor for Recorder {
        async fn intercept(
            &self,
            ctx: &Arc<RequestContext>,
            payload: PayloadInit,
            next: InitNext<'_>,
        ) -> Result<(), Error> {
            self.log.lock().push(self.label);
            if self.short_circuit {
                return Err(Error::application("short circuit"));
            }
            next.run(ctx, payload).await
        }
    }

    struct Tail {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl InitHandler for Tail {
        async fn handle(
            &self,
            _ctx: &Arc<RequestContext>,
            _payload: PayloadInit,
        ) -> Result<(), Error> {
            self.log.lock().push("tail");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chain_runs_left_to_right_into_tail() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn InitInterceptor>> = vec![
            Arc::new(Recorder {
                label: "first",
                log: log.clone(),
                short_circuit: false,
            }),
            Arc::new(Recorder {
                label: "second",
                log: log.clone(),
                short_circuit: false,
            }),
        ];
        let tail = Tail { log: log.clone() };
        let ctx = RequestContext::new();

        let next = InitNext {
            interceptors: &interceptors,
            tail: &tail,
        };
        next.run(&ctx, PayloadInit::new()).await.unwrap();

        assert_eq!(*log.lock(), vec!["first", "second", "tail"]);
    }

    #[tokio::test]
    async fn test_chain_short_circuits_before_tail() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn InitInterceptor>> = vec![
            Arc::new(Recorder {
                label: "first",
                log: log.clone(),
                short_circuit: true,
            }),
            Arc::new(Recorder {
                label: "second",
                log: log.clone(),
                short_circuit: false,
            }),
        ];
        let tail = Tail { log: log.clone() };
        let ctx = RequestContext::new();

        let next = InitNext {
            interceptors: &interceptors,
            tail: &tail,
        };
        let result = next.run(&ctx, PayloadInit::new()).await;

        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["first"]);
    }
}

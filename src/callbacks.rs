//! The legacy callback surface, expressed as an equivalent interceptor
//! tuple. Interceptors remain the primitive; this adapter exists for
//! applications that think in lifecycle hooks rather than wrappers.
//!
//! Sequence: on_request -> on_connect ->
//! [ on_operation -> on_operation_validation -> on_operation_result ->
//! on_operation_done ]* -> on_disconnect -> on_request_done

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::{OperationContext, RequestContext};
use crate::error::Error;
use crate::interceptor::{
    HttpRequest, HttpRequestInterceptor, HttpRequestNext, HttpResponse, InitInterceptor, InitNext,
    Interceptors, OperationExecuteInterceptor, OperationExecuteNext, OperationInterceptor,
    OperationNext, OperationParseInterceptor, OperationParseNext,
};
use crate::protocol::types::{PayloadInit, PayloadOperation};
use crate::response::{GraphqlError, Response};

/// Called once per HTTP request, before upgrade or plain execution.
pub type OnRequest = dyn Fn(&Arc<RequestContext>) -> Result<(), Error> + Send + Sync;

/// Called once per HTTP request when it finishes, with the error if any.
pub type OnRequestDone = dyn Fn(&Arc<RequestContext>, Option<&Error>) + Send + Sync;

/// Called once per connection with the init payload, after upgrade on
/// websockets or before execution on plain requests.
pub type OnConnect = dyn Fn(&Arc<RequestContext>, &PayloadInit) -> Result<(), Error> + Send + Sync;

/// Called once per connection before `on_request_done`; may transform or
/// swallow the connection's error.
pub type OnDisconnect =
    dyn Fn(&Arc<RequestContext>, Result<(), Error>) -> Result<(), Error> + Send + Sync;

/// Called before each operation; an error terminates the operation.
pub type OnOperation =
    dyn Fn(&Arc<OperationContext>, &PayloadOperation) -> Result<(), Error> + Send + Sync;

/// Called after parsing an operation, with the parse/validation result when
/// it failed. The document is in the operation context when parsing
/// succeeded.
pub type OnOperationValidation = dyn Fn(&Arc<OperationContext>, &PayloadOperation, Option<&Response>) -> Result<(), Error>
    + Send
    + Sync;

/// Called for each received result; may post-process it or terminate the
/// operation by returning an error.
pub type OnOperationResult =
    dyn Fn(&Arc<OperationContext>, &PayloadOperation, Response) -> Result<Response, Error>
        + Send
        + Sync;

/// Called once the operation finished; may transform or swallow its error.
pub type OnOperationDone = dyn Fn(&Arc<OperationContext>, &PayloadOperation, Result<(), Error>) -> Result<(), Error>
    + Send
    + Sync;

/// Lifecycle callbacks supported by the server.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_request: Option<Arc<OnRequest>>,
    pub on_request_done: Option<Arc<OnRequestDone>>,
    pub on_connect: Option<Arc<OnConnect>>,
    pub on_disconnect: Option<Arc<OnDisconnect>>,
    pub on_operation: Option<Arc<OnOperation>>,
    pub on_operation_validation: Option<Arc<OnOperationValidation>>,
    pub on_operation_result: Option<Arc<OnOperationResult>>,
    pub on_operation_done: Option<Arc<OnOperationDone>>,
}

impl Callbacks {
    /// Expresses the callbacks as interceptors, ready to append to the
    /// interceptors in [`crate::ServerOptions`].
    pub fn into_interceptors(self) -> Interceptors {
        let mut interceptors = Interceptors::default();

        if self.on_request.is_some() || self.on_request_done.is_some() {
            interceptors.http_request.push(Arc::new(CallbackHttpRequest {
                on_request: self.on_request,
                on_request_done: self.on_request_done,
            }));
        }
        if self.on_connect.is_some() || self.on_disconnect.is_some() {
            interceptors.init.push(Arc::new(CallbackInit {
                on_connect: self.on_connect,
                on_disconnect: self.on_disconnect,
            }));
        }
        if self.on_operation.is_some() || self.on_operation_done.is_some() {
            interceptors.operation.push(Arc::new(CallbackOperation {
                on_operation: self.on_operation,
                on_operation_done: self.on_operation_done,
            }));
        }
        if let Some(on_operation_validation) = self.on_operation_validation {
            interceptors
                .operation_parse
                .push(Arc::new(CallbackOperationParse {
                    on_operation_validation,
                }));
        }
        if let Some(on_operation_result) = self.on_operation_result {
            interceptors
                .operation_execute
                .push(Arc::new(CallbackOperationExecute {
                    on_operation_result,
                }));
        }

        interceptors
    }
}

struct CallbackHttpRequest {
    on_request: Option<Arc<OnRequest>>,
    on_request_done: Option<Arc<OnRequestDone>>,
}

#[async_trait]
impl HttpRequestInterceptor for CallbackHttpRequest {
    async fn intercept(
        &self,
        ctx: &Arc<RequestContext>,
        request: HttpRequest,
        next: HttpRequestNext<'_>,
    ) -> Result<HttpResponse, Error> {
        let result = match &self.on_request {
            Some(on_request) => on_request(ctx),
            None => Ok(()),
        };
        let result = match result {
            Ok(()) => next.run(ctx, request).await,
            Err(error) => Err(error),
        };
        if let Some(on_request_done) = &self.on_request_done {
            on_request_done(ctx, result.as_ref().err());
        }
        result
    }
}

struct CallbackInit {
    on_connect: Option<Arc<OnConnect>>,
    on_disconnect: Option<Arc<OnDisconnect>>,
}

#[async_trait]
impl InitInterceptor for CallbackInit {
    async fn intercept(
        &self,
        ctx: &Arc<RequestContext>,
        payload: PayloadInit,
        next: InitNext<'_>,
    ) -> Result<(), Error> {
        let result = match &self.on_connect {
            Some(on_connect) => on_connect(ctx, &payload),
            None => Ok(()),
        };
        let result = match result {
            Ok(()) => next.run(ctx, payload).await,
            Err(error) => Err(error),
        };
        match &self.on_disconnect {
            Some(on_disconnect) => on_disconnect(ctx, result),
            None => result,
        }
    }
}

struct CallbackOperation {
    on_operation: Option<Arc<OnOperation>>,
    on_operation_done: Option<Arc<OnOperationDone>>,
}

#[async_trait]
impl OperationInterceptor for CallbackOperation {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationNext<'_>,
    ) -> Result<(), Error> {
        let result = match &self.on_operation {
            Some(on_operation) => on_operation(ctx, payload),
            None => Ok(()),
        };
        let result = match result {
            Ok(()) => next.run(ctx, payload).await,
            Err(error) => Err(error),
        };
        match &self.on_operation_done {
            Some(on_operation_done) => on_operation_done(ctx, payload, result),
            None => result,
        }
    }
}

struct CallbackOperationParse {
    on_operation_validation: Arc<OnOperationValidation>,
}

#[async_trait]
impl OperationParseInterceptor for CallbackOperationParse {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationParseNext<'_>,
    ) -> Result<(), Error> {
        let result = next.run(ctx, payload).await;
        let parse_result = match &result {
            Err(Error::Result(result_error)) => Some(&result_error.result),
            _ => None,
        };
        (self.on_operation_validation)(ctx, payload, parse_result)?;
        result
    }
}

struct CallbackOperationExecute {
    on_operation_result: Arc<OnOperationResult>,
}

#[async_trait]
impl OperationExecuteInterceptor for CallbackOperationExecute {
    async fn intercept(
        &self,
        ctx: &Arc<OperationContext>,
        payload: &PayloadOperation,
        next: OperationExecuteNext<'_>,
    ) -> Result<mpsc::Receiver<Response>, Error> {
        let mut results = next.run(ctx, payload).await?;

        let hook = self.on_operation_result.clone();
        let ctx = ctx.clone();
        let payload = payload.clone();
        let (sender, receiver) = mpsc::channel(1);

        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                match hook(&ctx, &payload, result) {
                    Ok(result) => {
                        if sender.send(result).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        // an error-bearing result terminates the operation
                        let _ = sender
                            .send(Response::from_errors(vec![GraphqlError::new(
                                error.to_string(),
                            )]))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_callbacks_produce_no_interceptors() {
        let interceptors = Callbacks::default().into_interceptors();
        assert!(interceptors.http_request.is_empty());
        assert!(interceptors.init.is_empty());
        assert!(interceptors.operation.is_empty());
        assert!(interceptors.operation_parse.is_empty());
        assert!(interceptors.operation_execute.is_empty());
    }

    #[test]
    fn test_each_hook_maps_to_its_stage() {
        let callbacks = Callbacks {
            on_request: Some(Arc::new(|_| Ok(()))),
            on_connect: Some(Arc::new(|_, _| Ok(()))),
            on_operation: Some(Arc::new(|_, _| Ok(()))),
            on_operation_validation: Some(Arc::new(|_, _, _| Ok(()))),
            on_operation_result: Some(Arc::new(|_, _, result| Ok(result))),
            ..Callbacks::default()
        };
        let interceptors = callbacks.into_interceptors();
        assert_eq!(interceptors.http_request.len(), 1);
        assert_eq!(interceptors.init.len(), 1);
        assert_eq!(interceptors.operation.len(), 1);
        assert_eq!(interceptors.operation_parse.len(), 1);
        assert_eq!(interceptors.operation_execute.len(), 1);
    }
}

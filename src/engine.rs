use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::OperationContext;
use crate::protocol::types::PayloadOperation;
use crate::response::{GraphqlError, Response};

/// Everything the executor needs to run one operation.
#[derive(Clone)]
pub struct ExecutionRequest {
    /// The parsed and validated operation document.
    pub document: Arc<Valid<ExecutableDocument>>,
    pub operation_name: Option<String>,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub extensions: serde_json::Map<String, serde_json::Value>,
    /// The configured root value, passed through to root resolvers.
    pub root_value: Option<serde_json::Value>,
}

/// The execution half of the GraphQL engine. The transport parses and
/// validates; resolving fields is the application's business.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Executes a query or mutation to a single result. Field errors belong
    /// in the returned response, not in a panic.
    async fn execute(&self, ctx: Arc<OperationContext>, request: ExecutionRequest) -> Response;

    /// Executes a subscription. The returned channel yields results until
    /// the source closes; the executor should stop producing when the
    /// operation context is cancelled. A setup failure is returned as the
    /// error response.
    async fn subscribe(
        &self,
        ctx: Arc<OperationContext>,
        request: ExecutionRequest,
    ) -> Result<mpsc::Receiver<Response>, Response>;
}

/// Called when parsing finished, with the parse error if there was one.
pub type ParseFinisher = Box<dyn FnOnce(Option<&GraphqlError>) + Send>;

/// Called when validation finished, with the accumulated validation errors.
pub type ValidationFinisher = Box<dyn FnOnce(&[GraphqlError]) + Send>;

/// Hooks invoked around the parse/validate pipeline, in registration order.
/// A panic inside any hook is caught and reported as a formatted error
/// attributed to the extension's name; it never takes the server down.
pub trait Extension: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Invoked before parsing, with the raw operation payload.
    fn init(&self, _ctx: &Arc<OperationContext>, _payload: &PayloadOperation) {}

    /// Invoked when parsing starts; the finisher runs once parsing ends.
    fn parse_did_start(&self, _ctx: &Arc<OperationContext>) -> ParseFinisher {
        Box::new(|_| {})
    }

    /// Invoked when validation starts; the finisher runs once validation
    /// ends.
    fn validation_did_start(&self, _ctx: &Arc<OperationContext>) -> ValidationFinisher {
        Box::new(|_| {})
    }
}

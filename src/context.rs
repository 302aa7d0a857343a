use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// HTTP-request-scoped mutable context. Created when a request enters the
/// server and cancelled when the request (or the websocket session it
/// upgraded into) ends. Cancelling it cancels every operation context
/// created under it.
pub struct RequestContext {
    cancellation: CancellationToken,
    values: RwLock<http::Extensions>,
    response_started: AtomicBool,
    stopped: AtomicBool,
}

impl RequestContext {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cancellation: CancellationToken::new(),
            values: RwLock::new(http::Extensions::new()),
            response_started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Binds a value by type. A later insert of the same type replaces the
    /// earlier one.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.values.write().insert(value);
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.values.read().get::<T>().cloned()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// True once response headers (or the first streamed byte) went out.
    pub fn response_started(&self) -> bool {
        self.response_started.load(Ordering::Acquire)
    }

    pub(crate) fn mark_response_started(&self) {
        self.response_started.store(true, Ordering::Release);
    }

    /// True when the client asked to terminate the connection.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Operation-scoped mutable context, a child of a [`RequestContext`]. Value
/// lookups fall through to the parent; cancellation flows the other way.
pub struct OperationContext {
    request: Arc<RequestContext>,
    cancellation: CancellationToken,
    values: RwLock<http::Extensions>,
    id: Option<String>,
    stopped: AtomicBool,
    executed: AtomicBool,
    subscription: AtomicBool,
    document: OnceLock<Arc<Valid<ExecutableDocument>>>,
}

impl OperationContext {
    pub(crate) fn new(request: &Arc<RequestContext>, id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            request: request.clone(),
            cancellation: request.token().child_token(),
            values: RwLock::new(http::Extensions::new()),
            id,
            stopped: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            subscription: AtomicBool::new(false),
            document: OnceLock::new(),
        })
    }

    pub fn request(&self) -> &Arc<RequestContext> {
        &self.request
    }

    /// The client-chosen operation id; absent for plain HTTP operations.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.values.write().insert(value);
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        match self.values.read().get::<T>().cloned() {
            Some(value) => Some(value),
            None => self.request.get::<T>(),
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// True when the client stopped this operation, or requested
    /// termination of the whole connection.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.request.is_stopped()
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once the execution loop was entered at least once.
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_executed(&self) {
        self.executed.store(true, Ordering::Release);
    }

    pub fn is_subscription(&self) -> bool {
        self.subscription.load(Ordering::Acquire)
    }

    pub(crate) fn set_subscription(&self, subscription: bool) {
        self.subscription.store(subscription, Ordering::Release);
    }

    /// The parsed and validated document, available after the parse stage.
    pub fn document(&self) -> Option<Arc<Valid<ExecutableDocument>>> {
        self.document.get().cloned()
    }

    pub(crate) fn set_document(&self, document: Arc<Valid<ExecutableDocument>>) {
        let _ = self.document.set(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Token(&'static str);

    #[derive(Clone, PartialEq, Debug)]
    struct Marker(u32);

    #[test]
    fn test_lookup_falls_through_to_request() {
        let request = RequestContext::new();
        request.insert(Token("request"));
        let operation = OperationContext::new(&request, Some("1".to_string()));

        assert_eq!(operation.get::<Token>(), Some(Token("request")));

        operation.insert(Token("operation"));
        assert_eq!(operation.get::<Token>(), Some(Token("operation")));
        assert_eq!(request.get::<Token>(), Some(Token("request")));

        assert_eq!(operation.get::<Marker>(), None);
    }

    #[test]
    fn test_request_cancel_propagates_to_operations() {
        let request = RequestContext::new();
        let first = OperationContext::new(&request, Some("1".to_string()));
        let second = OperationContext::new(&request, Some("2".to_string()));

        assert!(!first.is_cancelled());
        request.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_operation_cancel_does_not_cancel_request() {
        let request = RequestContext::new();
        let operation = OperationContext::new(&request, Some("1".to_string()));
        let sibling = OperationContext::new(&request, Some("2".to_string()));

        operation.cancel();
        assert!(operation.is_cancelled());
        assert!(!request.is_cancelled());
        assert!(!sibling.is_cancelled());
    }

    #[test]
    fn test_stopped_flag_falls_through_from_request() {
        let request = RequestContext::new();
        let operation = OperationContext::new(&request, None);

        assert!(!operation.is_stopped());
        request.mark_stopped();
        assert!(operation.is_stopped());
    }
}

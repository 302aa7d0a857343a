use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::task::TaskTracker;

use crate::context::{OperationContext, RequestContext};
use crate::error::ProtocolError;
use crate::protocol::types::{Message, Operation, Payload};
use crate::protocol::Protocol;
use crate::server::ServerInner;

pub(crate) const OUTGOING_CHANNEL_SIZE: usize = 50;

/// One entry on the outgoing channel, the single fan-in point into the
/// socket writer.
pub(crate) enum Outgoing {
    /// A protocol message, written as a JSON text frame.
    Message(Message),
    /// A terminal event; the writer closes the socket with the carried code.
    Close(ProtocolError),
}

/// Shared state of one upgraded websocket connection.
pub(crate) struct Connection {
    pub(crate) server: Arc<ServerInner>,
    pub(crate) request: Arc<RequestContext>,
    pub(crate) protocol: Protocol,
    sender: mpsc::Sender<Outgoing>,
    // In-flight operations by client-chosen id. Uniqueness is enforced on
    // insert; removal happens in the operation task's epilogue.
    operations: RwLock<HashMap<String, Arc<OperationContext>>>,
    // Written only by the reader task.
    initialized: AtomicBool,
    // Tracks operation tasks so the reader can await them before the
    // outgoing channel is released.
    pub(crate) tracker: TaskTracker,
}

impl Connection {
    pub(crate) fn new(
        server: Arc<ServerInner>,
        request: Arc<RequestContext>,
        protocol: Protocol,
        sender: mpsc::Sender<Outgoing>,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            request,
            protocol,
            sender,
            operations: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        })
    }

    /// Enqueues an outgoing entry, giving up when the request context is
    /// cancelled so producers never block on a writer that already left.
    pub(crate) async fn send(&self, outgoing: Outgoing) {
        tokio::select! {
            result = self.sender.send(outgoing) => {
                if result.is_err() {
                    tracing::trace!("outgoing channel closed, message dropped");
                }
            }
            () = self.request.cancelled() => {}
        }
    }

    /// Enqueues a protocol message for the operation in `ctx` (or a
    /// connection-level message when `ctx` is absent). Emitting an `error`
    /// marks the operation stopped so no further output is produced for it.
    pub(crate) async fn send_message(
        &self,
        ctx: Option<&Arc<OperationContext>>,
        operation: Operation,
        payload: Option<Payload>,
    ) {
        if operation == Operation::Error {
            if let Some(ctx) = ctx {
                ctx.mark_stopped();
            }
        }
        let id = ctx.and_then(|ctx| ctx.id().map(str::to_string));
        self.send(Outgoing::Message(Message::new(id, operation, payload)))
            .await;
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Registers an operation id, refusing duplicates.
    pub(crate) async fn try_insert_operation(
        &self,
        id: &str,
        ctx: Arc<OperationContext>,
    ) -> bool {
        let mut operations = self.operations.write().await;
        if operations.contains_key(id) {
            return false;
        }
        operations.insert(id.to_string(), ctx);
        true
    }

    pub(crate) async fn get_operation(&self, id: &str) -> Option<Arc<OperationContext>> {
        self.operations.read().await.get(id).cloned()
    }

    pub(crate) async fn remove_operation(&self, id: &str) -> Option<Arc<OperationContext>> {
        self.operations.write().await.remove(id)
    }
}

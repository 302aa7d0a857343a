use crate::response::{GraphqlError, Response};

/// WebSocket close codes used by the transport. The 4xxx range carries
/// `graphql-transport-ws` protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000, clean shutdown.
    Normal,
    /// 1006, abnormal closure. Never sent explicitly; surfaced by the
    /// transport when a peer disappears.
    Abnormal,
    /// 4400, a frame that could not be decoded as a protocol message.
    InvalidMessage,
    /// 4401, an operation was attempted before `connection_init` completed.
    Unauthorized,
    /// 4408, no `connection_init` arrived within the configured timeout.
    InitializationTimeout,
    /// 4409, an operation id is already in use on this connection.
    SubscriberAlreadyExists,
    /// 4429, more than one `connection_init` on the same connection.
    TooManyInitializationRequests,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Abnormal => 1006,
            Self::InvalidMessage => 4400,
            Self::Unauthorized => 4401,
            Self::InitializationTimeout => 4408,
            Self::SubscriberAlreadyExists => 4409,
            Self::TooManyInitializationRequests => 4429,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "Termination requested",
            Self::Abnormal => "",
            Self::InvalidMessage => "Invalid message",
            Self::Unauthorized => "Unauthorized",
            Self::InitializationTimeout => "Connection initialisation timeout",
            Self::SubscriberAlreadyExists => "",
            Self::TooManyInitializationRequests => "Too many initialisation requests",
        }
    }
}

/// A protocol-level violation. Closes the socket with its code; on the
/// legacy `graphql-ws` dialect a `connection_error` message precedes the
/// close.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProtocolError {
    pub code: CloseCode,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: CloseCode) -> Self {
        Self {
            code,
            message: code.reason().to_string(),
        }
    }

    /// Wraps an underlying error, prefixing the close code's description
    /// when it has one.
    pub fn with_detail(code: CloseCode, detail: impl std::fmt::Display) -> Self {
        let reason = code.reason();
        let message = if reason.is_empty() {
            detail.to_string()
        } else {
            format!("{reason}: {detail}")
        };
        Self { code, message }
    }

    pub fn subscriber_already_exists(operation_id: &str) -> Self {
        Self {
            code: CloseCode::SubscriberAlreadyExists,
            message: format!("Subscriber for {operation_id} already exists"),
        }
    }
}

/// An execution result that carries errors, passed around as an error so it
/// terminates the result pump. Rendered per dialect: a single folded object
/// on `graphql-ws`, an error array on `graphql-transport-ws`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", serde_json::to_string(.result).unwrap_or_default())]
pub struct ResultError {
    pub result: Response,
}

/// The transport-wide error type threaded through interceptor chains and
/// operation tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Result(#[from] ResultError),

    #[error("HTTP query rejected")]
    HttpQueryRejected,

    #[error("context cancelled")]
    Cancelled,

    /// An error raised by application code: interceptors, callbacks, or the
    /// executor seam.
    #[error(transparent)]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn application(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Application(error.into())
    }

    pub(crate) fn to_graphql_error(&self) -> GraphqlError {
        GraphqlError::new(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::GraphqlError;

    #[test]
    fn test_close_code_values() {
        assert_eq!(CloseCode::Normal.code(), 1000);
        assert_eq!(CloseCode::InvalidMessage.code(), 4400);
        assert_eq!(CloseCode::Unauthorized.code(), 4401);
        assert_eq!(CloseCode::InitializationTimeout.code(), 4408);
        assert_eq!(CloseCode::SubscriberAlreadyExists.code(), 4409);
        assert_eq!(CloseCode::TooManyInitializationRequests.code(), 4429);
    }

    #[test]
    fn test_protocol_error_messages() {
        let err = ProtocolError::new(CloseCode::InitializationTimeout);
        assert_eq!(err.to_string(), "Connection initialisation timeout");

        let err = ProtocolError::with_detail(CloseCode::InvalidMessage, "bad frame");
        assert_eq!(err.to_string(), "Invalid message: bad frame");

        let err = ProtocolError::subscriber_already_exists("1");
        assert_eq!(err.to_string(), "Subscriber for 1 already exists");
        assert_eq!(err.code, CloseCode::SubscriberAlreadyExists);
    }

    #[test]
    fn test_result_error_renders_result_json() {
        let err = ResultError {
            result: Response::from_errors(vec![GraphqlError::new("boom")]),
        };
        assert_eq!(err.to_string(), r#"{"errors":[{"message":"boom"}]}"#);
    }
}

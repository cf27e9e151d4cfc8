//! Error kinds and error types.

use core::fmt;

/// Coarse classification of every error the engine can produce.
///
/// Only [`ErrorKind::Transport`] is fatal to a connection. Everything else is
/// scoped to the single message or call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O failure, short read, unexpected close, undecodable frame.
    Transport,
    /// A document had the wrong shape, or referenced an unknown id.
    Protocol,
    /// The domain logic behind a command failed.
    Handler,
    /// The operation was canceled before it could complete.
    Canceled,
}

impl ErrorKind {
    /// Wire name, as carried by the `ErrorKind` attribute of a `Response`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
            Self::Handler => "Handler",
            Self::Canceled => "Canceled",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Transport" => Some(Self::Transport),
            "Protocol" => Some(Self::Protocol),
            "Handler" => Some(Self::Handler),
            "Canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport error"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Handler => write!(f, "handler error"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Transport-level errors. Always fatal to the connection that saw them.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds max {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("refusing to send an empty payload")]
    EmptyPayload,

    #[error("invalid frame payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors in the shape or the addressing of a single message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("expected element `{expected}`, found `{found}`")]
    UnexpectedElement { expected: String, found: String },

    #[error("element `{element}` is missing attribute `{attribute}`")]
    MissingAttribute { element: String, attribute: String },

    #[error("element `{element}` is missing child `{child}`")]
    MissingChild { element: String, child: String },

    #[error("element `{element}` has invalid attribute `{attribute}`: {value:?}")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("no pending operation for response id {0}")]
    UnknownResponse(i64),

    #[error("no object registered with id {0}")]
    UnknownObject(i64),

    #[error("object {id} is a {actual}, not a {expected}")]
    WrongObjectType {
        id: i64,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("response was not successful and carried no error")]
    UnsuccessfulResponse,

    #[error("remote protocol error: {0}")]
    Remote(String),
}

/// High-level errors returned by connection operations and remote calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handler failed: {message}")]
    Handler { message: String },

    #[error("canceled")]
    Canceled,
}

impl RpcError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::Canceled => ErrorKind::Canceled,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether this error breaks the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_fatal() {
        assert!(RpcError::Transport(TransportError::Closed).is_fatal());
        assert!(!RpcError::Protocol(ProtocolError::UnknownObject(3)).is_fatal());
        assert!(!RpcError::handler("boom").is_fatal());
        assert!(!RpcError::Canceled.is_fatal());
    }

    #[test]
    fn error_kind_wire_names() {
        for kind in [
            ErrorKind::Transport,
            ErrorKind::Protocol,
            ErrorKind::Handler,
            ErrorKind::Canceled,
        ] {
            assert_eq!(ErrorKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_wire("Bogus"), None);
    }
}

use thiserror::Error;
use tonic::{Code, Status};

/// Errors that can occur while parsing RPC method paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RpcPathError {
    #[error("invalid RPC path: {0}")]
    Invalid(String),
}

/// Errors raised by the metadata builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MetadataError {
    /// `set` or `merge` was asked to write a key that is already present.
    #[error("metadata key '{0}' is already set")]
    DuplicateKey(String),
}

/// Errors reported by a frame transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The peer went away without ending its stream.
    #[error("transport closed")]
    Closed,

    /// A frame could not be parsed or arrived out of order.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A message exceeded the configured size limit.
    #[error("message of {len} bytes exceeds the limit of {limit} bytes")]
    TooLarge { len: usize, limit: usize },

    /// Metadata could not be represented on this transport.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The underlying I/O layer failed.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors that terminate a stream session.
///
/// Once a session records one of these, every later operation on either half
/// of the session fails with a clone of the same error.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The caller used the session in a way its role or call kind forbids.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Cancellation was observed at a suspension point.
    #[error("call cancelled")]
    Cancelled,

    /// The peer closed the call with a non-OK status.
    #[error("call failed with status {code:?}: {message}")]
    Status { code: Code, message: String },

    /// An inbound data frame did not decode as the expected message.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// An outbound message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// A per-frame callback panicked during duplex processing.
    #[error("frame callback panicked: {0}")]
    CallbackPanic(String),

    /// A duplex task could not be joined.
    #[error("duplex task failed: {0}")]
    Join(String),
}

impl SessionError {
    pub fn violation(msg: impl Into<String>) -> Self {
        SessionError::ProtocolViolation(msg.into())
    }

    pub fn from_status(status: &Status) -> Self {
        SessionError::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }

    /// The status code a server reports when a call ends with this error.
    pub fn code(&self) -> Code {
        match self {
            SessionError::Transport(TransportError::Closed) => Code::Unavailable,
            SessionError::Transport(TransportError::TooLarge { .. }) => Code::ResourceExhausted,
            SessionError::Transport(_) => Code::Internal,
            SessionError::ProtocolViolation(_) => Code::Internal,
            SessionError::Cancelled => Code::Cancelled,
            SessionError::Status { code, .. } => *code,
            SessionError::Decode(_) => Code::InvalidArgument,
            SessionError::Encode(_) => Code::Internal,
            SessionError::CallbackPanic(_) => Code::Internal,
            SessionError::Join(_) => Code::Internal,
        }
    }

    /// Whether the error was caused by cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
            || matches!(self, SessionError::Status { code: Code::Cancelled, .. })
    }
}

impl From<SessionError> for Status {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Status { code, message } => Status::new(code, message),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<prost::DecodeError> for SessionError {
    fn from(err: prost::DecodeError) -> Self {
        SessionError::Decode(err.to_string())
    }
}

impl From<prost::EncodeError> for SessionError {
    fn from(err: prost::EncodeError) -> Self {
        SessionError::Encode(err.to_string())
    }
}

/// Errors that can occur while configuring or running the RPC server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcServerError {
    /// Failed to parse an RPC method path.
    #[error(transparent)]
    Path(#[from] RpcPathError),

    /// A handler is already registered for this method.
    #[error("handler already registered for '{0}'")]
    DuplicateMethod(String),
}

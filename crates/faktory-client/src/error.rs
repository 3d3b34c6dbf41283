//! Error taxonomy: [`ProtocolError`] and [`ValidationError`], unified by
//! [`FaktoryError`] for callers that don't need to distinguish them.

use crate::client::State;

/// The server rejected a command, replied unexpectedly, or a command was
/// issued outside the states/roles it is valid for.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("server error: {0}")]
    ServerError(String),
    #[error("unexpected reply: expected {expected}, got {got:?}")]
    UnexpectedReply { expected: String, got: String },
    #[error("unsupported protocol version {0}, only v2 is supported")]
    UnsupportedVersion(i64),
    #[error("command {cmd} is not valid in state {state:?}")]
    InvalidState { cmd: String, state: State },
    #[error("command {cmd} is not valid for role {role:?}")]
    WrongRole { cmd: String, role: crate::client::Role },
    #[error("not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("operation timed out")]
    Timeout,
    #[error("malformed reply payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] faktory_wire::WireError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Constructor arguments failed a bounds or format check.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid role {0:?}, expected one of producer, consumer, both")]
    InvalidRole(String),
    #[error("worker_id must be at least 8 characters, got {0}")]
    WorkerIdTooShort(usize),
    #[error("jobtype must not be empty")]
    EmptyJobtype,
    #[error("queue must not be empty")]
    EmptyQueue,
    #[error("reserve_for must be >= 60 seconds, got {0}")]
    ReserveForTooSmall(i64),
    #[error("retry must be >= -1, got {0}")]
    InvalidRetry(i64),
    #[error("at must be empty or an RFC3339 timestamp, got {0:?}")]
    InvalidAt(String),
    #[error("weights length ({weights}) must equal queues length ({queues})")]
    WeightsQueuesMismatch { weights: usize, queues: usize },
    #[error("priority is weighted but no weights were supplied")]
    MissingWeights,
    #[error("no handler registered for jobtype {0:?}")]
    UnregisteredJobtype(String),
    #[error("password required by server but none was supplied")]
    PasswordRequired,
    #[error("invalid faktory URL: {0}")]
    InvalidUrl(String),
}

/// Unifies [`ProtocolError`] and [`ValidationError`] for call sites that
/// don't care which kind occurred (construction + command dispatch both
/// flow through this at the `Client`/`Producer` boundary).
#[derive(Debug, thiserror::Error)]
pub enum FaktoryError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

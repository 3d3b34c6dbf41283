//! A handler failure, carrying what `FAIL` needs to report it.

/// What a registered handler returns on failure. Captured by the worker
/// task, reported via `FAIL`, and never propagated past the completion
/// callback (it does not implement [`std::process::Termination`] and
/// cannot stop the main loop on its own).
#[derive(Debug, Clone)]
pub struct WorkerError {
    pub errtype: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl WorkerError {
    pub fn new(errtype: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errtype: errtype.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.errtype, self.message)
    }
}

impl std::error::Error for WorkerError {}

/// A fatal condition in the Consumer's main loop itself (as opposed to a
/// single handler failure, which is a [`WorkerError`] reported via `FAIL`).
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Protocol(#[from] faktory_client::ProtocolError),
    #[error("no handler registered for jobtype {0:?}")]
    UnregisteredJobtype(String),
}

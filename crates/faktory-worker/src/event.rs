//! Externally-observable Consumer state, broadcast to subscribers instead
//! of logged, for anything a caller (a TUI, a health check) might want to
//! render.

/// The result of one job's handler execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success,
    Failure { errtype: String, message: String },
}

/// A state change in the Consumer's run loop, broadcast via
/// [`crate::consumer::Consumer::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    Started,
    JobStarted { jid: String, jobtype: String },
    JobFinished {
        jid: String,
        jobtype: String,
        outcome: JobOutcome,
    },
    Warning { message: String },
    Error { message: String },
    StopRequested,
    Stopped,
}

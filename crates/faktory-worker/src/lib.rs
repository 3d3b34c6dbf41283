//! Consumer runtime for the Faktory Work Protocol: queue-priority
//! selection, the fetch loop, the worker pool, and graceful shutdown.
//!
//! Sits on top of [`faktory_client::Client`]; a single `Client` must not
//! be shared between two [`Consumer`]s.

mod consumer;
mod error;
mod event;
mod queue;
mod runtime;
mod shutdown;
mod worker;

pub use consumer::{Consumer, ConsumerConfig, ExceptionHook};
pub use error::{ConsumerError, WorkerError};
pub use event::{ConsumerEvent, JobOutcome};
pub use queue::Priority;
pub use shutdown::{spawn_signal_handler, ShutdownController, ShutdownEvent};

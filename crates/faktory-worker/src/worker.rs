//! A single worker's command loop: receive a job, run its handler in
//! isolation, report completion.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WorkerError;

/// A registered job handler. Runs on a blocking thread so a panic can be
/// caught without poisoning the async runtime.
pub type HandlerFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, WorkerError> + Send + Sync>;

pub enum WorkerCommand {
    Job {
        jid: String,
        jobtype: String,
        args: Vec<Value>,
        handler: HandlerFn,
        backtrace_limit: u32,
    },
    Stop,
}

pub enum WorkerInternalEvent {
    Done {
        worker_idx: usize,
        jid: String,
        jobtype: String,
        backtrace_limit: u32,
        result: Result<Value, WorkerError>,
    },
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

async fn run_job(jobtype: String, args: Vec<Value>, handler: HandlerFn) -> Result<Value, WorkerError> {
    let outcome = tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(AssertUnwindSafe(|| handler(args)))
    })
    .await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(jobtype = %jobtype, %message, "handler panicked, reporting WorkerCrashed");
            Err(WorkerError::new("WorkerCrashed", message))
        }
        Err(join_err) => {
            tracing::error!(jobtype = %jobtype, %join_err, "worker task join error");
            Err(WorkerError::new(
                "WorkerCrashed",
                format!("worker task join error: {join_err}"),
            ))
        }
    }
}

/// Runs on its own tokio task; processes [`WorkerCommand`]s one at a time
/// until [`WorkerCommand::Stop`] or the channel closes.
pub async fn run_worker_task(
    worker_idx: usize,
    mut rx: mpsc::Receiver<WorkerCommand>,
    internal_tx: mpsc::UnboundedSender<WorkerInternalEvent>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WorkerCommand::Stop => break,
            WorkerCommand::Job {
                jid,
                jobtype,
                args,
                handler,
                backtrace_limit,
            } => {
                let result = run_job(jobtype.clone(), args, handler).await;
                let _ = internal_tx.send(WorkerInternalEvent::Done {
                    worker_idx,
                    jid,
                    jobtype,
                    backtrace_limit,
                    result,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_handler_reports_its_value() {
        let handler: HandlerFn = Arc::new(|args| Ok(Value::from(args.len())));
        let result = run_job("echo".to_string(), vec![Value::from(1), Value::from(2)], handler)
            .await
            .unwrap();
        assert_eq!(result, Value::from(2));
    }

    #[tokio::test]
    async fn failing_handler_reports_its_worker_error() {
        let handler: HandlerFn =
            Arc::new(|_args| Err(WorkerError::new("ValueError", "bad input")));
        let err = run_job("adder".to_string(), vec![], handler).await.unwrap_err();
        assert_eq!(err.errtype, "ValueError");
        assert_eq!(err.message, "bad input");
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_worker_crashed() {
        let handler: HandlerFn = Arc::new(|_args| panic!("boom"));
        let err = run_job("adder".to_string(), vec![], handler).await.unwrap_err();
        assert_eq!(err.errtype, "WorkerCrashed");
        assert_eq!(err.message, "boom");
    }
}

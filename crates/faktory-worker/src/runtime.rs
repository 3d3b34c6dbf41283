//! The Consumer's main loop: multiplexes the fetch path, worker
//! completions, and shutdown signals with a single `tokio::select!`,
//! the same shape as a typical tokio-native engine/runtime loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use faktory_client::{Client, State};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::consumer::Consumer;
use crate::error::ConsumerError;
use crate::event::{ConsumerEvent, JobOutcome};
use crate::queue::select_queues;
use crate::shutdown::{spawn_signal_handler, ShutdownController, ShutdownEvent};
use crate::worker::{run_worker_task, HandlerFn, WorkerCommand, WorkerInternalEvent};

const SATURATED_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct ConsumerRuntime {
    client: Client,
    queues: Vec<String>,
    priority: crate::queue::Priority,
    weights: Option<Vec<f64>>,
    handlers: Arc<HashMap<String, HandlerFn>>,
    exception_hook: Option<crate::consumer::ExceptionHook>,
    events: broadcast::Sender<ConsumerEvent>,
    grace_period: Duration,

    worker_cmds: Vec<mpsc::Sender<WorkerCommand>>,
    worker_idle: Vec<bool>,
    worker_join: JoinSet<()>,
    internal_rx: mpsc::UnboundedReceiver<WorkerInternalEvent>,

    pending: Arc<tokio::sync::Mutex<usize>>,
    fetch_task: Option<tokio::task::JoinHandle<Result<Option<faktory_client::Job>, faktory_client::ProtocolError>>>,
    stopping: Option<ConsumerError>,
}

fn spawn_workers(
    concurrency: usize,
) -> (
    Vec<mpsc::Sender<WorkerCommand>>,
    JoinSet<()>,
    mpsc::UnboundedReceiver<WorkerInternalEvent>,
) {
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let mut worker_cmds = Vec::with_capacity(concurrency);
    let mut worker_join = JoinSet::new();
    for worker_idx in 0..concurrency {
        let (tx, rx) = mpsc::channel(1);
        worker_cmds.push(tx);
        let internal_tx = internal_tx.clone();
        worker_join.spawn(run_worker_task(worker_idx, rx, internal_tx));
    }
    (worker_cmds, worker_join, internal_rx)
}

impl ConsumerRuntime {
    pub(crate) fn new(consumer: Consumer) -> Self {
        let (worker_cmds, worker_join, internal_rx) = spawn_workers(consumer.concurrency);
        let concurrency = consumer.concurrency;
        Self {
            client: consumer.client,
            queues: consumer.queues,
            priority: consumer.priority,
            weights: consumer.weights,
            handlers: Arc::new(consumer.handlers),
            exception_hook: consumer.exception_hook,
            events: consumer.events,
            grace_period: consumer.grace_period,
            worker_cmds,
            worker_idle: vec![true; concurrency],
            worker_join,
            internal_rx,
            pending: Arc::new(tokio::sync::Mutex::new(0)),
            fetch_task: None,
            stopping: None,
        }
    }

    fn idle_worker(&self) -> Option<usize> {
        self.worker_idle.iter().position(|&idle| idle)
    }

    fn maybe_start_fetch(&mut self) {
        if self.fetch_task.is_some() || self.idle_worker().is_none() {
            return;
        }
        if self.client.state() != State::Identified {
            return;
        }
        let mut rng = rand::thread_rng();
        let order = select_queues(&self.queues, self.priority, self.weights.as_deref(), &mut rng);
        let client = self.client.clone();
        self.fetch_task = Some(tokio::spawn(async move { client.fetch(&order).await }));
    }

    async fn handle_fetch_result(
        &mut self,
        res: Result<Result<Option<faktory_client::Job>, faktory_client::ProtocolError>, tokio::task::JoinError>,
    ) {
        self.fetch_task = None;
        let job = match res {
            Ok(Ok(Some(job))) => job,
            Ok(Ok(None)) => return,
            Ok(Err(err)) => {
                let _ = self.events.send(ConsumerEvent::Error {
                    message: format!("fetch failed: {err}"),
                });
                self.stopping = Some(ConsumerError::Protocol(err));
                return;
            }
            Err(join_err) => {
                let _ = self.events.send(ConsumerEvent::Error {
                    message: format!("fetch task panicked: {join_err}"),
                });
                return;
            }
        };

        let Some(handler) = self.handlers.get(&job.jobtype).cloned() else {
            let _ = self.events.send(ConsumerEvent::Error {
                message: format!("no handler registered for jobtype {:?}", job.jobtype),
            });
            self.stopping = Some(ConsumerError::UnregisteredJobtype(job.jobtype));
            return;
        };

        let Some(idx) = self.idle_worker() else {
            tracing::warn!("fetched a job with no idle worker available, dropping dispatch");
            return;
        };
        self.worker_idle[idx] = false;
        *self.pending.lock().await += 1;

        let _ = self.events.send(ConsumerEvent::JobStarted {
            jid: job.jid.clone(),
            jobtype: job.jobtype.clone(),
        });
        let cmd = WorkerCommand::Job {
            jid: job.jid,
            jobtype: job.jobtype,
            args: job.args,
            handler,
            backtrace_limit: job.backtrace,
        };
        if self.worker_cmds[idx].send(cmd).await.is_err() {
            self.worker_idle[idx] = true;
            *self.pending.lock().await -= 1;
        }
    }

    async fn handle_internal_event(&mut self, ev: WorkerInternalEvent) {
        let WorkerInternalEvent::Done {
            worker_idx,
            jid,
            jobtype,
            backtrace_limit,
            result,
        } = ev;
        self.worker_idle[worker_idx] = true;
        *self.pending.lock().await -= 1;

        match result {
            Ok(_value) => {
                if let Err(err) = self.client.ack(&jid).await {
                    let _ = self.events.send(ConsumerEvent::Warning {
                        message: format!("ACK failed for {jid}: {err}"),
                    });
                }
                let _ = self.events.send(ConsumerEvent::JobFinished {
                    jid,
                    jobtype,
                    outcome: JobOutcome::Success,
                });
            }
            Err(failure) => {
                if let Some(hook) = &self.exception_hook {
                    hook(&jid, &failure.errtype, &failure.message);
                }
                let backtrace: Vec<String> = failure
                    .backtrace
                    .iter()
                    .take(backtrace_limit as usize)
                    .cloned()
                    .collect();
                if let Err(err) = self
                    .client
                    .fail(&jid, &failure.errtype, &failure.message, backtrace)
                    .await
                {
                    let _ = self.events.send(ConsumerEvent::Warning {
                        message: format!("FAIL failed for {jid}: {err}"),
                    });
                }
                let _ = self.events.send(ConsumerEvent::JobFinished {
                    jid,
                    jobtype,
                    outcome: JobOutcome::Failure {
                        errtype: failure.errtype,
                        message: failure.message,
                    },
                });
            }
        }
    }

    fn handle_shutdown_signal(&mut self, ev: Option<ShutdownEvent>) -> bool {
        match ev {
            Some(ShutdownEvent::Graceful) => {
                let _ = self.events.send(ConsumerEvent::StopRequested);
                true
            }
            Some(ShutdownEvent::Immediate) => std::process::exit(1),
            None => false,
        }
    }

    pub(crate) async fn run(mut self) -> ! {
        let _ = self.events.send(ConsumerEvent::Started);

        let shutdown = Arc::new(ShutdownController::new());
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        spawn_signal_handler(shutdown, shutdown_tx);

        'main: loop {
            let state = self.client.state();
            if !matches!(state, State::Identified | State::Quiet) {
                break;
            }

            if state == State::Quiet {
                tokio::select! {
                    _ = tokio::time::sleep(self.client.beat_period()) => {}
                    ev = shutdown_rx.recv() => {
                        if self.handle_shutdown_signal(ev) { break 'main; }
                    }
                }
                continue;
            }

            self.maybe_start_fetch();

            let idle_worker_available = self.idle_worker().is_some();
            tokio::select! {
                res = async {
                    match self.fetch_task.as_mut() {
                        Some(task) => task.await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.handle_fetch_result(res).await;
                }
                Some(ev) = self.internal_rx.recv() => {
                    self.handle_internal_event(ev).await;
                }
                ev = shutdown_rx.recv() => {
                    if self.handle_shutdown_signal(ev) { break 'main; }
                }
                _ = tokio::time::sleep(SATURATED_POLL_INTERVAL), if !idle_worker_available => {}
            }

            if self.stopping.is_some() {
                break;
            }
        }

        if let Some(err) = &self.stopping {
            let _ = self.events.send(ConsumerEvent::Error {
                message: format!("shutting down due to an error: {err}"),
            });
        }

        for tx in &self.worker_cmds {
            let _ = tx.send(WorkerCommand::Stop).await;
        }
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }

        let grace = tokio::time::sleep(self.grace_period);
        tokio::pin!(grace);
        loop {
            if self.worker_join.is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut grace => break,
                ev = shutdown_rx.recv() => {
                    if matches!(ev, Some(ShutdownEvent::Immediate)) {
                        std::process::exit(1);
                    }
                }
                res = self.worker_join.join_next() => {
                    if res.is_none() { break; }
                }
            }
        }

        let _ = self.events.send(ConsumerEvent::Stopped);
        std::process::exit(1)
    }
}

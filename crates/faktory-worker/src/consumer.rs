//! Public entry point: register handlers on a [`Consumer`], then `run`
//! it. `run` never returns normally (see [`crate::runtime`] for why).

use std::collections::HashMap;
use std::time::Duration;

use faktory_client::{Client, Role, ValidationError};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::WorkerError;
use crate::event::ConsumerEvent;
use crate::queue::Priority;
use crate::runtime::ConsumerRuntime;
use crate::worker::HandlerFn;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 25;
const MAX_GRACE_PERIOD_SECS: u64 = 30;

/// Invoked with `(jid, errtype, message)` before `FAIL` is sent for a
/// failed job. Used to forward failures to an external error reporter.
pub type ExceptionHook = std::sync::Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Construction parameters for [`Consumer::new`].
pub struct ConsumerConfig {
    pub queues: Vec<String>,
    pub priority: Priority,
    pub weights: Option<Vec<f64>>,
    pub concurrency: usize,
    pub grace_period: Duration,
    pub exception_hook: Option<ExceptionHook>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queues: vec!["default".to_string()],
            priority: Priority::Uniform,
            weights: None,
            concurrency: DEFAULT_CONCURRENCY,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            exception_hook: None,
        }
    }
}

/// A worker runtime bound to one [`Client`]. Register handlers with
/// [`Consumer::register`], then consume it with [`Consumer::run`].
pub struct Consumer {
    pub(crate) client: Client,
    pub(crate) queues: Vec<String>,
    pub(crate) priority: Priority,
    pub(crate) weights: Option<Vec<f64>>,
    pub(crate) concurrency: usize,
    pub(crate) grace_period: Duration,
    pub(crate) handlers: HashMap<String, HandlerFn>,
    pub(crate) exception_hook: Option<ExceptionHook>,
    pub(crate) events: broadcast::Sender<ConsumerEvent>,
}

impl Consumer {
    /// Fails if `client`'s role is `producer`, or if `priority` is
    /// `weighted` without matching `weights`.
    pub fn new(client: Client, config: ConsumerConfig) -> Result<Self, ValidationError> {
        if client.role() == Role::Producer {
            return Err(ValidationError::InvalidRole("producer".to_string()));
        }
        if config.priority == Priority::Weighted {
            let weights = config
                .weights
                .as_ref()
                .ok_or(ValidationError::MissingWeights)?;
            if weights.len() != config.queues.len() {
                return Err(ValidationError::WeightsQueuesMismatch {
                    weights: weights.len(),
                    queues: config.queues.len(),
                });
            }
        }

        let grace_period = config
            .grace_period
            .min(Duration::from_secs(MAX_GRACE_PERIOD_SECS));
        let (events, _) = broadcast::channel(1024);

        Ok(Self {
            client,
            queues: config.queues,
            priority: config.priority,
            weights: config.weights,
            concurrency: config.concurrency,
            grace_period,
            handlers: HashMap::new(),
            exception_hook: config.exception_hook,
            events,
        })
    }

    /// Registers `jobtype`'s handler. Must be called for every jobtype
    /// this consumer's queues may deliver before calling [`Consumer::run`]
    /// (an unregistered jobtype fails the loop, not the job).
    pub fn register<F>(&mut self, jobtype: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, WorkerError> + Send + Sync + 'static,
    {
        self.handlers.insert(jobtype.into(), std::sync::Arc::new(handler));
    }

    /// A receiver for this consumer's externally-observable state changes.
    /// Must be called before [`Consumer::run`] to see `Started`.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.events.subscribe()
    }

    /// The order this consumer's queues will be fetched in right now.
    /// Exposed for tests and observability, not consulted by `run` (which
    /// draws a fresh order before every fetch).
    pub fn get_queues(&self) -> Vec<String> {
        let mut rng = rand::thread_rng();
        crate::queue::select_queues(
            &self.queues,
            self.priority,
            self.weights.as_deref(),
            &mut rng,
        )
    }

    /// Runs the fetch/execute/acknowledge loop until the client leaves
    /// `{IDENTIFIED, QUIET}` or a shutdown signal arrives, then performs a
    /// bounded-grace shutdown of the worker pool. Matches the original
    /// implementation's behavior exactly: this call terminates the
    /// process, it never returns control to its caller.
    pub async fn run(self) -> ! {
        ConsumerRuntime::new(self).run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktory_client::ClientConfig;

    fn consumer_client() -> Client {
        Client::new(ClientConfig {
            url: Some("tcp://localhost:7419".to_string()),
            role: Role::Consumer,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn refuses_a_producer_role_client() {
        let client = Client::new(ClientConfig {
            url: Some("tcp://localhost:7419".to_string()),
            role: Role::Producer,
            ..Default::default()
        })
        .unwrap();
        let err = Consumer::new(client, ConsumerConfig::default()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidRole("producer".to_string()));
    }

    #[test]
    fn weighted_priority_requires_matching_weight_count() {
        let client = consumer_client();
        let err = Consumer::new(
            client,
            ConsumerConfig {
                queues: vec!["a".into(), "b".into(), "c".into()],
                priority: Priority::Weighted,
                weights: Some(vec![0.5, 0.5]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::WeightsQueuesMismatch {
                weights: 2,
                queues: 3
            }
        );
    }

    #[test]
    fn weighted_priority_requires_weights() {
        let client = consumer_client();
        let err = Consumer::new(
            client,
            ConsumerConfig {
                priority: Priority::Weighted,
                weights: None,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingWeights);
    }

    #[test]
    fn grace_period_is_capped_at_30_seconds() {
        let client = consumer_client();
        let consumer = Consumer::new(
            client,
            ConsumerConfig {
                grace_period: Duration::from_secs(120),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(consumer.grace_period, Duration::from_secs(30));
    }

    #[test]
    fn strict_priority_get_queues_returns_original_order() {
        let client = consumer_client();
        let consumer = Consumer::new(
            client,
            ConsumerConfig {
                queues: vec!["a".into(), "b".into(), "c".into()],
                priority: Priority::Strict,
                ..Default::default()
            },
        )
        .unwrap();
        for _ in 0..5 {
            assert_eq!(consumer.get_queues(), vec!["a", "b", "c"]);
        }
    }
}

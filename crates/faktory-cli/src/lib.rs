//! Shared CLI wiring for the example producer/consumer binaries: argument
//! parsing and process-wide tracing init. Everything here is explicitly
//! out of scope for the core client/worker crates (it's the thin shell
//! a real deployment wraps around them).

use clap::Parser;
use faktory_client::{Client, ClientConfig, Role};
use faktory_worker::Priority;

/// Arguments shared by `fproducer` and `fconsumer`.
#[derive(Debug, Clone, Parser)]
pub struct CommonArgs {
    /// Faktory server URL, e.g. `tcp://localhost:7419`. Falls back to
    /// `FAKTORY_URL`, then `tcp://localhost:7419`.
    #[arg(long, env = "FAKTORY_URL")]
    pub faktory_url: Option<String>,
}

/// Arguments specific to `fconsumer`.
#[derive(Debug, Clone, Parser)]
pub struct ConsumerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Queues to fetch from, in priority order.
    #[arg(long, env = "FAKTORY_QUEUES", value_delimiter = ',', default_value = "default")]
    pub queues: Vec<String>,

    /// Queue selection policy.
    #[arg(long, env = "FAKTORY_PRIORITY", value_enum, default_value_t = PriorityArg::Uniform)]
    pub priority: PriorityArg,

    /// Relative weights for `--priority weighted`, comma-separated,
    /// same length as `--queues`.
    #[arg(long, env = "FAKTORY_WEIGHTS", value_delimiter = ',')]
    pub weights: Option<Vec<f64>>,

    /// Number of jobs to run concurrently.
    #[arg(long, env = "FAKTORY_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Seconds to let in-flight jobs finish after a shutdown signal.
    #[arg(long, env = "FAKTORY_GRACE_PERIOD_SECS", default_value_t = 25)]
    pub grace_period_secs: u64,

    /// Stable worker identity reported to the server; random if omitted.
    #[arg(long, env = "FAKTORY_WORKER_ID")]
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PriorityArg {
    Strict,
    Uniform,
    Weighted,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Strict => Priority::Strict,
            PriorityArg::Uniform => Priority::Uniform,
            PriorityArg::Weighted => Priority::Weighted,
        }
    }
}

/// Installs the process-wide `tracing` subscriber, honoring `RUST_LOG`
/// and defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Builds a [`Client`] for `role` from `common`'s `--faktory-url`.
pub fn build_client(common: &CommonArgs, role: Role, worker_id: Option<String>) -> anyhow::Result<Client> {
    let client = Client::new(ClientConfig {
        url: common.faktory_url.clone(),
        role,
        worker_id,
        ..Default::default()
    })?;
    Ok(client)
}

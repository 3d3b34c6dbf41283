//! Example consumer: registers an `adder` handler and runs it, mirroring
//! `original_source/examples/fconsumer.py`. `Consumer::run` never
//! returns; shutdown is via the process exit codes it performs itself.

use clap::Parser;
use faktory_client::Role;
use faktory_cli::{build_client, init_tracing, ConsumerArgs};
use faktory_worker::{Consumer, ConsumerConfig, WorkerError};
use serde_json::Value;

fn adder(args: Vec<Value>) -> Result<Value, WorkerError> {
    let mut it = args.into_iter();
    let x = it
        .next()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| WorkerError::new("ValueError", "adder expects two integer arguments"))?;
    let y = it
        .next()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| WorkerError::new("ValueError", "adder expects two integer arguments"))?;
    tracing::info!(x, y, sum = x + y, "adder");
    Ok(Value::Null)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = ConsumerArgs::parse();

    let client = build_client(&args.common, Role::Consumer, args.worker_id)?;
    client.connect().await?;

    let mut consumer = Consumer::new(
        client,
        ConsumerConfig {
            queues: args.queues,
            priority: args.priority.into(),
            weights: args.weights,
            concurrency: args.concurrency,
            grace_period: std::time::Duration::from_secs(args.grace_period_secs),
            exception_hook: None,
        },
    )?;
    consumer.register("adder", adder);

    tracing::info!("fconsumer started");
    consumer.run().await
}

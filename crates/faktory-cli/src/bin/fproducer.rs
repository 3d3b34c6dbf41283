//! Example producer: pushes an `adder` job with two random integers once
//! a second, mirroring `original_source/examples/fproducer.py`.

use clap::Parser;
use faktory_client::{Job, Producer, Role};
use faktory_cli::{build_client, init_tracing, CommonArgs};
use rand::Rng;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CommonArgs::parse();

    let client = build_client(&args, Role::Producer, None)?;
    client.connect().await?;
    let producer = Producer::new(&client)?;

    tracing::info!("fproducer started");
    loop {
        let (x, y) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..1000), rng.gen_range(0..1000))
        };
        let job = Job::builder("adder", vec![x.into(), y.into()]).build()?;
        producer.push(&job).await?;
        tracing::info!(jid = %job.jid, x, y, "pushed job");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

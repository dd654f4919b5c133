//! Runs a small batch of jobs through the orchestrator, then a staged pipeline,
//! and prints the results and final signals.
//!
//! Configuration comes from the YAML file named by `TASK_CORE_CONFIG` (optional)
//! plus the `TASK_CORE_*` overrides. Log verbosity follows `RUST_LOG`.

use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;
use task_core::pipeline::{self, stage::Map, stage::ParallelMap, Pipeline};
use task_core::{CoreConfig, Job, Orchestrator};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .with_target(false)
        .init();

    let config_path = std::env::var_os("TASK_CORE_CONFIG").map(PathBuf::from);
    let cfg = CoreConfig::load(config_path.as_deref()).context("loading configuration")?;
    println!("configuration:\n{}", serde_yaml::to_string(&cfg)?);

    run_jobs(&cfg).await?;
    run_pipeline().await;
    Ok(())
}

async fn run_jobs(cfg: &CoreConfig) -> anyhow::Result<()> {
    println!("=== Worker pool ===");
    let orch = Orchestrator::<String>::from_config(cfg)?;
    let mut results = orch.results().context("results receiver already taken")?;
    orch.start()?;

    let collector = tokio::spawn(async move {
        let mut lines = Vec::new();
        while let Some(r) = results.recv().await {
            let line = match &r.outcome {
                Ok(out) => format!("job {} on worker {}: {}", r.job_id, r.worker_id, out),
                Err(err) => format!("job {} on worker {}: error: {}", r.job_id, r.worker_id, err),
            };
            lines.push(line);
        }
        lines
    });

    let cancel = CancellationToken::new();
    for id in 1..=5u64 {
        let job = Job::new(id, id, |n: u64| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if n == 4 {
                anyhow::bail!("job {} rejected its input", n);
            }
            Ok(format!("{} squared is {}", n, n * n))
        });
        if let Err(err) = orch.submit_wait(job, &cancel).await {
            println!("job {} not admitted: {}", id, err);
        }
    }

    orch.shutdown().await;
    let mut lines = collector.await?;
    lines.sort();
    for line in lines {
        println!("{}", line);
    }
    println!("signals: {}", serde_json::to_string_pretty(&orch.signals())?);
    Ok(())
}

async fn run_pipeline() {
    println!("=== Pipeline ===");
    let pipeline = Pipeline::new()
        .with_stage(Map::new(|x: u64| async move { x + 1 }))
        .with_stage(ParallelMap::new(3, |x: u64| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            x * x
        }))
        .with_stage(Map::new(|x: u64| async move { x % 1_000 }));

    let mut out = pipeline.execute(pipeline::source(0..10u64, 4));
    let mut seen = Vec::new();
    while let Some(x) = out.recv().await {
        seen.push(x);
    }
    seen.sort_unstable();
    println!("pipeline output: {:?}", seen);
}

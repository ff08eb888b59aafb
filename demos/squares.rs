//! Squaring numbers through linear, fanned-out and cancelled pipelines
//!
//! Run with: cargo run --example squares
//! Set RUST_LOG=pipeweld=debug to watch stages start and stop.

use std::time::Duration;

use pipeweld::prelude::*;
use tracing_subscriber::EnvFilter;

fn square(n: u64) -> u64 {
    n * n
}

/// Example 1: source -> transform, order preserved
async fn linear_example() -> Result<()> {
    println!("=== Linear ===");

    let (pipeline, _token) = Pipeline::new();
    let squares = pipeline.transform(pipeline.source(vec![2, 3]), square);
    while let Some(n) = squares.recv().await {
        println!("{n}");
    }

    pipeline.join().await?;
    println!();
    Ok(())
}

/// Example 2: two workers share the squaring, merged back into one channel
async fn fan_out_example() -> Result<()> {
    println!("=== Fan-out / merge ===");

    let (pipeline, _token) = Pipeline::new();
    let branches = pipeline.fan_out(pipeline.source(1..=8), square, 2);
    let merged = pipeline.merge(branches);
    let mut out = merged.drain().await;
    out.sort_unstable();
    println!("{out:?}");

    pipeline.join().await?;
    println!();
    Ok(())
}

/// Example 3: take one value from an endless source, then stop everything
async fn cancel_example() -> Result<()> {
    println!("=== Early cancellation ===");

    let config = PipelineConfig::default()
        .name("endless")
        .shutdown_grace(Duration::from_millis(100));
    let (pipeline, token) = Pipeline::with_config(config)?;
    let merged = pipeline.parallel(pipeline.source(1u64..), square, 4);

    if let Some(first) = merged.recv().await {
        println!("first value: {first}");
    }
    token.fire();
    pipeline.shutdown().await?;
    println!("stages still running: {}", pipeline.active_stages());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    linear_example().await?;
    fan_out_example().await?;
    cancel_example().await?;
    Ok(())
}

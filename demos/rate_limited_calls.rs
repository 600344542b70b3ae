//! Drive a simulated rate-limited service through the batch processor.
//!
//! Run with `RUST_LOG=batchflow=debug cargo run --example rate_limited_calls`.

use std::time::Duration;

use batchflow::batch::{BatchOptions, BatchProcessor};
use batchflow::resilience::{retry, RetryPolicy};
use tracing_subscriber::EnvFilter;

/// Pretend remote call that rejects every seventh request once
async fn submit(record: u32, attempt: u32) -> Result<String, String> {
    tokio::time::sleep(Duration::from_millis(25)).await;
    if record.is_multiple_of(7) && attempt == 1 {
        Err(format!("record {record}: 429 Too Many Requests"))
    } else if record == 13 {
        Err(format!("record {record}: 400 Bad Request"))
    } else {
        Ok(format!("request-{record:04}"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("batchflow=info")),
        )
        .init();

    let policy = RetryPolicy::new(3, Duration::from_millis(50))?.with_jitter(true);

    let options = BatchOptions::new(5)
        .with_concurrency(3)
        .with_delay(Duration::from_millis(100))
        .with_progress_callback(|done, total| println!("progress: {done}/{total}"))
        .with_error_callback(|err, record: &u32, index| {
            eprintln!("record {record} at {index} failed: {err}");
        });

    let processor = BatchProcessor::new(
        move |record: u32, _index: usize| {
            let policy = policy.clone();
            async move {
                let mut attempt = 0;
                retry(
                    || {
                        attempt += 1;
                        submit(record, attempt)
                    },
                    &policy,
                )
                .await
            }
        },
        options,
    )?;

    let records: Vec<u32> = (1..=30).collect();
    let report = processor.process_with_report(&records).await?;

    println!(
        "run {}: {} succeeded, {} failed in {:?}",
        report.stats.run_id, report.stats.succeeded, report.stats.failed, report.stats.duration
    );

    Ok(())
}

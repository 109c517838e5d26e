//! Redline Worker
//!
//! Drains the processing queue:
//! 1. Claims pending extraction tasks
//! 2. Reads the stored file and extracts its text
//! 3. Records the text on the document and resolves the task
//!
//! `worker once` runs a single drain pass and prints its report.

mod errors;
mod extractors;
mod pdf;

use crate::extractors::ExtensionExtractor;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use redline_common::{
    config::AppConfig,
    db::Backend,
    metrics::{self, COMPARISON_BUCKETS, EXTRACTION_BUCKETS, METRICS_PREFIX},
    services::QueueProcessor,
    storage::LocalBlobStore,
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Consecutive failed passes before the worker pauses
const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config);

    info!(service = %config.observability.service_name, "Starting Redline Worker v{}", VERSION);

    if config.observability.metrics_port != 0 {
        install_metrics(config.observability.metrics_port)?;
    }

    let backend = Backend::from_config(&config).await?;
    info!(backend = backend.name(), "Storage backend selected");

    let blobs = Arc::new(LocalBlobStore::new(config.storage.blob_dir.clone()));
    let processor = QueueProcessor::new(
        backend,
        config.queue.max_attempts,
        blobs,
        Arc::new(ExtensionExtractor::new()),
    );

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("once") {
        let report = processor.drain(config.queue.batch_size).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        batch_size = config.queue.batch_size,
        poll_interval_ms = config.queue.poll_interval_ms,
        "Worker ready, draining queue"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut consecutive_failures = 0;

    loop {
        let pause = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            result = processor.drain(config.queue.batch_size) => match result {
                Ok(report) => {
                    consecutive_failures = 0;
                    // A full batch means more work is likely waiting
                    if report.claimed < config.queue.batch_size {
                        config.poll_interval()
                    } else {
                        Duration::ZERO
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        error = %e,
                        failures = consecutive_failures,
                        "Drain pass failed"
                    );
                    if consecutive_failures >= MAX_FAILURES {
                        warn!(
                            failures = consecutive_failures,
                            "Circuit breaker open, pausing..."
                        );
                        consecutive_failures = 0;
                        CIRCUIT_BREAK_DURATION
                    } else {
                        config.poll_interval()
                    }
                }
            },
        };

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("Worker shutting down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_extraction_duration_seconds", METRICS_PREFIX)),
            EXTRACTION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_comparison_duration_seconds", METRICS_PREFIX)),
            COMPARISON_BUCKETS,
        )?
        .install()?;

    metrics::register_metrics();
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

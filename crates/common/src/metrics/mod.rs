//! Metrics and observability utilities
//!
//! Counters and histograms for uploads, the processing queue and
//! comparisons, published through the `metrics` facade. The worker binary
//! installs the Prometheus exporter.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Redline metrics
pub const METRICS_PREFIX: &str = "redline";

/// Buckets for text extraction latency (in seconds)
pub const EXTRACTION_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for comparison latency (external model calls are slow)
pub const COMPARISON_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Document metrics
    describe_counter!(
        format!("{}_documents_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents stored"
    );

    describe_counter!(
        format!("{}_dedup_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Uploads resolved to an existing document by content hash"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_queue_enqueued_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue items created"
    );

    describe_counter!(
        format!("{}_queue_claims_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue items claimed"
    );

    describe_counter!(
        format!("{}_queue_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue items completed"
    );

    describe_counter!(
        format!("{}_queue_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Failed queue items returned to pending"
    );

    describe_counter!(
        format!("{}_queue_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Queue items that exhausted their attempts"
    );

    // Extraction metrics
    describe_histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Text extraction latency in seconds"
    );

    describe_counter!(
        format!("{}_extracted_chars_total", METRICS_PREFIX),
        Unit::Count,
        "Characters of text extracted"
    );

    // Comparison metrics
    describe_counter!(
        format!("{}_comparisons_total", METRICS_PREFIX),
        Unit::Count,
        "Total comparisons run"
    );

    describe_histogram!(
        format!("{}_comparison_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Comparison latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Times one unit of work from creation to `elapsed_secs`
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

pub fn record_document_created() {
    counter!(format!("{}_documents_created_total", METRICS_PREFIX)).increment(1);
}

pub fn record_dedup_hit() {
    counter!(format!("{}_dedup_hits_total", METRICS_PREFIX)).increment(1);
}

pub fn record_queue_enqueued(task_type: &str) {
    counter!(
        format!("{}_queue_enqueued_total", METRICS_PREFIX),
        "task" => task_type.to_string()
    )
    .increment(1);
}

pub fn record_queue_claimed(task_type: &str) {
    counter!(
        format!("{}_queue_claims_total", METRICS_PREFIX),
        "task" => task_type.to_string()
    )
    .increment(1);
}

pub fn record_queue_completed(task_type: &str) {
    counter!(
        format!("{}_queue_completed_total", METRICS_PREFIX),
        "task" => task_type.to_string()
    )
    .increment(1);
}

pub fn record_queue_retried(task_type: &str) {
    counter!(
        format!("{}_queue_retries_total", METRICS_PREFIX),
        "task" => task_type.to_string()
    )
    .increment(1);
}

pub fn record_queue_failed(task_type: &str) {
    counter!(
        format!("{}_queue_failed_total", METRICS_PREFIX),
        "task" => task_type.to_string()
    )
    .increment(1);
}

/// Helper to record extraction metrics
pub fn record_extraction(duration_secs: f64, chars: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX),
        "status" => status
    )
    .record(duration_secs);

    if success {
        counter!(format!("{}_extracted_chars_total", METRICS_PREFIX)).increment(chars as u64);
    }
}

/// Helper to record comparison metrics
pub fn record_comparison(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_comparisons_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_comparison_duration_seconds", METRICS_PREFIX),
        "status" => status
    )
    .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [EXTRACTION_BUCKETS, COMPARISON_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_helpers_run_without_recorder() {
        let timer = StageTimer::start();
        record_comparison(timer.elapsed_secs(), true);
        record_extraction(0.01, 120, false);
        record_queue_claimed("extract_text");
        assert!(timer.elapsed_secs() >= 0.0);
    }
}

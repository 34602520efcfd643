//! Prometheus metrics for the Silo server.
//!
//! Exposes metrics for node reads, streamed bytes, preauth tokens and the
//! health of the primary document store.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no node IDs, usernames or file names, but they do expose
//! aggregate usage. Restrict the endpoint to scraper IPs at the
//! infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Read path
pub static NODE_READS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_node_reads_total", "Total node reads by request intent"),
        &["intent"],
    )
    .expect("metric creation failed")
});

pub static BYTES_STREAMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_bytes_streamed_total",
        "Total payload bytes handed to response bodies (before content filters)",
    )
    .expect("metric creation failed")
});

pub static SNAPSHOT_FALLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_snapshot_fallbacks_total",
        "Total reads served from an on-disk snapshot because the document store was unavailable",
    )
    .expect("metric creation failed")
});

pub static REGION_FILTER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_region_filter_failures_total",
        "Total external region filter runs that failed",
    )
    .expect("metric creation failed")
});

// Preauth
pub static PREAUTH_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("silo_preauth_issued_total", "Total preauth tokens issued")
        .expect("metric creation failed")
});

pub static PREAUTH_REDEEMED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "silo_preauth_redeemed_total",
            "Total preauth redemption attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

// Writes
pub static NODE_WRITE_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_node_write_conflicts_total",
        "Total optimistic version conflicts hit while saving nodes (ACL and index updates)",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "silo_upload_duration_seconds",
            "Time taken to receive and store a node payload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests or when embedding multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(NODE_READS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STREAMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SNAPSHOT_FALLBACKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REGION_FILTER_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PREAUTH_ISSUED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PREAUTH_REDEEMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(NODE_WRITE_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a node read under its intent label.
pub fn record_node_read(intent: &str) {
    NODE_READS.with_label_values(&[intent]).inc();
}

/// Count a preauth redemption attempt under its outcome label.
pub fn record_preauth_redeem(outcome: &str) {
    PREAUTH_REDEEMED.with_label_values(&[outcome]).inc();
}

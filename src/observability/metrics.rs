//! # Metrics
//!
//! Prometheus metrics for monitoring the platform controllers.
//!
//! ## Metrics Exposed
//!
//! - `platform_reconciliations_total{controller}` - reconciliations per controller
//! - `platform_reconciliation_errors_total{controller,kind}` - errors by taxonomy
//! - `platform_reconciliation_duration_seconds{controller}` - reconcile duration
//! - `platform_git_pushes_total` - pushes to the managed git server
//! - `platform_repositories_managed` - GitRepository objects currently synced

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "platform_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "platform_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["controller", "kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "platform_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static GIT_PUSHES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "platform_git_pushes_total",
        "Total number of pushes to the managed git server",
    )
    .expect("Failed to create GIT_PUSHES_TOTAL metric - this should never happen")
});

static REPOSITORIES_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "platform_repositories_managed",
        "Number of GitRepository objects currently reporting synced",
    )
    .expect("Failed to create REPOSITORIES_MANAGED metric - this should never happen")
});

/// Register all metrics with the registry. Called once at startup.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(GIT_PUSHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REPOSITORIES_MANAGED.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(controller: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[controller]).inc();
}

pub fn increment_reconciliation_errors(controller: &str, kind: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[controller, kind])
        .inc();
}

pub fn observe_reconciliation_duration(controller: &str, seconds: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[controller])
        .observe(seconds);
}

pub fn increment_git_pushes() {
    GIT_PUSHES_TOTAL.inc();
}

pub fn set_repositories_managed(count: i64) {
    REPOSITORIES_MANAGED.set(count);
}

//! Prometheus metrics for batches, deliveries and errors.
//!
//! The recorder is installed once per process; `MetricsRegistry::global()`
//! renders whatever has been recorded so far for `GET /metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global metrics registry.
static METRICS_REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Histogram buckets for batch apply durations (seconds).
const APPLY_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub const BATCHES_TOTAL: &str = "follow_batches_total";
pub const BATCH_SIZE: &str = "follow_batch_size";
pub const BATCH_APPLY_SECONDS: &str = "follow_batch_apply_duration_seconds";
pub const STALE_EVENTS_TOTAL: &str = "follow_stale_events_total";
pub const GAP_FILLS_TOTAL: &str = "follow_gap_fills_total";
pub const EVENTS_APPLIED_TOTAL: &str = "follow_events_applied_total";
pub const CHANNEL_REJECTIONS_TOTAL: &str = "follow_channel_rejections_total";
pub const ACTIVE_FOLLOWERS: &str = "follow_active_followers";

/// Central metrics registry.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Get the global metrics registry.
    ///
    /// Renders nothing until `init_metrics` has installed a recorder.
    pub fn global() -> &'static MetricsRegistry {
        METRICS_REGISTRY.get_or_init(|| MetricsRegistry {
            prometheus_handle: None,
        })
    }

    /// Whether a recorder backs this registry.
    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics(service_name: &str) -> anyhow::Result<&'static MetricsRegistry> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(BATCH_APPLY_SECONDS.to_string()),
            APPLY_DURATION_BUCKETS,
        )?
        .install_recorder()?;

    register_metric_descriptions();

    if METRICS_REGISTRY
        .set(MetricsRegistry {
            prometheus_handle: Some(handle),
        })
        .is_err()
    {
        anyhow::bail!("metrics registry already initialized");
    }

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry::global())
}

fn register_metric_descriptions() {
    describe_counter!(BATCHES_TOTAL, "Batches reconciled, labelled by outcome");
    describe_histogram!(BATCH_SIZE, "Pending items drained per batch");
    describe_histogram!(
        BATCH_APPLY_SECONDS,
        "Time spent applying the unprocessed buffer of one batch"
    );
    describe_counter!(
        STALE_EVENTS_TOTAL,
        "Events skipped because their version was already applied"
    );
    describe_counter!(
        GAP_FILLS_TOTAL,
        "Batches that were replaced by a contiguous range from the event store"
    );
    describe_counter!(EVENTS_APPLIED_TOTAL, "Events committed to follower state");
    describe_counter!(
        CHANNEL_REJECTIONS_TOTAL,
        "Producer writes rejected by a closed or full channel"
    );
    describe_gauge!(ACTIVE_FOLLOWERS, "Followers currently activated");
    describe_counter!("follow_errors_total", "Errors by code and category");
}

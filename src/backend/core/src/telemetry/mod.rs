//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use follow_core::config::ObservabilityConfig;
//! use follow_core::telemetry::init_telemetry;
//!
//! init_telemetry("follow-server", &ObservabilityConfig::default())
//!     .expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, MetricsRegistry};

use crate::config::ObservabilityConfig;

/// Initialize logging and, when enabled, the metrics recorder.
pub fn init_telemetry(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    init_logging(&config.log_level, config.log_format)?;

    if config.metrics_enabled {
        init_metrics(service_name)?;
    }

    Ok(())
}

//! # Metrics
//!
//! Prometheus metrics for monitoring the sync loop.
//!
//! ## Metrics Exposed
//!
//! - `tls_secret_sync_success_count` - Iterations where fetch and every sync target succeeded
//! - `tls_secret_sync_error_count` - Iterations where fetch or at least one sync target failed
//! - `tls_secret_sync_iteration_duration_seconds` - Duration of one iteration
//!
//! The counters are created at zero and registered at startup, so a scrape
//! before the first iteration already reports both of them.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::LazyLock;

/// Process-wide registry served on `/metrics`
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Outcome counters of the reconciliation loop
///
/// Cloning shares the underlying collectors.
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    success: IntCounter,
    errors: IntCounter,
    duration: Histogram,
}

impl SyncMetrics {
    /// Create unregistered collectors, all at zero
    ///
    /// # Errors
    /// Fails only if a metric name or bucket layout is invalid.
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            success: IntCounter::new(
                "tls_secret_sync_success_count",
                "Number of successful tls secret sync iterations",
            )?,
            errors: IntCounter::new(
                "tls_secret_sync_error_count",
                "Number of failed tls secret sync iterations",
            )?,
            duration: Histogram::with_opts(
                HistogramOpts::new(
                    "tls_secret_sync_iteration_duration_seconds",
                    "Duration of one tls secret sync iteration in seconds",
                )
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            )?,
        })
    }

    /// Register every collector on `registry`
    ///
    /// # Errors
    /// Fails if a collector with the same name is already registered.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.success.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.duration.clone()))?;
        Ok(())
    }

    pub fn record_success(&self) {
        self.success.inc();
    }

    pub fn record_error(&self) {
        self.errors.inc();
    }

    pub fn observe_duration(&self, seconds: f64) {
        self.duration.observe(seconds);
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.get()
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }
}

//! # Observability
//!
//! - `metrics`: Prometheus counters for sync outcomes

pub mod metrics;

pub use metrics::*;

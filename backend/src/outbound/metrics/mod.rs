//! Outbound adapters for metrics exporting.
//!
//! Prometheus-backed implementations of domain metrics ports, feature-gated
//! behind the `metrics` feature.

mod prometheus_reliability;

pub use prometheus_reliability::PrometheusReliabilityMetrics;

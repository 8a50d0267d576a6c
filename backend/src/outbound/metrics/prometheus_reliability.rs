//! Prometheus adapter for reliability outcome metrics.
//!
//! Outcomes are registered with a provided registry and exposed through the
//! `/metrics` endpoint alongside the HTTP middleware metrics.

use prometheus::{IntCounterVec, Opts, Registry};

use crate::domain::ports::{ReliabilityMetrics, ReliabilityOutcome};

/// Prometheus-backed reliability metrics recorder.
///
/// # Exported metrics
///
/// - **Name**: `clinic_reliability_outcomes_total`
/// - **Type**: Counter
/// - **Labels**:
///   - `component`: `idempotency`, `rate_limit`, `lock`, or `outbox`
///   - `outcome`: component-specific, e.g. `replay`, `rejected`, `timeout`,
///     `publish_failed`
pub struct PrometheusReliabilityMetrics {
    outcomes_total: IntCounterVec,
}

impl PrometheusReliabilityMetrics {
    /// Create and register metrics with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric cannot be registered (e.g., if a metric
    /// with the same name already exists in the registry).
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let outcomes_total = IntCounterVec::new(
            Opts::new(
                "clinic_reliability_outcomes_total",
                "Coordination component decisions by outcome",
            ),
            &["component", "outcome"],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;
        Ok(Self { outcomes_total })
    }
}

impl ReliabilityMetrics for PrometheusReliabilityMetrics {
    fn record(&self, outcome: ReliabilityOutcome) {
        self.outcomes_total
            .with_label_values(&[outcome.component(), outcome.outcome()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_metric_with_registry() {
        let registry = Registry::new();
        let metrics = PrometheusReliabilityMetrics::new(&registry)
            .expect("metric registration should succeed");
        metrics.record(ReliabilityOutcome::LockAcquired);

        let families = registry.gather();
        assert!(
            families
                .iter()
                .any(|f| f.name() == "clinic_reliability_outcomes_total"),
            "metric should be registered"
        );
    }

    #[test]
    fn counts_outcomes_per_label_pair() {
        let registry = Registry::new();
        let metrics = PrometheusReliabilityMetrics::new(&registry)
            .expect("metric registration should succeed");

        metrics.record(ReliabilityOutcome::RateLimitRejected);
        metrics.record(ReliabilityOutcome::RateLimitRejected);
        metrics.record(ReliabilityOutcome::RateLimitAdmitted);

        let rejected = metrics
            .outcomes_total
            .with_label_values(&["rate_limit", "rejected"]);
        let admitted = metrics
            .outcomes_total
            .with_label_values(&["rate_limit", "admitted"]);
        assert_eq!(rejected.get(), 2);
        assert_eq!(admitted.get(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        PrometheusReliabilityMetrics::new(&registry).expect("first registration");
        assert!(PrometheusReliabilityMetrics::new(&registry).is_err());
    }
}

//! Observability sink for authorization decisions.
//!
//! Filters receive an `Arc<dyn AuthzStats>` and report each decision point
//! through it; there are no ambient counters.

use std::fmt;

/// A decision point worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsEvent {
    /// The service authorized the request.
    Ok,
    /// The service denied the request.
    Denied,
    /// The service could not be queried.
    Error,
    /// An `Error` was let through because the filter is fail-open.
    FailureModeAllowed,
}

impl StatsEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            StatsEvent::Ok => "ok",
            StatsEvent::Denied => "denied",
            StatsEvent::Error => "error",
            StatsEvent::FailureModeAllowed => "failure_mode_allowed",
        }
    }
}

impl fmt::Display for StatsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives decision events.
///
/// `target` is the cluster the request was routed to (HTTP) or the filter's
/// stat prefix (TCP).
pub trait AuthzStats: Send + Sync {
    fn record(&self, target: &str, event: StatsEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl AuthzStats for NoopStats {
    fn record(&self, _target: &str, _event: StatsEvent) {}
}

#[cfg(feature = "metrics")]
pub use prometheus_stats::PrometheusStats;

#[cfg(feature = "metrics")]
mod prometheus_stats {
    use prometheus::{IntCounterVec, Opts, Registry};

    use super::{AuthzStats, StatsEvent};

    /// Counts events in `ext_authz_checks_total{target, outcome}`.
    #[derive(Debug, Clone)]
    pub struct PrometheusStats {
        checks: IntCounterVec,
    }

    impl PrometheusStats {
        /// Registers the counter on `registry`.
        pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
            let checks = IntCounterVec::new(
                Opts::new(
                    "ext_authz_checks_total",
                    "External authorization decisions by target and outcome",
                ),
                &["target", "outcome"],
            )?;
            registry.register(Box::new(checks.clone()))?;
            Ok(Self { checks })
        }

        /// Current count for `target`/`event`.
        pub fn get(&self, target: &str, event: StatsEvent) -> u64 {
            self.checks.with_label_values(&[target, event.as_str()]).get()
        }
    }

    impl AuthzStats for PrometheusStats {
        fn record(&self, target: &str, event: StatsEvent) {
            self.checks.with_label_values(&[target, event.as_str()]).inc();
        }
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_prometheus_stats_counts_per_target() {
        let registry = Registry::new();
        let stats = PrometheusStats::new(&registry).unwrap();

        stats.record("authz", StatsEvent::Error);
        stats.record("authz", StatsEvent::FailureModeAllowed);
        stats.record("authz", StatsEvent::Error);
        stats.record("other", StatsEvent::Ok);

        assert_eq!(stats.get("authz", StatsEvent::Error), 2);
        assert_eq!(stats.get("authz", StatsEvent::FailureModeAllowed), 1);
        assert_eq!(stats.get("authz", StatsEvent::Ok), 0);
        assert_eq!(stats.get("other", StatsEvent::Ok), 1);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusStats::new(&registry).unwrap();
        assert!(PrometheusStats::new(&registry).is_err());
    }
}

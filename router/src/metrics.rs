use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Counters for the admission gate.
#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    pub(crate) admitted: Counter,
    pub(crate) throttled: Counter,
    pub(crate) rejected: Counter,
}

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "admitted_requests",
            "Count of invocations admitted by the rate limiter",
            metrics.admitted.clone(),
        );
        prom.register(
            "throttled_requests",
            "Count of invocations rejected over budget",
            metrics.throttled.clone(),
        );
        prom.register(
            "rejected_requests",
            "Count of invocations with no usable rate limiter",
            metrics.rejected.clone(),
        );
        metrics
    }
}

/// Counters for the forwarding gateway.
#[derive(Clone, Debug, Default)]
pub struct GatewayMetrics {
    pub(crate) resolve_errors: Counter,
}

impl GatewayMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "resolve_errors",
            "Count of invocations that failed backend resolution",
            metrics.resolve_errors.clone(),
        );
        metrics
    }
}

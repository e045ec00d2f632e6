use crate::{
    fetcher::ServiceFetcher,
    function::FunctionRef,
    lister::{PodLister, PodMetricsClient},
    refresh::{spawn_refresher, LEAST_USAGE_REFRESH, POWER_OF_TWO_REFRESH},
};
use faas_router_core::{
    balance::{
        LeastCpu, LeastMem, LoadBalancer, Policy, PowerOfTwoCpu, Random, RoundRobin,
        WeightedRoundRobin,
    },
    usage,
};
use std::sync::Arc;
use tracing::debug;

/// Constructs the load balancer for `policy`, normalizing an unrecognized
/// tag to round robin. Metrics-aware balancers take ownership of a freshly
/// spawned usage refresher for their function's pods.
pub(crate) fn new_balancer(
    policy: &str,
    fetcher: ServiceFetcher,
    function: &FunctionRef,
    pods: &Arc<dyn PodLister>,
    metrics: &Arc<dyn PodMetricsClient>,
) -> Arc<dyn LoadBalancer> {
    let policy = policy.parse::<Policy>().unwrap_or_else(|error| {
        debug!(%function, %error, "using fallback policy");
        Policy::default()
    });

    match policy {
        Policy::RoundRobin => Arc::new(RoundRobin::new(fetcher)),
        Policy::Random => Arc::new(Random::new(fetcher)),
        Policy::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new(fetcher)),
        Policy::LeastCpu => {
            let (writer, reader) = usage::pair();
            let guard = spawn_refresher(
                function.clone(),
                pods.clone(),
                metrics.clone(),
                writer,
                LEAST_USAGE_REFRESH,
            );
            Arc::new(LeastCpu::new(fetcher, reader, Some(guard)))
        }
        Policy::LeastMem => {
            let (writer, reader) = usage::pair();
            let guard = spawn_refresher(
                function.clone(),
                pods.clone(),
                metrics.clone(),
                writer,
                LEAST_USAGE_REFRESH,
            );
            Arc::new(LeastMem::new(fetcher, reader, Some(guard)))
        }
        Policy::PowerOfTwoCpu => {
            let (writer, reader) = usage::pair();
            let guard = spawn_refresher(
                function.clone(),
                pods.clone(),
                metrics.clone(),
                writer,
                POWER_OF_TWO_REFRESH,
            );
            Arc::new(PowerOfTwoCpu::new(fetcher, reader, Some(guard)))
        }
    }
}

use crate::{
    function::{function_selector, FunctionRef},
    lister::{PodLister, PodMetricsClient},
};
use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use faas_router_core::{
    balance::RefreshGuard,
    quantity::Quantity,
    usage::{PodUsage, Writer},
};
use faas_router_k8s_api as k8s;
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info_span, warn, Instrument};

pub(crate) const LEAST_USAGE_REFRESH: Duration = Duration::from_secs(15);
pub(crate) const POWER_OF_TWO_REFRESH: Duration = Duration::from_secs(30);

/// Spawns the periodic usage refresher for one function's pods. The balancer
/// owns the returned guard; dropping it stops the task.
pub(crate) fn spawn_refresher(
    function: FunctionRef,
    pods: Arc<dyn PodLister>,
    metrics: Arc<dyn PodMetricsClient>,
    usage: Writer,
    period: Duration,
) -> RefreshGuard {
    let span = info_span!("usage", function = %function);
    let task = tokio::spawn(
        async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(error) = refresh_once(&function, &*pods, &*metrics, &usage).await {
                    warn!(%error, "failed to refresh pod usage");
                }
            }
        }
        .instrument(span),
    );
    RefreshGuard::new(task)
}

/// Joins the current pod list against the pod-metrics list and publishes the
/// result wholesale, so IPs that left the selector drop out. A pod without a
/// metrics sample yet is published zeroed; a pod without an IP is skipped.
/// Either listing failing aborts the cycle and leaves the previous snapshot
/// in place until the next tick.
pub(crate) async fn refresh_once(
    function: &FunctionRef,
    pods: &dyn PodLister,
    metrics: &dyn PodMetricsClient,
    usage: &Writer,
) -> Result<()> {
    let selector = function_selector(&function.name);
    let pod_list = pods
        .list(&function.namespace, &selector)
        .context("listing pods")?;
    let metrics_list = metrics
        .list(&function.namespace, &selector)
        .await
        .context("listing pod metrics")?;

    let mut by_name: HashMap<String, PodUsage> = metrics_list
        .iter()
        .filter_map(|item| {
            let name = item.metadata.name.clone()?;
            Some((name, sum_containers(item)))
        })
        .collect();

    let mut next = HashMap::with_capacity(pod_list.len());
    for pod in &pod_list {
        let Some(name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let Some(ip) = pod.status.as_ref().and_then(|status| status.pod_ip.clone()) else {
            continue;
        };
        next.insert(ip, by_name.remove(name).unwrap_or_default());
    }
    usage.replace(next);
    Ok(())
}

/// Container-wise sum of a pod's CPU and memory usage.
fn sum_containers(item: &k8s::PodMetrics) -> PodUsage {
    let mut total = PodUsage::default();
    for container in &item.containers {
        total.cpu = total.cpu + parse_usage(container, "cpu");
        total.memory = total.memory + parse_usage(container, "memory");
    }
    total
}

fn parse_usage(container: &k8s::ContainerMetrics, resource: &str) -> Quantity {
    let Some(quantity) = container.usage.get(resource) else {
        return Quantity::zero();
    };
    quantity.0.parse().unwrap_or_else(|error| {
        warn!(
            container = %container.name,
            %resource,
            value = %quantity.0,
            %error,
            "ignoring unparseable usage quantity"
        );
        Quantity::zero()
    })
}

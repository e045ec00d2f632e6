//! The consumed read interfaces and their cluster-backed implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use faas_router_k8s_api as k8s;
use kube::runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Read access to the cluster's deployment cache.
pub trait DeploymentLister: Send + Sync + 'static {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<k8s::Deployment>>>;
}

/// Yields per-namespace views of the endpoints cache.
pub trait EndpointsLister: Send + Sync + 'static {
    fn namespaced(&self, namespace: &str) -> Arc<dyn NamespacedEndpointsLister>;
}

/// Read access to the endpoints of a single namespace.
pub trait NamespacedEndpointsLister: Send + Sync + 'static {
    fn get(&self, name: &str) -> Result<Option<Arc<k8s::Endpoints>>>;
}

/// Lists cached pods by label selector.
pub trait PodLister: Send + Sync + 'static {
    fn list(&self, namespace: &str, selector: &k8s::Selector) -> Result<Vec<Arc<k8s::Pod>>>;
}

/// Lists pod metrics by label selector. Unlike the listers this hits the
/// aggregated metrics API directly; there is no watchable cache for it.
#[async_trait]
pub trait PodMetricsClient: Send + Sync + 'static {
    async fn list(&self, namespace: &str, selector: &k8s::Selector)
        -> Result<Vec<k8s::PodMetrics>>;
}

// === Store-backed implementations ===

#[derive(Clone)]
pub struct StoreDeployments(Store<k8s::Deployment>);

impl StoreDeployments {
    pub fn new(store: Store<k8s::Deployment>) -> Self {
        Self(store)
    }
}

impl DeploymentLister for StoreDeployments {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<k8s::Deployment>>> {
        Ok(self.0.get(&ObjectRef::new(name).within(namespace)))
    }
}

#[derive(Clone)]
pub struct StoreEndpoints(Store<k8s::Endpoints>);

impl StoreEndpoints {
    pub fn new(store: Store<k8s::Endpoints>) -> Self {
        Self(store)
    }
}

impl EndpointsLister for StoreEndpoints {
    fn namespaced(&self, namespace: &str) -> Arc<dyn NamespacedEndpointsLister> {
        Arc::new(NamespacedStoreEndpoints {
            store: self.0.clone(),
            namespace: namespace.to_string(),
        })
    }
}

struct NamespacedStoreEndpoints {
    store: Store<k8s::Endpoints>,
    namespace: String,
}

impl NamespacedEndpointsLister for NamespacedStoreEndpoints {
    fn get(&self, name: &str) -> Result<Option<Arc<k8s::Endpoints>>> {
        Ok(self.store.get(&ObjectRef::new(name).within(&self.namespace)))
    }
}

#[derive(Clone)]
pub struct StorePods(Store<k8s::Pod>);

impl StorePods {
    pub fn new(store: Store<k8s::Pod>) -> Self {
        Self(store)
    }
}

impl PodLister for StorePods {
    fn list(&self, namespace: &str, selector: &k8s::Selector) -> Result<Vec<Arc<k8s::Pod>>> {
        Ok(self
            .0
            .state()
            .into_iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| selector.matches(&k8s::Labels::from(pod.metadata.labels.clone())))
            .collect())
    }
}

#[derive(Clone)]
pub struct ApiPodMetricsClient(k8s::Client);

impl ApiPodMetricsClient {
    pub fn new(client: k8s::Client) -> Self {
        Self(client)
    }
}

#[async_trait]
impl PodMetricsClient for ApiPodMetricsClient {
    async fn list(
        &self,
        namespace: &str,
        selector: &k8s::Selector,
    ) -> Result<Vec<k8s::PodMetrics>> {
        let api = k8s::Api::<k8s::PodMetrics>::namespaced(self.0.clone(), namespace);
        let params = k8s::ListParams::default().labels(&selector.to_string());
        let list = api
            .list(&params)
            .await
            .with_context(|| format!("listing pod metrics in {namespace}"))?;
        Ok(list.items)
    }
}

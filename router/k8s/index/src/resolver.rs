use crate::{
    balance::new_balancer,
    fetcher::ServiceFetcher,
    function::{load_balance_policy, FunctionRef},
    lister::{DeploymentLister, EndpointsLister, NamespacedEndpointsLister, PodLister,
        PodMetricsClient},
};
use ahash::AHashMap as HashMap;
use faas_router_core::{balance::FetchError, parse_name, LoadBalancer};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Maps a logical function name to a concrete backend URL.
///
/// The resolver owns two independent caches: per-namespace endpoints listers
/// and per-function load balancers, both keyed lazily on first resolution.
/// Balancer installs are last-writer-wins; a balancer displaced by a racing
/// install aborts its own refresher when it drops.
pub struct FunctionResolver {
    default_namespace: String,
    watchdog_port: u16,

    deployments: Arc<dyn DeploymentLister>,
    endpoints: Arc<dyn EndpointsLister>,
    pods: Arc<dyn PodLister>,
    pod_metrics: Arc<dyn PodMetricsClient>,

    ns_listers: RwLock<HashMap<String, Arc<dyn NamespacedEndpointsLister>>>,
    balancers: RwLock<HashMap<String, Arc<dyn LoadBalancer>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("namespace {0} not allowed")]
    NamespaceNotAllowed(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid backend url: {0}")]
    Uri(#[from] http::uri::InvalidUri),
}

impl FunctionResolver {
    pub fn new(
        default_namespace: impl ToString,
        watchdog_port: u16,
        deployments: Arc<dyn DeploymentLister>,
        endpoints: Arc<dyn EndpointsLister>,
        pods: Arc<dyn PodLister>,
        pod_metrics: Arc<dyn PodMetricsClient>,
    ) -> Self {
        Self {
            default_namespace: default_namespace.to_string(),
            watchdog_port,
            deployments,
            endpoints,
            pods,
            pod_metrics,
            ns_listers: RwLock::new(HashMap::new()),
            balancers: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `name[.namespace]` to the backend selected by the function's
    /// load-balance policy.
    pub fn resolve(&self, raw: &str) -> Result<http::Uri, ResolveError> {
        let (name, namespace) = parse_name(raw, &self.default_namespace);
        verify_namespace(&namespace)?;
        let function = FunctionRef { namespace, name };

        let balancer = match self.balancer(&function) {
            Some(balancer) => balancer,
            None => self.install_balancer(&function),
        };

        let ip = balancer.get_backend()?;
        let uri = format!("http://{}:{}", ip, self.watchdog_port).parse::<http::Uri>()?;
        Ok(uri)
    }

    fn balancer(&self, function: &FunctionRef) -> Option<Arc<dyn LoadBalancer>> {
        self.balancers.read().get(&cache_key(function)).cloned()
    }

    fn install_balancer(&self, function: &FunctionRef) -> Arc<dyn LoadBalancer> {
        let policy = load_balance_policy(function, &*self.deployments);
        debug!(%function, %policy, "constructing load balancer");

        let lister = self.ns_lister(&function.namespace);
        let fetcher = ServiceFetcher::new(function.clone(), lister);
        let balancer = new_balancer(&policy, fetcher, function, &self.pods, &self.pod_metrics);

        let key = cache_key(function);
        self.balancers.write().insert(key.clone(), balancer);
        // Re-read so racing installs converge on the cached instance; the
        // loser is dropped and takes its refresher with it.
        self.balancers
            .read()
            .get(&key)
            .cloned()
            .expect("balancer was just installed")
    }

    fn ns_lister(&self, namespace: &str) -> Arc<dyn NamespacedEndpointsLister> {
        if let Some(lister) = self.ns_listers.read().get(namespace) {
            return lister.clone();
        }
        self.ns_listers
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| self.endpoints.namespaced(namespace))
            .clone()
    }
}

fn cache_key(function: &FunctionRef) -> String {
    format!("{}#{}", function.namespace, function.name)
}

fn verify_namespace(namespace: &str) -> Result<(), ResolveError> {
    if namespace == "kube-system" {
        return Err(ResolveError::NamespaceNotAllowed(namespace.to_string()));
    }
    Ok(())
}

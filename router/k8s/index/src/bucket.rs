use crate::{
    function::{FunctionRef, RATE_QPS_LABEL},
    lister::DeploymentLister,
};
use ahash::AHashMap as HashMap;
use faas_router_core::TokenBucket;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The admission budget applied when a function carries no rate label, or an
/// unparseable one.
pub const DEFAULT_RATE_QPS: f64 = 20.0;
pub const DEFAULT_BURST: u32 = 20;

/// Hands out the per-function token bucket gating admission.
pub trait BucketService: Send + Sync + 'static {
    fn get_bucket(&self, name: &str, namespace: &str) -> Result<Arc<TokenBucket>, BucketError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("function {name}.{namespace} not found")]
    NotFound { namespace: String, name: String },

    #[error("failed to read deployment for {name}.{namespace}: {source}")]
    Lister {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A process-wide registry of per-function buckets, materialized lazily from
/// deployment labels and retained for the life of the process.
pub struct BucketRegistry {
    cache: Mutex<HashMap<String, Arc<TokenBucket>>>,
    deployments: Arc<dyn DeploymentLister>,
}

impl BucketRegistry {
    pub fn new(deployments: Arc<dyn DeploymentLister>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            deployments,
        }
    }
}

impl BucketService for BucketRegistry {
    fn get_bucket(&self, name: &str, namespace: &str) -> Result<Arc<TokenBucket>, BucketError> {
        // Function names are DNS labels and cannot contain '#'.
        let key = format!("{namespace}#{name}");

        // The lock is held across the lister read on a miss so concurrent
        // queries construct at most one bucket per function. The read is
        // cache-local (labels only, no round trip to the cluster).
        let mut cache = self.cache.lock();
        if let Some(bucket) = cache.get(&key) {
            return Ok(bucket.clone());
        }

        let bucket = Arc::new(compute_bucket(
            &FunctionRef::new(namespace, name),
            &*self.deployments,
        )?);
        cache.insert(key, bucket.clone());
        Ok(bucket)
    }
}

fn compute_bucket(
    function: &FunctionRef,
    deployments: &dyn DeploymentLister,
) -> Result<TokenBucket, BucketError> {
    let deployment = deployments
        .get(&function.namespace, &function.name)
        .map_err(|source| BucketError::Lister {
            namespace: function.namespace.clone(),
            name: function.name.clone(),
            source,
        })?
        .ok_or_else(|| BucketError::NotFound {
            namespace: function.namespace.clone(),
            name: function.name.clone(),
        })?;

    let qps = deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(RATE_QPS_LABEL));
    let Some(qps) = qps else {
        return Ok(TokenBucket::new(DEFAULT_RATE_QPS, DEFAULT_BURST));
    };

    match qps.parse::<f64>() {
        // Burst capacity follows the configured rate.
        Ok(rate) => Ok(TokenBucket::new(rate, rate.ceil() as u32)),
        Err(error) => {
            debug!(%function, value = %qps, %error, "invalid rate label, using defaults");
            Ok(TokenBucket::new(DEFAULT_RATE_QPS, DEFAULT_BURST))
        }
    }
}

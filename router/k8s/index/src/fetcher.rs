use crate::{function::FunctionRef, lister::NamespacedEndpointsLister};
use faas_router_core::balance::{FetchError, UpstreamFetcher};
use std::sync::Arc;

/// Fetches the live backend set for one function from the endpoints resource
/// of its namespace. Nothing is cached here; every call reads the current
/// lister state.
pub struct ServiceFetcher {
    function: FunctionRef,
    endpoints: Arc<dyn NamespacedEndpointsLister>,
}

impl ServiceFetcher {
    pub fn new(function: FunctionRef, endpoints: Arc<dyn NamespacedEndpointsLister>) -> Self {
        Self {
            function,
            endpoints,
        }
    }
}

impl UpstreamFetcher for ServiceFetcher {
    fn fetch_upstream(&self) -> Result<Vec<String>, FetchError> {
        let FunctionRef { namespace, name } = &self.function;

        let endpoints = self
            .endpoints
            .get(name)
            .map_err(|source| FetchError::Lister {
                namespace: namespace.clone(),
                name: name.clone(),
                source,
            })?
            .ok_or_else(|| FetchError::NotFound {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        let subset = endpoints
            .subsets
            .as_ref()
            .and_then(|subsets| subsets.first())
            .ok_or_else(|| FetchError::NoSubsets {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        let addresses = subset.addresses.as_deref().unwrap_or_default();
        if addresses.is_empty() {
            return Err(FetchError::NoAddresses {
                namespace: namespace.clone(),
                name: name.clone(),
            });
        }

        let mut upstreams = Vec::with_capacity(addresses.len());
        for address in addresses {
            upstreams.push(address.ip.clone());
        }
        Ok(upstreams)
    }
}

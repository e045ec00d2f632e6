use crate::lister::DeploymentLister;
use faas_router_k8s_api::{Expression, Selector};
use std::fmt;
use tracing::{debug, warn};

/// Label carrying a function's load-balance policy tag.
pub const LB_POLICY_LABEL: &str = "com.openfaas.LoadBalance.policy";

/// Label carrying a function's admission budget in requests per second.
pub const RATE_QPS_LABEL: &str = "com.openfaas.rate.qps";

/// Label every function pod carries, valued with the function name.
pub const FUNCTION_LABEL: &str = "faas_function";

const FALLBACK_POLICY: &str = "RoundRobin";

/// Identifies one function deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionRef {
    pub namespace: String,
    pub name: String,
}

impl FunctionRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

/// Selects the function's pods: `faas_function,faas_function=<name>`.
pub fn function_selector(name: &str) -> Selector {
    vec![
        Expression::exists(FUNCTION_LABEL),
        Expression::equals(FUNCTION_LABEL, name),
    ]
    .into_iter()
    .collect()
}

/// Reads the function's load-balance policy label.
///
/// A missing deployment, an unreadable lister, and an unlabeled deployment
/// all fall back to round robin; an unrecognized label value passes through
/// verbatim and is normalized by the balancer factory.
pub fn load_balance_policy(function: &FunctionRef, lister: &dyn DeploymentLister) -> String {
    let deployment = match lister.get(&function.namespace, &function.name) {
        Ok(Some(deployment)) => deployment,
        Ok(None) => {
            debug!(%function, "function not found, using {FALLBACK_POLICY}");
            return FALLBACK_POLICY.to_string();
        }
        Err(error) => {
            warn!(%function, %error, "failed to read deployment, using {FALLBACK_POLICY}");
            return FALLBACK_POLICY.to_string();
        }
    };

    match deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LB_POLICY_LABEL))
    {
        Some(policy) => policy.clone(),
        None => {
            debug!(%function, "no load balance policy label, using {FALLBACK_POLICY}");
            FALLBACK_POLICY.to_string()
        }
    }
}

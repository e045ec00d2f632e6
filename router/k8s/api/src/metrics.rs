use k8s_openapi::{
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Time},
    NamespaceResourceScope,
};
use kube::api::ObjectMeta;
use serde::Deserialize;
use std::{borrow::Cow, collections::BTreeMap};

/// A pod's resource usage from the `metrics.k8s.io/v1beta1` API.
///
/// The metrics API is served by an aggregated apiserver (metrics-server), not
/// a CRD, so the resource type is declared by hand and only ever read.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub timestamp: Option<Time>,

    #[serde(default)]
    pub window: Option<String>,

    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub name: String,

    /// Usage keyed by resource name (`cpu`, `memory`).
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

impl kube::Resource for PodMetrics {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "PodMetrics".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "metrics.k8s.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1beta1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "pods".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_metrics_item() {
        let item = serde_json::json!({
            "metadata": {
                "name": "figlet-6f5459bcd7-xmglv",
                "namespace": "openfaas-fn",
                "labels": { "faas_function": "figlet" },
            },
            "timestamp": "2023-10-02T10:04:51Z",
            "window": "15s",
            "containers": [
                {
                    "name": "figlet",
                    "usage": { "cpu": "488961n", "memory": "5540Ki" },
                },
            ],
        });
        let metrics: PodMetrics = serde_json::from_value(item).unwrap();
        assert_eq!(metrics.metadata.name.as_deref(), Some("figlet-6f5459bcd7-xmglv"));
        assert_eq!(metrics.containers.len(), 1);
        assert_eq!(
            metrics.containers[0].usage.get("cpu").map(|q| q.0.as_str()),
            Some("488961n")
        );
    }
}

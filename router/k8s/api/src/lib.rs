//! Kubernetes API types consumed by the router.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod metrics;

pub use self::{
    labels::{Expression, Labels, Selector},
    metrics::{ContainerMetrics, PodMetrics},
};
pub use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{EndpointAddress, EndpointSubset, Endpoints, Pod, PodStatus},
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Time},
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Resource, ResourceExt},
    Client,
};

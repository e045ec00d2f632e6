//! The function gateway binary's edge: the admission middleware, the
//! resolve-and-forward service, and the boot wiring that binds them to
//! cluster watches.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use faas_router_core as core;
pub use faas_router_k8s_api as k8s;
pub use faas_router_k8s_index as index;

mod admission;
mod args;
mod gateway;
mod metrics;

pub use self::{
    admission::RateLimited,
    args::Args,
    gateway::Gateway,
    metrics::{AdmissionMetrics, GatewayMetrics},
};

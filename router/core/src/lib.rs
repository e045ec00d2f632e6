//! Core routing domain for the function gateway.
//!
//! This crate holds the pieces of the router that do not touch the Kubernetes
//! API: function-name parsing, decimal resource quantities, the shared
//! pod-usage index, the token bucket backing admission, and the load-balancer
//! family. Everything here is driven by narrow traits (`UpstreamFetcher`,
//! the usage `Reader`) so that the cluster-facing crates can plug in live
//! listers while tests plug in fakes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod balance;
pub mod bucket;
pub mod name;
pub mod quantity;
pub mod usage;

pub use self::{
    balance::{FetchError, LoadBalancer, Policy, UpstreamFetcher},
    bucket::TokenBucket,
    name::parse_name,
    quantity::Quantity,
    usage::PodUsage,
};

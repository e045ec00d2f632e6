use crate::{
    admission::RateLimited,
    gateway::Gateway,
    metrics::{AdmissionMetrics, GatewayMetrics},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use faas_router_k8s_api::{Deployment, Endpoints, Pod};
use faas_router_k8s_index::{
    ApiPodMetricsClient, BucketRegistry, DeploymentLister, EndpointsLister, FunctionResolver,
    PodLister, PodMetricsClient, StoreDeployments, StoreEndpoints, StorePods,
};
use futures::prelude::*;
use hyper::{service::make_service_fn, Body, Request, Response};
use kube::runtime::{reflector, watcher};
use prometheus_client::registry::Registry;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "faas-router", about = "Routes and rate-limits function invocations")]
pub struct Args {
    #[clap(
        long,
        default_value = "faas_router=info,warn",
        env = "FAAS_ROUTER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address of the function gateway listener.
    #[clap(long, default_value = "0.0.0.0:8081")]
    gateway_addr: SocketAddr,

    /// Namespace assumed when an invocation does not name one.
    #[clap(long, default_value = "openfaas-fn")]
    default_namespace: String,

    /// Port every function watchdog listens on.
    #[clap(long, default_value = "8080")]
    watchdog_port: u16,
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            gateway_addr,
            default_namespace,
            watchdog_port,
        } = self;

        let mut prom = <Registry>::default();
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let gateway_metrics = GatewayMetrics::register(prom.sub_registry_with_prefix("gateway"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let deployments: Arc<dyn DeploymentLister> = Arc::new(StoreDeployments::new(
            spawn_store::<Deployment>(client.clone(), "deployments"),
        ));
        let endpoints: Arc<dyn EndpointsLister> = Arc::new(StoreEndpoints::new(
            spawn_store::<Endpoints>(client.clone(), "endpoints"),
        ));
        let pods: Arc<dyn PodLister> =
            Arc::new(StorePods::new(spawn_store::<Pod>(client.clone(), "pods")));
        let pod_metrics: Arc<dyn PodMetricsClient> = Arc::new(ApiPodMetricsClient::new(client));

        let buckets = Arc::new(BucketRegistry::new(deployments.clone()));
        let resolver = Arc::new(FunctionResolver::new(
            &default_namespace,
            watchdog_port,
            deployments,
            endpoints,
            pods,
            pod_metrics,
        ));

        let gateway = Gateway::new(resolver, gateway_metrics);
        let service = RateLimited::new(
            gateway,
            buckets,
            default_namespace.into(),
            admission_metrics,
        );

        tokio::spawn(
            serve(gateway_addr, service, runtime.shutdown_handle())
                .instrument(info_span!("gateway")),
        );

        // Block on the shutdown signal; background tasks wind down with it.
        if runtime.run().await.is_err() {
            bail!("aborted");
        }
        Ok(())
    }
}

/// Builds a watch-backed cache of `K`, spawning the reflector that keeps it
/// current.
fn spawn_store<K>(client: kube::Client, kind: &'static str) -> kube::runtime::reflector::Store<K>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let api = kube::Api::<K>::all(client);
    let (store, writer) = reflector::store();
    let watch = reflector(writer, watcher(api, watcher::Config::default()));
    tokio::spawn(
        async move {
            futures::pin_mut!(watch);
            while let Some(event) = watch.next().await {
                if let Err(error) = event {
                    tracing::warn!(%error, "watch stream failed");
                }
            }
        }
        .instrument(info_span!("watch", %kind)),
    );
    store
}

async fn serve<S>(addr: SocketAddr, service: S, drain: drain::Watch) -> Result<()>
where
    S: hyper::service::Service<Request<Body>, Response = Response<Body>, Error = hyper::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    let server = hyper::Server::try_bind(&addr)
        .with_context(|| format!("binding {addr}"))?
        .serve(make_service_fn(move |_conn| {
            let service = service.clone();
            future::ready(Ok::<_, Infallible>(service))
        }));
    info!(%addr, "function gateway listening");

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::pin! {
        let server = server.with_graceful_shutdown(close_rx.map(|_| ()));
    }
    tokio::select! {
        res = &mut server => res.context("gateway server failed")?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(server).await.context("gateway server failed")?;
        }
    }
    Ok(())
}

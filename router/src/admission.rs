use crate::metrics::AdmissionMetrics;
use faas_router_core::parse_name;
use faas_router_k8s_index::BucketService;
use futures::future::{self, Either, Ready};
use hyper::{Body, Request, Response, StatusCode};
use std::{sync::Arc, task};
use tracing::info;

/// Gates function invocations behind their per-function token bucket.
///
/// Non-function routes pass through untouched. A function without a usable
/// bucket is a 400 (its deployment cannot be read); an over-budget
/// invocation is an empty 429.
#[derive(Clone)]
pub struct RateLimited<S> {
    inner: S,
    buckets: Arc<dyn BucketService>,
    default_namespace: Arc<str>,
    metrics: AdmissionMetrics,
}

impl<S> RateLimited<S> {
    pub fn new(
        inner: S,
        buckets: Arc<dyn BucketService>,
        default_namespace: Arc<str>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            inner,
            buckets,
            default_namespace,
            metrics,
        }
    }
}

impl<S> hyper::service::Service<Request<Body>> for RateLimited<S>
where
    S: hyper::service::Service<Request<Body>, Response = Response<Body>>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Either<S::Future, Ready<Result<Response<Body>, S::Error>>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> task::Poll<Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let Some(route) = function_route(req.uri().path()) else {
            return Either::Left(self.inner.call(req));
        };

        let (name, namespace) = parse_name(route, &self.default_namespace);
        let bucket = match self.buckets.get_bucket(&name, &namespace) {
            Ok(bucket) => bucket,
            Err(error) => {
                info!(%name, %namespace, %error, "unable to get rate limiter");
                self.metrics.rejected.inc();
                let body = format!("Unable to get rate limiter for {name}.{namespace}");
                return Either::Right(future::ok(
                    Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(Body::from(body))
                        .expect("bad request response must be valid"),
                ));
            }
        };

        if bucket.allow() {
            self.metrics.admitted.inc();
            Either::Left(self.inner.call(req))
        } else {
            self.metrics.throttled.inc();
            Either::Right(future::ok(
                Response::builder()
                    .status(StatusCode::TOO_MANY_REQUESTS)
                    .body(Body::empty())
                    .expect("too many requests response must be valid"),
            ))
        }
    }
}

/// Extracts the `{name}` route variable from `/function/{name}[/...]`.
pub(crate) fn function_route(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/function/")?;
    let name = match rest.find('/') {
        Some(i) => &rest[..i],
        None => rest,
    };
    (!name.is_empty()).then_some(name)
}

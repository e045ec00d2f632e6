use crate::{admission::function_route, metrics::GatewayMetrics};
use faas_router_k8s_index::FunctionResolver;
use futures::future::{self, Either, Ready};
use hyper::{client::HttpConnector, Body, Request, Response, StatusCode, Uri};
use std::{sync::Arc, task};
use tracing::warn;

/// Resolves each invocation to a backend chosen by the function's
/// load-balance policy and forwards it there.
#[derive(Clone)]
pub struct Gateway {
    resolver: Arc<FunctionResolver>,
    client: hyper::Client<HttpConnector>,
    metrics: GatewayMetrics,
}

impl Gateway {
    pub fn new(resolver: Arc<FunctionResolver>, metrics: GatewayMetrics) -> Self {
        Self {
            resolver,
            client: hyper::Client::new(),
            metrics,
        }
    }
}

impl hyper::service::Service<Request<Body>> for Gateway {
    type Response = Response<Body>;
    type Error = hyper::Error;
    type Future =
        Either<hyper::client::ResponseFuture, Ready<Result<Response<Body>, hyper::Error>>>;

    fn poll_ready(&mut self, _: &mut task::Context<'_>) -> task::Poll<Result<(), hyper::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let Some(name) = function_route(req.uri().path()) else {
            return Either::Right(future::ok(mk_response(StatusCode::NOT_FOUND, Body::empty())));
        };

        let backend = match self.resolver.resolve(name) {
            Ok(uri) => uri,
            Err(error) => {
                warn!(%name, %error, "failed to resolve function backend");
                self.metrics.resolve_errors.inc();
                return Either::Right(future::ok(mk_response(
                    StatusCode::BAD_GATEWAY,
                    Body::from(error.to_string()),
                )));
            }
        };

        let uri = match proxy_uri(&backend, req.uri()) {
            Ok(uri) => uri,
            Err(error) => {
                warn!(%error, "failed to build backend uri");
                return Either::Right(future::ok(mk_response(
                    StatusCode::BAD_GATEWAY,
                    Body::empty(),
                )));
            }
        };
        *req.uri_mut() = uri;
        Either::Left(self.client.request(req))
    }
}

fn mk_response(status: StatusCode, body: Body) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(body)
        .expect("response must be valid")
}

/// Rebuilds the request URI against the resolved backend, preserving the
/// path remainder and query after `/function/<name>`.
fn proxy_uri(backend: &Uri, original: &Uri) -> Result<Uri, hyper::http::Error> {
    let authority = backend
        .authority()
        .expect("resolved backends carry an authority")
        .as_str();
    let rest = original.path().strip_prefix("/function/").unwrap_or("");
    let path = match rest.find('/') {
        Some(i) => &rest[i..],
        None => "/",
    };
    let path_and_query = match original.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    Uri::builder()
        .scheme("http")
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
}

use crate::errors::ProxyError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::routes::Route;
use crate::upstreams::upstream_uri;
use bytes::Bytes;
use cache::{ResolutionError, Resolver};
use http::header::HOST;
use http::{StatusCode, Uri, Version};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::Service as HyperService;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::{
    add_via_header, filter_hop_by_hop, make_boxed_error_response, make_detailed_error_response,
};
use shared::{gauge, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

type ProxyResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// Resolves the upstream of every request through the cache and forwards
/// the request to it.
pub struct ProxyService {
    resolver: Resolver,
    client: Client<HttpConnector, Incoming>,
}

impl ProxyService {
    pub fn new(resolver: Resolver) -> Self {
        let conn = HttpConnector::new();
        let client: Client<_, Incoming> = Client::builder(TokioExecutor::new())
            .http2_adaptive_window(true)
            .build(conn);

        Self { resolver, client }
    }
}

impl HyperService<Request<Incoming>> for ProxyService {
    type Response = ProxyResponse;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let resolver = self.resolver.clone();
        let client = self.client.clone();
        Box::pin(async move { Ok(handle(resolver, client, req).await) })
    }
}

struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

async fn handle(
    resolver: Resolver,
    client: Client<HttpConnector, Incoming>,
    req: Request<Incoming>,
) -> ProxyResponse {
    let _inflight = InflightGuard::new();
    let started = Instant::now();

    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let (route_name, response) = match Route::from_path(&path) {
        None => ("none", make_boxed_error_response(StatusCode::NOT_FOUND)),
        Some(route) => {
            let response = match target(&resolver, &route, query.as_deref()).await {
                Ok(uri) => forward(&client, req, uri).await.unwrap_or_else(|err| {
                    tracing::error!(error = %err, path = %path, "Upstream request failed");
                    make_boxed_error_response(StatusCode::BAD_GATEWAY)
                }),
                Err(TargetError::Resolution(err)) => resolution_error_response(&err),
                Err(TargetError::Upstream(err)) => {
                    tracing::error!(error = %err, path = %path, "Cannot build upstream URI");
                    make_boxed_error_response(StatusCode::BAD_GATEWAY)
                }
            };
            (route.as_str(), response)
        }
    };

    histogram!(
        REQUEST_DURATION,
        "route" => route_name,
        "status" => response.status().as_str().to_string()
    )
    .record(started.elapsed().as_secs_f64());
    response
}

enum TargetError {
    Resolution(ResolutionError),
    Upstream(ProxyError),
}

impl From<ResolutionError> for TargetError {
    fn from(err: ResolutionError) -> Self {
        TargetError::Resolution(err)
    }
}

impl From<ProxyError> for TargetError {
    fn from(err: ProxyError) -> Self {
        TargetError::Upstream(err)
    }
}

async fn target(
    resolver: &Resolver,
    route: &Route<'_>,
    query: Option<&str>,
) -> Result<Uri, TargetError> {
    let (base, path) = match route {
        Route::Service { path } => {
            let service = resolver.resolve_service_path(path).await?;
            (service.upstream_url, service.path)
        }
        Route::Agent { agent_id, path } => {
            (resolver.resolve_agent(agent_id).await?, path.to_string())
        }
        Route::MarathonLeader { path } => {
            (resolver.resolve_marathon_leader().await?, path.to_string())
        }
    };
    Ok(upstream_uri(&base, &path, query)?)
}

fn resolution_error_response(err: &ResolutionError) -> ProxyResponse {
    match err {
        ResolutionError::ServiceNotFound(_)
        | ResolutionError::AgentNotFound(_)
        | ResolutionError::InvalidServiceName(_) => {
            tracing::debug!(error = %err, "No upstream for request");
            make_boxed_error_response(StatusCode::NOT_FOUND)
        }
        ResolutionError::Cache(err) => make_detailed_error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            err.kind().unavailable_detail(),
        ),
    }
}

async fn forward(
    client: &Client<HttpConnector, Incoming>,
    req: Request<Incoming>,
    uri: Uri,
) -> Result<ProxyResponse, ProxyError> {
    let (mut parts, body) = req.into_parts();
    let version = parts.version;
    filter_hop_by_hop(&mut parts.headers, version);
    add_via_header(&mut parts.headers, version);
    // Set again by the client from the upstream URI.
    parts.headers.remove(HOST);
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    let response = client.request(Request::from_parts(parts, body)).await?;

    let (mut parts, body) = response.into_parts();
    let version = parts.version;
    filter_hop_by_hop(&mut parts.headers, version);
    add_via_header(&mut parts.headers, version);
    Ok(Response::from_parts(parts, body.boxed()))
}

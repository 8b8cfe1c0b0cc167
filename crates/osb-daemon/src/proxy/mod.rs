//! Name-based reverse proxy.
//!
//! Routes `http://<name>.<base-domain>` to the sandbox's runtime-assigned
//! host port. Requests stream straight through (required for SSE and HMR)
//! and `Upgrade`/`Connection` headers are forwarded so WebSocket handshakes
//! complete; a 101 response bridges both upgraded connections directly.

pub mod cache;

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Request, Response,
    StatusCode,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use osb_store::{SandboxRecord, Store};

use crate::cluster::registry::WorkerRegistry;
use cache::RouteCache;

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Resolves sandbox names to target URLs, consulting the route cache first.
pub struct TargetResolver {
    store: Store,
    cache: Arc<RouteCache>,
    base_domain: String,
    registry: Option<Arc<WorkerRegistry>>,
}

impl TargetResolver {
    pub fn new(
        store: Store,
        cache: Arc<RouteCache>,
        base_domain: String,
        registry: Option<Arc<WorkerRegistry>>,
    ) -> Self {
        Self {
            store,
            cache,
            base_domain,
            registry,
        }
    }

    /// Extracts the sandbox name from a Host header. The host must be a
    /// single label directly under the base domain.
    pub fn subdomain(&self, host: &str) -> Option<String> {
        let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
        let suffix = format!(".{}", self.base_domain);
        let prefix = host.strip_suffix(suffix.as_str())?;
        if prefix.is_empty() || prefix.contains('.') {
            return None;
        }
        Some(prefix.to_string())
    }

    /// Name → `http://host:port`, cached with a TTL.
    pub async fn resolve(&self, name: &str) -> Result<String> {
        if let Some(target) = self.cache.get(name) {
            return Ok(target);
        }

        let record = self
            .store
            .find_sandbox_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("no sandbox named '{name}'"))?;
        let host_port = main_host_port(&record)?;
        let host = self.target_host(&record)?;
        let target = format!("http://{host}:{host_port}");

        self.cache.set(name, &target);
        Ok(target)
    }

    /// Host the sandbox's published ports are reachable on: loopback in
    /// single-node mode, the owning worker's hostname in distributed mode.
    fn target_host(&self, record: &SandboxRecord) -> Result<String> {
        let Some(worker_id) = &record.worker_id else {
            return Ok("127.0.0.1".to_string());
        };
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| anyhow!("sandbox is worker-owned but no registry is configured"))?;
        let worker = registry
            .lookup(worker_id)
            .ok_or_else(|| anyhow!("worker {worker_id} is not registered"))?;
        let host = url_host(&worker.url)
            .ok_or_else(|| anyhow!("worker {worker_id} has an unparseable url"))?;
        if host == "0.0.0.0" {
            warn!(worker_id = %worker_id, "worker registered a wildcard host; falling back to loopback");
            return Ok("127.0.0.1".to_string());
        }
        Ok(host)
    }
}

/// Main port of the sandbox: the declared `port` if set, else the only
/// mapped port when exactly one exists.
fn main_host_port(record: &SandboxRecord) -> Result<String> {
    if let Some(port) = record.port {
        return record
            .ports
            .get(&format!("{port}/tcp"))
            .cloned()
            .ok_or_else(|| anyhow!("declared port {port} has no host mapping"));
    }
    if record.ports.len() == 1 {
        return Ok(record
            .ports
            .values()
            .next()
            .cloned()
            .unwrap_or_default());
    }
    Err(anyhow!(
        "sandbox '{}' exposes {} ports and declares no main port",
        record.name,
        record.ports.len()
    ))
}

/// Host component of an `http(s)://host[:port][/path]` URL.
fn url_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

struct ProxyState {
    resolver: TargetResolver,
    client: Client<HttpConnector, Incoming>,
}

impl ProxyState {
    fn new(resolver: TargetResolver) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            client: Client::builder(TokioExecutor::new()).build_http(),
        })
    }
}

/// Spawns one accept loop per listen address; the loops run for the life of
/// the process.
pub fn spawn(addrs: Vec<SocketAddr>, resolver: TargetResolver) {
    let state = ProxyState::new(resolver);
    for addr in addrs {
        let state = state.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(addr = %addr, error = %err, "reverse proxy failed to bind");
                    return;
                }
            };
            info!(addr = %addr, "reverse proxy listening");
            accept_loop(listener, state).await;
        });
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ProxyState>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "proxy accept error");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle(req, state).await }
            });
            if let Err(err) = http1::Builder::new()
                .preserve_header_case(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                debug!(error = %err, "proxy connection error");
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<ProxyState>,
) -> Result<Response<ProxyBody>, Infallible> {
    let host = match req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        Some(host) => host.to_string(),
        None => return Ok(text_response(StatusCode::BAD_GATEWAY, "no subdomain")),
    };

    let Some(name) = state.resolver.subdomain(&host) else {
        return Ok(text_response(StatusCode::BAD_GATEWAY, "no subdomain"));
    };

    let target = match state.resolver.resolve(&name).await {
        Ok(target) => target,
        Err(err) => {
            warn!(name = %name, error = %err, "proxy resolution failed");
            return Ok(text_response(StatusCode::BAD_GATEWAY, "upstream unavailable"));
        }
    };

    match forward(req, &target, &state).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(name = %name, target = %target, error = %err, "proxy upstream error");
            Ok(text_response(StatusCode::BAD_GATEWAY, "upstream error"))
        }
    }
}

async fn forward(
    req: Request<Incoming>,
    target: &str,
    state: &ProxyState,
) -> Result<Response<ProxyBody>> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let uri: hyper::Uri = format!("{target}{path_and_query}")
        .parse()
        .context("build upstream uri")?;

    let (mut parts, body) = req.into_parts();
    // Claim the inbound upgrade before the request parts are consumed; it
    // only completes if we answer 101.
    let inbound_upgrade = parts.extensions.remove::<hyper::upgrade::OnUpgrade>();

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    // All headers are forwarded verbatim, Upgrade and Connection included;
    // the upstream needs them to complete WebSocket handshakes.
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }
    let outbound = builder.body(body).context("build upstream request")?;

    let mut response = state
        .client
        .request(outbound)
        .await
        .context("upstream request failed")?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let outbound_upgrade = hyper::upgrade::on(&mut response);
        if let Some(inbound_upgrade) = inbound_upgrade {
            tokio::spawn(async move {
                match tokio::try_join!(inbound_upgrade, outbound_upgrade) {
                    Ok((inbound, outbound)) => {
                        let mut inbound = TokioIo::new(inbound);
                        let mut outbound = TokioIo::new(outbound);
                        if let Err(err) =
                            tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await
                        {
                            debug!(error = %err, "upgraded tunnel closed");
                        }
                    }
                    Err(err) => warn!(error = %err, "upgrade bridging failed"),
                }
            });
        }
    }

    Ok(response.map(BodyExt::boxed))
}

fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(message.to_string()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

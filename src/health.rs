//! HTTP health server for liveness and readiness probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) on a listener
//! separate from the gateway. Readiness requires the pages root to be a
//! readable directory.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::net::TcpListener;

/// What the readiness probe inspects.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub pages_root: PathBuf,
}

impl HealthState {
    pub fn new(pages_root: impl Into<PathBuf>) -> Self {
        Self {
            pages_root: pages_root.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        std::fs::read_dir(&self.pages_root).is_ok()
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Builds the probe response for `path`.
///
/// `/healthz` is always 200. `/readyz` is 200 when the pages root can be
/// listed, 503 otherwise. Everything else is 404.
pub fn health_response(path: &str, state: &HealthState) -> Response<Full<Bytes>> {
    match path {
        "/healthz" => text_response(StatusCode::OK, "ok"),
        "/readyz" if state.is_ready() => text_response(StatusCode::OK, "ok"),
        "/readyz" => {
            tracing::warn!(pages_root = %state.pages_root.display(), "pages root not readable");
            text_response(StatusCode::SERVICE_UNAVAILABLE, "pages root unavailable")
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Handles health check requests.
pub async fn health_handler(
    req: Request<hyper::body::Incoming>,
    state: Arc<HealthState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(health_response(req.uri().path(), &state))
}

/// Starts the HTTP health server on the given address.
///
/// Runs indefinitely, accepting connections and handling health requests.
pub async fn start_health_server(addr: SocketAddr, state: Arc<HealthState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, Arc::clone(&state)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "health connection error");
            }
        });
    }
}

/// Runs the health server inside the Pingora server lifecycle.
pub struct HealthService {
    addr: SocketAddr,
    state: Arc<HealthState>,
}

impl HealthService {
    pub fn new(addr: SocketAddr, state: HealthState) -> Self {
        Self {
            addr,
            state: Arc::new(state),
        }
    }
}

#[async_trait]
impl BackgroundService for HealthService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        tokio::select! {
            result = start_health_server(self.addr, Arc::clone(&self.state)) => {
                if let Err(e) = result {
                    tracing::error!(addr = %self.addr, error = %e, "health server stopped");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("health server shutting down");
            }
        }
    }
}

//! Pingora ProxyHttp implementation for the gateway.
//!
//! `request_filter` runs the router for every request. Static pages and
//! routing errors are answered right there; everything else continues to
//! the upstream with forwarding headers attached.

use async_trait::async_trait;
use http::uri::PathAndQuery;
use http::{Method, Uri};
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};

use super::assets::{self, StaticResponse};
use super::router::{Decision, RouteRequest, Router};
use super::upstream::{forwarding_headers, UpstreamTarget, X_FORWARDED_FOR};

/// Per-request context for the gateway proxy.
///
/// Carries the routing outcome from `request_filter` to the upstream
/// filters and the access log.
#[derive(Debug, Default)]
pub struct GatewayCtx {
    /// Host used for routing, port stripped.
    pub host: String,
    /// Matching rule; `None` is the catch-all.
    pub rule: Option<String>,
    /// "static", "proxy" or "error" once routed.
    pub decision: Option<&'static str>,
    pub rewrites: u32,
    /// Path to send upstream instead of the original one.
    pub fallback_path: Option<String>,
    pub error: Option<String>,
}

/// Gateway proxy that serves experiment pages and forwards the rest.
pub struct GatewayProxy {
    router: Router,
    upstream: UpstreamTarget,
    /// Reported upstream as `X-Forwarded-Proto`.
    scheme: String,
}

impl GatewayProxy {
    pub fn new(router: Router, upstream: UpstreamTarget, scheme: impl Into<String>) -> Self {
        Self {
            router,
            upstream,
            scheme: scheme.into(),
        }
    }

    /// Writes a locally built response. HEAD requests get headers only.
    async fn respond(session: &mut Session, response: StaticResponse, head_only: bool) -> Result<()> {
        let mut header = ResponseHeader::build(response.status, Some(response.headers.len()))?;
        for (name, value) in response.headers.iter() {
            header.insert_header(name.as_str().to_owned(), value.clone())?;
        }

        session
            .write_response_header(Box::new(header), head_only)
            .await?;
        if !head_only {
            session
                .write_response_body(Some(response.body), true)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyHttp for GatewayProxy {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let (path, method, head_only) = {
            let req = session.req_header();
            let host_header = req.headers.get("host").and_then(|v| v.to_str().ok());
            let authority = req.uri.authority().map(|a| a.as_str());
            ctx.host = extract_host_for_routing(host_header, authority).to_ascii_lowercase();
            (
                req.uri.path().to_string(),
                req.method.as_str().to_string(),
                req.method == Method::HEAD,
            )
        };

        let request = RouteRequest {
            host: &ctx.host,
            path: &path,
            method: &method,
        };

        match self.router.route(&request) {
            Ok(routed) => {
                ctx.rule = routed.rule;
                ctx.rewrites = routed.rewrites;
                ctx.fallback_path = routed.fallback_path;
                match routed.decision {
                    Decision::Static(response) => {
                        ctx.decision = Some("static");
                        Self::respond(session, response, head_only).await?;
                        Ok(true)
                    }
                    Decision::Proxy => {
                        ctx.decision = Some("proxy");
                        Ok(false)
                    }
                }
            }
            Err(e) => {
                if e.status() >= 500 {
                    tracing::warn!(host = %ctx.host, path = %path, error = %e, "routing failed");
                } else {
                    tracing::debug!(host = %ctx.host, path = %path, error = %e, "request rejected");
                }
                ctx.decision = Some("error");
                ctx.error = Some(e.to_string());
                Self::respond(session, assets::error_response(&e), head_only).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Ok(Box::new(self.upstream.to_peer()))
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let client_ip = session
            .client_addr()
            .and_then(|addr| addr.as_inet())
            .map(|addr| addr.ip());
        let existing = upstream_request
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        for (name, value) in forwarding_headers(existing.as_deref(), client_ip, &self.scheme) {
            upstream_request.insert_header(name, value)?;
        }

        if let Some(path) = &ctx.fallback_path {
            let uri = replace_path(&upstream_request.uri, path)
                .map_err(|e| Error::explain(ErrorType::InternalError, e))?;
            upstream_request.set_uri(uri);
        }
        Ok(())
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        ctx: &mut Self::CTX,
        e: Box<Error>,
    ) -> Box<Error> {
        tracing::warn!(
            backend = %self.upstream.address(),
            host = %ctx.host,
            error = %e,
            "upstream connection failed"
        );
        e
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();
        let error = e
            .map(|e| e.to_string())
            .or_else(|| ctx.error.clone())
            .unwrap_or_default();

        tracing::info!(
            method = method,
            host = %ctx.host,
            path = path,
            status = status,
            rule = ctx.rule.as_deref().unwrap_or("catch-all"),
            decision = ctx.decision.unwrap_or("-"),
            rewrites = ctx.rewrites,
            fallback = ctx.fallback_path.as_deref().unwrap_or("-"),
            error = %error,
            "request completed"
        );
    }
}

/// Extracts the host for routing from request headers.
///
/// Priority:
/// 1. Host header (preferred)
/// 2. :authority pseudo-header (HTTP/2 fallback)
///
/// Port is stripped if present.
/// Returns empty string if neither is available.
pub fn extract_host_for_routing(host_header: Option<&str>, authority: Option<&str>) -> String {
    let raw_host = host_header.or(authority).unwrap_or("");

    // [::1]:8080 -> [::1]
    if raw_host.starts_with('[') {
        if let Some(bracket_end) = raw_host.find(']') {
            return raw_host[..=bracket_end].to_string();
        }
    }

    raw_host
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| raw_host.to_string())
}

/// Replaces the path of a request URI, keeping its query string.
pub fn replace_path(uri: &Uri, path: &str) -> std::result::Result<Uri, String> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| format!("invalid fallback path '{}': {}", path, e))?,
    );
    Uri::from_parts(parts).map_err(|e| format!("invalid fallback uri: {}", e))
}

//! Request routing pipeline.
//!
//! Classifies a request against the route table and turns the matching
//! action into a decision: serve a static response built here, or proxy to
//! the upstream. A gateway timeout raised while resolving a static path gets
//! exactly one retry against the path produced by the fallback policy.

use std::sync::Arc;

use crate::config::Config;
use crate::error::RouteError;
use crate::routes::{Action, RequestPath, RouteRule, RouteTable};

use super::assets::{self, StaticResponse};
use super::fallback::FallbackPolicy;
use super::headers::{apply_headers, ResponseEnricher};
use super::rewrite::{rewrite, ExperimentPath, HostName};

/// The parts of a request the router looks at.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    /// Host with the port stripped.
    pub host: &'a str,
    pub path: &'a str,
    pub method: &'a str,
}

/// What to do with a request.
#[derive(Debug)]
pub enum Decision {
    Static(StaticResponse),
    Proxy,
}

/// A routing decision plus what happened on the way to it.
#[derive(Debug)]
pub struct Routed {
    pub decision: Decision,
    /// Name of the rule that produced the decision; `None` is the catch-all.
    pub rule: Option<String>,
    /// Number of experiment rewrites performed. Never more than one.
    pub rewrites: u32,
    /// Set when the fallback policy replaced the path. Proxied requests must
    /// use this path upstream.
    pub fallback_path: Option<String>,
}

/// Router settings that come from configuration rather than the table.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub fallback: FallbackPolicy,
    pub index_files: Vec<String>,
    /// Lowercased. Empty allows every host.
    pub allowed_hosts: Vec<String>,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fallback: config.fallback.policy,
            index_files: config.assets.index_files.clone(),
            allowed_hosts: config.server.allowed_hosts.clone(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            index_files: vec!["index.html".to_string(), "index.js".to_string()],
            allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Trace {
    rule: Option<String>,
    rewrites: u32,
}

/// Routes requests using an immutable route table.
///
/// Stateless apart from the shared table, so one instance serves all
/// workers.
pub struct Router {
    table: Arc<RouteTable>,
    enricher: Arc<dyn ResponseEnricher>,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        table: Arc<RouteTable>,
        enricher: Arc<dyn ResponseEnricher>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            table,
            enricher,
            settings,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Routes a request, applying the fallback policy at most once.
    pub fn route(&self, req: &RouteRequest<'_>) -> Result<Routed, RouteError> {
        self.check_host(req.host)?;

        let path = RequestPath::parse(req.path)?;
        let mut trace = Trace::default();

        let (decision, fallback_path) = match self.dispatch(req, &path, &mut trace) {
            Ok(decision) => (decision, None),
            Err(e) if e.is_gateway_timeout() => {
                let Some(retry) = self.settings.fallback.apply(path.as_str()) else {
                    return Err(e);
                };
                tracing::debug!(
                    from = path.as_str(),
                    to = %retry,
                    policy = self.settings.fallback.as_str(),
                    "fallback retry"
                );
                let retry_path = RequestPath::parse(&retry)?;
                // The failed first pass left no response behind.
                trace = Trace::default();
                // A second timeout is returned as is.
                let decision = self.dispatch(req, &retry_path, &mut trace)?;
                (decision, Some(retry_path.as_str().to_string()))
            }
            Err(e) => return Err(e),
        };

        Ok(Routed {
            decision,
            rule: trace.rule,
            rewrites: trace.rewrites,
            fallback_path,
        })
    }

    fn check_host(&self, host: &str) -> Result<(), RouteError> {
        let allowed = &self.settings.allowed_hosts;
        if allowed.is_empty() || allowed.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            Ok(())
        } else {
            Err(RouteError::HostNotAllowed(host.to_string()))
        }
    }

    /// One pass through classifier and action. No retries here.
    fn dispatch(
        &self,
        req: &RouteRequest<'_>,
        path: &RequestPath,
        trace: &mut Trace,
    ) -> Result<Decision, RouteError> {
        let Some(matched) = self.table.classify(path) else {
            trace.rule = None;
            return Ok(Decision::Proxy);
        };
        let rule = matched.rule;
        trace.rule = Some(rule.name.clone());

        match rule.action {
            Action::ProxyDynamic => Ok(Decision::Proxy),
            Action::ServeStatic => {
                check_method(req.method)?;
                self.serve(rule, path.segments(), path.is_directory())
            }
            Action::RewriteAndServe => {
                check_method(req.method)?;
                self.rewrite_and_serve(req, path, rule, &matched.captures, trace)
            }
            // The literal asset is tried first; only a miss turns into the
            // timeout signal the fallback resolver reacts to.
            Action::FallbackRetry => {
                check_method(req.method)?;
                match self.rewrite_and_serve(req, path, rule, &matched.captures, trace) {
                    Err(RouteError::NotFound { path: missing }) => {
                        tracing::debug!(
                            path = path.as_str(),
                            missing = %missing,
                            "experiment asset missing, signalling gateway timeout"
                        );
                        Err(RouteError::GatewayTimeout {
                            path: path.as_str().to_string(),
                        })
                    }
                    other => other,
                }
            }
        }
    }

    fn rewrite_and_serve(
        &self,
        req: &RouteRequest<'_>,
        path: &RequestPath,
        rule: &RouteRule,
        captures: &[String],
        trace: &mut Trace,
    ) -> Result<Decision, RouteError> {
        let experiment = ExperimentPath::from_request(path).ok_or_else(|| RouteError::NotFound {
            path: path.as_str().to_string(),
        })?;
        let host = HostName::parse(req.host)?;
        let canonical = rewrite(experiment, &host);
        trace.rewrites += 1;
        tracing::trace!(
            from = path.as_str(),
            to = %canonical.as_url_path(),
            captures = ?captures,
            "experiment path rewritten"
        );
        self.serve(rule, canonical.segments(), canonical.is_directory())
    }

    fn serve(
        &self,
        rule: &RouteRule,
        segments: &[String],
        directory: bool,
    ) -> Result<Decision, RouteError> {
        let resolved =
            assets::resolve_file(&rule.root, segments, directory, &self.settings.index_files)?;
        let mut response = assets::load(&resolved)?;
        if rule.enrich {
            let extra = self.enricher.enrich(&resolved.dir);
            apply_headers(&mut response.headers, extra);
        }
        Ok(Decision::Static(response))
    }
}

fn check_method(method: &str) -> Result<(), RouteError> {
    if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
        Ok(())
    } else {
        Err(RouteError::MethodNotAllowed(method.to_string()))
    }
}

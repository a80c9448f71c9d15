//! Immutable, ordered route table.

use std::path::PathBuf;

use serde::Deserialize;

use crate::config::{AssetsConfig, Config, PatternConfig, RouteConfig};
use crate::error::ConfigError;

use super::pattern::{PathPattern, RequestPath, SegmentPattern};

/// Serving mode selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Serve the path verbatim from the rule's root.
    ServeStatic,
    /// Forward to the upstream application server.
    ProxyDynamic,
    /// Insert the host into the experiment path, then serve from the root.
    RewriteAndServe,
    /// Like `RewriteAndServe` for a literal asset; a missing asset signals
    /// a gateway timeout so the fallback resolver can retry.
    FallbackRetry,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ServeStatic => "serve_static",
            Action::ProxyDynamic => "proxy_dynamic",
            Action::RewriteAndServe => "rewrite_and_serve",
            Action::FallbackRetry => "fallback_retry",
        }
    }

    fn serves_files(&self) -> bool {
        matches!(
            self,
            Action::ServeStatic | Action::RewriteAndServe | Action::FallbackRetry
        )
    }
}

/// A (pattern, action) pair plus the settings static actions need.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: String,
    pub pattern: PathPattern,
    pub action: Action,
    /// On-disk root for static actions.
    pub root: PathBuf,
    /// Whether header metadata is applied to static responses.
    pub enrich: bool,
}

/// Result of a successful classification.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub rule: &'a RouteRule,
    pub captures: Vec<String>,
}

/// Ordered route rules, evaluated top to bottom; first match wins.
///
/// Built once at startup and never mutated, so it is shared across
/// workers behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// Builds the table from `[[routes]]`, or the default table when none
    /// are configured.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.routes.is_empty() {
            return Ok(Self::new(Self::default_rules(&config.assets)?));
        }

        let rules = config
            .routes
            .iter()
            .map(|route| build_rule(route, &config.assets))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// The built-in table, in priority order. Requests matching none of
    /// these fall through to the upstream.
    pub fn default_rules(assets: &AssetsConfig) -> Result<Vec<RouteRule>, ConfigError> {
        let pages = assets.pages_root.clone();
        let index_suffixes = assets
            .index_files
            .iter()
            .map(|f| format!("/{}", f))
            .collect();

        Ok(vec![
            RouteRule {
                name: "resources".to_string(),
                pattern: PathPattern::Prefix("/res".to_string()),
                action: Action::ServeStatic,
                root: assets.resources_root.clone(),
                enrich: false,
            },
            RouteRule {
                name: "index-files".to_string(),
                pattern: PathPattern::Suffix(index_suffixes),
                action: Action::ServeStatic,
                root: pages.clone(),
                enrich: true,
            },
            RouteRule {
                name: "report".to_string(),
                pattern: PathPattern::Prefix("/report".to_string()),
                action: Action::ProxyDynamic,
                root: pages.clone(),
                enrich: false,
            },
            RouteRule {
                name: "python-evaluation".to_string(),
                pattern: PathPattern::Segments(SegmentPattern::parse("/*/*/py-*/")?),
                action: Action::ProxyDynamic,
                root: pages.clone(),
                enrich: false,
            },
            RouteRule {
                name: "experiment-pages".to_string(),
                pattern: PathPattern::Segments(SegmentPattern::parse("/*/*/**/")?),
                action: Action::RewriteAndServe,
                root: pages.clone(),
                enrich: true,
            },
            RouteRule {
                name: "experiment-collector".to_string(),
                pattern: PathPattern::Segments(SegmentPattern::parse("/*/*/**")?),
                action: Action::FallbackRetry,
                root: pages,
                enrich: true,
            },
        ])
    }

    /// Returns the first rule matching the path, or `None` for the
    /// catch-all.
    pub fn classify(&self, path: &RequestPath) -> Option<RouteMatch<'_>> {
        self.rules.iter().find_map(|rule| {
            rule.pattern
                .matches(path)
                .map(|captures| RouteMatch { rule, captures })
        })
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn build_rule(route: &RouteConfig, assets: &AssetsConfig) -> Result<RouteRule, ConfigError> {
    let pattern = match &route.pattern {
        PatternConfig::Any => PathPattern::Any,
        PatternConfig::Exact(value) => PathPattern::Exact(literal(value)?),
        PatternConfig::Prefix(value) => PathPattern::Prefix(literal(value)?),
        PatternConfig::Suffix(values) => {
            if values.is_empty() {
                return Err(ConfigError::InvalidPattern {
                    pattern: route.name.clone(),
                    reason: "suffix list is empty".to_string(),
                });
            }
            PathPattern::Suffix(
                values
                    .iter()
                    .map(|value| literal(value))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        }
        PatternConfig::Segments(value) => PathPattern::Segments(SegmentPattern::parse(value)?),
    };

    Ok(RouteRule {
        name: route.name.clone(),
        pattern,
        action: route.action,
        root: route.root.clone().unwrap_or_else(|| assets.pages_root.clone()),
        enrich: route.enrich.unwrap_or(route.action.serves_files()),
    })
}

fn literal(value: &str) -> Result<String, ConfigError> {
    if value.starts_with('/') {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidPattern {
            pattern: value.to_string(),
            reason: "must start with '/'".to_string(),
        })
    }
}

//! Gateway configuration.
//!
//! Loaded once from a TOML file at startup; every section has defaults so
//! an empty file (or no file) yields a working gateway for local use.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::proxy::FallbackPolicy;
use crate::routes::Action;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub assets: AssetsConfig,
    pub fallback: FallbackConfig,
    pub logging: LoggingConfig,
    /// Ordered route rules. Empty means the built-in table.
    pub routes: Vec<RouteConfig>,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the proxy listens on.
    pub listen: String,
    /// Address of the health endpoint listener.
    pub health_listen: String,
    /// Scheme reported upstream in `X-Forwarded-Proto`.
    pub scheme: String,
    /// Hosts served by this gateway. Empty allows any valid hostname.
    pub allowed_hosts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            health_listen: "0.0.0.0:8081".to_string(),
            scheme: "http".to_string(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// Backend application server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// `host:port`, resolved once at startup.
    pub address: String,
    pub tls: bool,
    /// SNI for TLS upstreams. Defaults to the host part of `address`.
    pub sni: Option<String>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            tls: false,
            sni: None,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 30_000,
        }
    }
}

/// Static asset store layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// Root of `{group}/{experiment}/{host}/{variant}/` directories.
    pub pages_root: PathBuf,
    /// Root that `/res/...` paths are joined onto.
    pub resources_root: PathBuf,
    /// Index files tried, in order, for directory-style requests.
    pub index_files: Vec<String>,
    /// Name of the per-experiment header metadata document.
    pub metadata_file: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            pages_root: PathBuf::from("/www/data/pages"),
            resources_root: PathBuf::from("/www/data"),
            index_files: vec!["index.html".to_string(), "index.js".to_string()],
            metadata_file: "headers.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    pub policy: FallbackPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One entry of the `[[routes]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub name: String,
    pub pattern: PatternConfig,
    pub action: Action,
    /// Asset root for static actions. Defaults to `assets.pages_root`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Apply header metadata to static responses. Defaults to true for
    /// static actions.
    #[serde(default)]
    pub enrich: Option<bool>,
}

/// Route pattern as written in TOML, e.g. `pattern = { prefix = "/res" }`
/// or `pattern = "any"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternConfig {
    Any,
    Exact(String),
    Prefix(String),
    Suffix(Vec<String>),
    Segments(String),
}

impl Config {
    /// Reads and validates a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses and validates TOML config text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        for host in &mut self.server.allowed_hosts {
            *host = host.trim().to_ascii_lowercase();
        }
        self.server.scheme = self.server.scheme.to_ascii_lowercase();
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.server.scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server.scheme must be 'http' or 'https', got '{}'",
                self.server.scheme
            )));
        }
        if self.upstream.address.trim().is_empty() {
            return Err(ConfigError::UpstreamAddress {
                address: self.upstream.address.clone(),
                reason: "address is empty".to_string(),
            });
        }
        if self.upstream.connect_timeout_ms == 0 || self.upstream.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "upstream timeouts must be greater than zero".to_string(),
            ));
        }
        if self.assets.index_files.is_empty() {
            return Err(ConfigError::Invalid(
                "assets.index_files must not be empty".to_string(),
            ));
        }
        for name in self
            .assets
            .index_files
            .iter()
            .chain(std::iter::once(&self.assets.metadata_file))
        {
            if !is_plain_file_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "'{}' must be a plain file name",
                    name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for route in &self.routes {
            if route.name.is_empty() {
                return Err(ConfigError::Invalid("route name must not be empty".to_string()));
            }
            if !seen.insert(route.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate route name '{}'",
                    route.name
                )));
            }
        }
        Ok(())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

//! Pingora-based gateway for experiment pages.
//!
//! Serves per-host experiment pages and shared resources straight from
//! disk, enriching responses with per-directory headers, and proxies
//! everything else to the application server.

mod config;
mod error;
mod health;
mod proxy;
mod routes;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pingora_core::server::Server;
use pingora_core::services::background::background_service;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use health::{HealthService, HealthState};
use proxy::{GatewayProxy, HeaderFileEnricher, Router, RouterSettings, UpstreamTarget};
use routes::RouteTable;

#[derive(Parser, Debug)]
#[command(name = "experiment-gateway")]
#[command(about = "Static experiment page gateway with upstream fallback")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "/etc/experiment-gateway/gateway.toml")]
    config: PathBuf,

    /// Listen address for the gateway (overrides server.listen)
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream application server host:port (overrides upstream.address)
    #[arg(long)]
    upstream: Option<String>,

    /// Experiment pages directory (overrides assets.pages_root)
    #[arg(long)]
    pages_root: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

/// Loads the config file, falling back to defaults when it does not exist.
///
/// Returns whether defaults were used so the caller can log it once
/// tracing is up.
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), true));
    }
    let config = Config::from_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    Ok((config, false))
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(upstream) = &args.upstream {
        config.upstream.address = upstream.clone();
    }
    if let Some(pages_root) = &args.pages_root {
        config.assets.pages_root = pages_root.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    let (plain, json) = if config.logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

fn run() -> Result<Server> {
    let args = Args::parse();

    let (mut config, defaulted) = load_config(&args.config)?;
    apply_overrides(&mut config, &args)?;
    init_tracing(&config);

    if defaulted {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
    }
    tracing::info!("experiment-gateway starting");

    let table = Arc::new(RouteTable::from_config(&config).context("invalid route table")?);
    let enricher = Arc::new(HeaderFileEnricher::new(config.assets.metadata_file.clone()));
    let router = Router::new(table, enricher, RouterSettings::from_config(&config));

    for rule in router.table().rules() {
        tracing::debug!(
            rule = %rule.name,
            pattern = %rule.pattern,
            action = rule.action.as_str(),
            root = %rule.root.display(),
            "route rule loaded"
        );
    }
    tracing::info!(
        rules = router.table().len(),
        fallback = config.fallback.policy.as_str(),
        "route table ready"
    );

    let upstream =
        UpstreamTarget::from_config(&config.upstream).context("invalid upstream address")?;
    tracing::info!(
        backend = %upstream.address(),
        tls = config.upstream.tls,
        "upstream resolved"
    );

    let health_addr: SocketAddr = config
        .server
        .health_listen
        .parse()
        .with_context(|| format!("invalid health listen address {}", config.server.health_listen))?;

    let mut server = Server::new(None).context("failed to create server")?;
    server.bootstrap();

    let gateway = GatewayProxy::new(router, upstream, config.server.scheme.clone());
    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, gateway);
    proxy_service.add_tcp(&config.server.listen);
    tracing::info!(listen = %config.server.listen, "gateway listening");

    let health = background_service(
        "health",
        HealthService::new(health_addr, HealthState::new(config.assets.pages_root.clone())),
    );

    server.add_service(proxy_service);
    server.add_service(health);
    Ok(server)
}

fn main() {
    match run() {
        Ok(server) => server.run_forever(),
        Err(e) => {
            eprintln!("experiment-gateway: {:#}", e);
            std::process::exit(1);
        }
    }
}

//! Upstream application server target and forwarding headers.
//!
//! The gateway talks to exactly one backend. Its address is resolved once
//! at startup; each proxied request gets a fresh peer with the configured
//! timeouts and the client-identifying headers below.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use pingora_core::upstreams::peer::HttpPeer;

use crate::config::UpstreamConfig;
use crate::error::ConfigError;

pub const X_REAL_IP: &str = "X-Real-IP";
pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";
pub const X_FORWARDED_PROTO: &str = "X-Forwarded-Proto";

/// The fixed backend all dynamic requests go to.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    addr: SocketAddr,
    tls: bool,
    sni: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl UpstreamTarget {
    /// Resolves the configured address.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ConfigError> {
        let addr = resolve_backend_address(&config.address).map_err(|reason| {
            ConfigError::UpstreamAddress {
                address: config.address.clone(),
                reason,
            }
        })?;
        let sni = config
            .sni
            .clone()
            .unwrap_or_else(|| extract_sni(&config.address));

        Ok(Self {
            addr,
            tls: config.tls,
            sni,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Creates the peer for one proxied request.
    pub fn to_peer(&self) -> HttpPeer {
        let mut peer = HttpPeer::new(self.addr, self.tls, self.sni.clone());
        peer.options.connection_timeout = Some(self.connect_timeout);
        peer.options.read_timeout = Some(self.read_timeout);
        peer
    }
}

/// Resolves a backend address into a SocketAddr.
///
/// Accepts "IP:PORT" ("192.168.1.1:8080", "[::1]:8080") and "HOST:PORT",
/// which is looked up once. A missing port is an error.
pub fn resolve_backend_address(address: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .to_socket_addrs()
        .map_err(|e| format!("invalid backend address '{}': {}", address, e))?
        .next()
        .ok_or_else(|| format!("backend address '{}' resolved to nothing", address))
}

/// Extracts the SNI (Server Name Indication) from a backend address.
///
/// For "host:port" returns "host".
/// For "[ipv6]:port" returns "ipv6" (without brackets).
pub fn extract_sni(address: &str) -> String {
    if address.starts_with('[') {
        if let Some(end) = address.find(']') {
            return address[1..end].to_string();
        }
    }

    address
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| address.to_string())
}

/// Headers identifying the client to the backend.
///
/// `X-Forwarded-For` extends any chain the client sent. `Host` is not
/// touched; the original value is forwarded as is.
pub fn forwarding_headers(
    existing_forwarded_for: Option<&str>,
    client_ip: Option<IpAddr>,
    scheme: &str,
) -> Vec<(&'static str, String)> {
    let mut headers = Vec::with_capacity(3);

    if let Some(ip) = client_ip {
        headers.push((X_REAL_IP, ip.to_string()));
    }

    let existing = existing_forwarded_for
        .map(str::trim)
        .filter(|chain| !chain.is_empty());
    let chain = match (existing, client_ip) {
        (Some(chain), Some(ip)) => Some(format!("{}, {}", chain, ip)),
        (None, Some(ip)) => Some(ip.to_string()),
        (Some(chain), None) => Some(chain.to_string()),
        (None, None) => None,
    };
    if let Some(chain) = chain {
        headers.push((X_FORWARDED_FOR, chain));
    }

    headers.push((X_FORWARDED_PROTO, scheme.to_string()));
    headers
}

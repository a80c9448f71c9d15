//! Error types for the gateway.
//!
//! `RouteError` covers everything that can go wrong while deciding how to
//! answer a request; `ConfigError` covers startup. Metadata failures live in
//! `proxy::headers` because they never leave the header injector.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while routing or resolving a single request.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid request path '{0}'")]
    BadPath(String),

    #[error("invalid host '{0}'")]
    InvalidHost(String),

    #[error("host '{0}' is not served by this gateway")]
    HostNotAllowed(String),

    #[error("method {0} not allowed on static route")]
    MethodNotAllowed(String),

    #[error("not found: {path}")]
    NotFound { path: String },

    /// Resolution of a static path gave up. Eligible for one fallback retry.
    #[error("gateway timeout resolving {path}")]
    GatewayTimeout { path: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RouteError {
    /// HTTP status code returned to the client for this error.
    pub fn status(&self) -> u16 {
        match self {
            RouteError::BadPath(_) | RouteError::InvalidHost(_) => 400,
            RouteError::NotFound { .. } => 404,
            RouteError::MethodNotAllowed(_) => 405,
            RouteError::HostNotAllowed(_) => 421,
            RouteError::Io { .. } => 500,
            RouteError::GatewayTimeout { .. } => 504,
        }
    }

    /// Text sent to the client. Variants carrying on-disk paths only
    /// report their status; the full error goes to the log.
    pub fn client_message(&self) -> String {
        match self {
            RouteError::NotFound { .. } => "not found".to_string(),
            RouteError::Io { .. } => "internal error".to_string(),
            RouteError::GatewayTimeout { .. } => "gateway timeout".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_gateway_timeout(&self) -> bool {
        matches!(self, RouteError::GatewayTimeout { .. })
    }
}

/// Failure while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid upstream address '{address}': {reason}")]
    UpstreamAddress { address: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RouteError::BadPath("/..".into()).status(), 400);
        assert_eq!(RouteError::InvalidHost("a/b".into()).status(), 400);
        assert_eq!(RouteError::MethodNotAllowed("POST".into()).status(), 405);
        assert_eq!(RouteError::HostNotAllowed("evil.test".into()).status(), 421);
        assert_eq!(
            RouteError::NotFound {
                path: "/a/b/c/".into()
            }
            .status(),
            404
        );
        assert_eq!(
            RouteError::GatewayTimeout {
                path: "/a/b/c".into()
            }
            .status(),
            504
        );
    }

    #[test]
    fn test_only_gateway_timeout_is_retryable() {
        assert!(RouteError::GatewayTimeout { path: "/a".into() }.is_gateway_timeout());
        assert!(!RouteError::NotFound { path: "/a".into() }.is_gateway_timeout());
        assert!(!RouteError::BadPath("/a".into()).is_gateway_timeout());
    }

    #[test]
    fn test_client_message_hides_disk_paths() {
        let not_found = RouteError::NotFound {
            path: "/www/data/pages/g/e/a.test/missing".into(),
        };
        assert_eq!(not_found.client_message(), "not found");

        let io = RouteError::Io {
            path: PathBuf::from("/www/data/pages/a"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!io.client_message().contains("/www"));

        let bad = RouteError::MethodNotAllowed("POST".into());
        assert_eq!(bad.client_message(), bad.to_string());
    }

    #[test]
    fn test_io_error_message_includes_path() {
        let err = RouteError::Io {
            path: PathBuf::from("/www/data/pages/a"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/www/data/pages/a"));
        assert!(msg.contains("denied"));
    }
}

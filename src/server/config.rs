//! Server configuration

use crate::connection::ConnectionSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Certificate chain and private key, both PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// How and where the server listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port to listen on (default: 8080)
    pub port: u16,
    /// Serve HTTPS with these credentials
    pub tls: Option<TlsConfig>,
    /// Show error details and stack traces on 500 pages
    pub debug: bool,
    /// Log one line per request
    pub console_log: bool,
    /// Serve more than one request per connection
    pub keep_alive: bool,
    /// Per-read deadline while keep-alive is on (default: 60s)
    pub timeout: Duration,
    /// Number of concurrent accept loops on the listener (default: 4)
    pub accept_tasks: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            tls: None,
            debug: false,
            console_log: true,
            keep_alive: true,
            timeout: Duration::from_secs(60),
            accept_tasks: 4,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The subset of settings each connection worker needs.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            debug: self.debug,
            console_log: self.console_log,
            keep_alive: self.keep_alive,
            keep_alive_timeout: self.timeout,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.scheme(), "http");
        assert!(config.keep_alive);
        assert_eq!(config.accept_tasks, 4);
    }

    #[test]
    fn test_connection_settings() {
        let config = ServerConfig {
            debug: true,
            keep_alive: false,
            timeout: Duration::from_secs(5),
            tls: Some(TlsConfig::new("c.pem", "k.pem")),
            ..ServerConfig::default()
        };
        let settings = config.connection_settings();
        assert!(settings.debug);
        assert_eq!(settings.read_timeout(), None);
        assert_eq!(config.scheme(), "https");
    }
}

//! Connection target and per-session timing configuration.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// A fixed `ws://` connection target.
///
/// The scheme is always plain `ws`; the driver does not speak TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path sent in the upgrade request.
    pub path: String,
}

impl Endpoint {
    /// Create an endpoint with the default path (`/`).
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
        }
    }

    /// Set the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Parse an endpoint from a `ws://host:port[/path]` string.
    ///
    /// The port defaults to 80 when omitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the scheme is missing or not `ws`, the
    /// host is empty, or the port is not a valid number.
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("ws://")
            .ok_or_else(|| Error::Handshake(format!("Unsupported address (expected ws://): {s}")))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| Error::Handshake(format!("Invalid port in address: {s}")))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        if host.is_empty() {
            return Err(Error::Handshake(format!("Missing host in address: {s}")));
        }

        Ok(Self { host, port, path })
    }

    /// The `host:port` pair used for TCP connect and the Host header.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", 8080)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Timing configuration for one session.
///
/// Defaults reproduce the production cadence: subscribe once per second and
/// tear the connection down five seconds after it opens. Tests shrink these
/// to keep wall-clock time down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Period of the subscribe timer. The first send fires one period after
    /// the connection opens.
    ///
    /// Default: 1 second
    pub send_interval: Duration,

    /// How long after open the close timer fires, regardless of how many
    /// sends have happened.
    ///
    /// Default: 5 seconds
    pub session_duration: Duration,

    /// Upper bound on the whole connect-and-upgrade exchange.
    ///
    /// Default: 10 seconds
    pub handshake_timeout: Duration,

    /// How long to wait for the server's close reply before giving up on a
    /// clean shutdown.
    ///
    /// Default: 1 second
    pub close_grace: Duration,

    /// Maximum size of the handshake response headers in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(1),
            session_duration: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(1),
            max_handshake_size: 8192,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the default cadence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subscribe period.
    #[must_use]
    pub const fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Set the open-to-close duration.
    #[must_use]
    pub const fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the close-reply grace period.
    #[must_use]
    pub const fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Set the maximum handshake response size.
    #[must_use]
    pub const fn with_max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_default() {
        let ep = Endpoint::default();
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.path, "/");
        assert_eq!(ep.to_string(), "ws://localhost:8080/");
    }

    #[test]
    fn test_endpoint_parse_full() {
        let ep = Endpoint::parse("ws://10.0.0.7:9001/stream").unwrap();
        assert_eq!(ep.host, "10.0.0.7");
        assert_eq!(ep.port, 9001);
        assert_eq!(ep.path, "/stream");
        assert_eq!(ep.authority(), "10.0.0.7:9001");
    }

    #[test]
    fn test_endpoint_parse_defaults() {
        let ep = Endpoint::parse("ws://localhost:8080").unwrap();
        assert_eq!(ep.path, "/");

        let ep = Endpoint::parse("ws://example.com/feed").unwrap();
        assert_eq!(ep.port, 80);
        assert_eq!(ep.path, "/feed");
    }

    #[test]
    fn test_endpoint_parse_rejects_bad_scheme() {
        assert!(Endpoint::parse("wss://localhost:8080").is_err());
        assert!(Endpoint::parse("http://localhost:8080").is_err());
        assert!(Endpoint::parse("localhost:8080").is_err());
    }

    #[test]
    fn test_endpoint_parse_rejects_bad_port() {
        assert!(Endpoint::parse("ws://localhost:notaport").is_err());
        assert!(Endpoint::parse("ws://localhost:99999").is_err());
    }

    #[test]
    fn test_endpoint_parse_rejects_empty_host() {
        assert!(Endpoint::parse("ws://:8080").is_err());
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.send_interval, Duration::from_secs(1));
        assert_eq!(config.session_duration, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_handshake_size, 8192);
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new()
            .with_send_interval(Duration::from_millis(50))
            .with_session_duration(Duration::from_millis(275))
            .with_handshake_timeout(Duration::from_secs(2))
            .with_close_grace(Duration::from_millis(100))
            .with_max_handshake_size(4096);

        assert_eq!(config.send_interval, Duration::from_millis(50));
        assert_eq!(config.session_duration, Duration::from_millis(275));
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.close_grace, Duration::from_millis(100));
        assert_eq!(config.max_handshake_size, 4096);
    }
}

//! Signing endpoint configuration.
//!
//! Values come from serde (with defaults for every field) or from the
//! process environment via [`ServerConfig::from_env`]. The authorization
//! token is never serialized.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::warn;
use zeroize::Zeroizing;

/// Environment variable holding the listening port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable holding the expected `Authorization` value.
pub const AUTHORIZATION_ENV: &str = "PKPASSMAKE_AUTHORIZATION";

/// Configuration for the signing endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Listening port (default: 8080, 0 = OS-assigned)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body (default: 512 KiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds allowed to receive a complete request
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Required `Authorization` token. `None` disables the check.
    #[serde(skip)]
    pub authorization: Option<Zeroizing<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            max_connections: default_max_connections(),
            read_timeout_secs: default_read_timeout_secs(),
            authorization: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_connections", &self.max_connections)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ServerConfig {
    /// Defaults overridden by `PORT` and `PKPASSMAKE_AUTHORIZATION`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ServerConfig::from_env`] with a custom variable source.
    ///
    /// An unparsable port is logged and replaced by the default; blank
    /// values count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = non_blank(lookup(PORT_ENV)) {
            match value.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!(
                    "Ignoring invalid {} value {:?}, using {}",
                    PORT_ENV, value, config.port
                ),
            }
        }
        config.authorization = non_blank(lookup(AUTHORIZATION_ENV)).map(Zeroizing::new);
        config
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    512 * 1024
}

fn default_max_connections() -> usize {
    256
}

fn default_read_timeout_secs() -> u64 {
    30
}

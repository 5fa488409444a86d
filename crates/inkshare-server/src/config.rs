//! Server settings from the environment.

use std::net::SocketAddr;
use tracing::warn;

/// Listen address used when `INKSHARE_ADDR` is unset or invalid.
pub const DEFAULT_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3030);

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(DEFAULT_ADDR),
        }
    }
}

impl ServerConfig {
    /// Read `INKSHARE_ADDR` (e.g. `127.0.0.1:4000`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup("INKSHARE_ADDR") {
            match raw.parse() {
                Ok(addr) => config.addr = addr,
                Err(e) => warn!("Ignoring INKSHARE_ADDR={:?}: {}", raw, e),
            }
        }
        config
    }
}

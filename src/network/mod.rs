//! Network module - Talks to the treasure manager over a byte stream
//!
//! Provides:
//! - Transports: TCP connection or a spawned manager process over pipes
//! - Connection: strict request/response framing on one owned stream
//! - Client: session lifecycle and resource commands

mod client;
mod connection;
mod transport;

#[cfg(test)]
pub mod fake_manager;

pub use client::*;
pub use connection::*;
pub use transport::*;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for reaching the manager
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Manager executable to spawn instead of connecting over TCP
    pub executable: Option<PathBuf>,
    /// Working directory for the spawned manager
    pub working_dir: Option<PathBuf>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for each read or write in milliseconds (0 = none)
    pub io_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: crate::protocol::DEFAULT_PORT,
            executable: None,
            working_dir: None,
            connect_timeout_ms: 10_000,
            io_timeout_ms: 10_000,
        }
    }
}

impl NetworkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        match self.io_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let mut addrs = lookup_host((host, port)).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

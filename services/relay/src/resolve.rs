//! Host/port resolution at startup.

use std::io;
use std::net::SocketAddr;

use tracing::debug;

/// Errors raised while starting a server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("resolve {host}:{port}: no addresses found")]
    NoAddress { host: String, port: u16 },

    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolve `host:port` to its first socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, StartupError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| StartupError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;

    let addr = addrs.next().ok_or_else(|| StartupError::NoAddress {
        host: host.to_string(),
        port,
    })?;
    debug!(host, port, %addr, "Resolved address");
    Ok(addr)
}

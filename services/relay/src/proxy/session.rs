//! Proxy sessions: connect to the target, then relay.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use liveline_task::CancelToken;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::connection::{relay_streams, CloseReason, ConnectionSummary};
use super::listener::ConnectionHandler;
use super::policy::RelayPolicy;

/// Errors that end a session before or outside relaying.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: SocketAddr, timeout: Duration },

    #[error("connect to {target} cancelled by shutdown")]
    ConnectCancelled { target: SocketAddr },
}

/// Counters shared by every proxy session of a listener.
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub sessions_relayed: AtomicU64,
    pub connect_failures: AtomicU64,
    pub bytes_to_server: AtomicU64,
    pub bytes_to_client: AtomicU64,
    pub heartbeats_sent: AtomicU64,
    pub idle_closes: AtomicU64,
}

impl ProxyStats {
    fn record(&self, summary: &ConnectionSummary) {
        self.sessions_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_to_server
            .fetch_add(summary.bytes_to_server, Ordering::Relaxed);
        self.bytes_to_client
            .fetch_add(summary.bytes_to_client, Ordering::Relaxed);
        self.heartbeats_sent
            .fetch_add(summary.heartbeats_sent, Ordering::Relaxed);
        if summary.reason == CloseReason::IdleTimeout {
            self.idle_closes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Relays each accepted client to one fixed target.
#[derive(Debug)]
pub struct ProxyHandler {
    target: SocketAddr,
    policy: RelayPolicy,
    stats: Arc<ProxyStats>,
}

impl ProxyHandler {
    pub fn new(target: SocketAddr, policy: RelayPolicy) -> Self {
        Self {
            target,
            policy,
            stats: Arc::new(ProxyStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }

    /// Connect to the target, bounded by the connect timeout and `shutdown`.
    async fn connect(&self, shutdown: &CancelToken) -> Result<TcpStream, SessionError> {
        let limit = self.policy.connect_timeout();
        debug!(target_addr = %self.target, timeout_ms = limit.as_millis() as u64, "Connecting to target");

        let stream =
            bounded_connect(self.target, limit, shutdown, TcpStream::connect(self.target)).await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on target stream");
        }
        Ok(stream)
    }
}

/// Drive `connect` until it finishes, `limit` passes, or `shutdown` fires.
async fn bounded_connect<T, F>(
    target: SocketAddr,
    limit: Duration,
    shutdown: &CancelToken,
    connect: F,
) -> Result<T, SessionError>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(SessionError::ConnectCancelled { target }),
        connected = timeout(limit, connect) => match connected {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(SessionError::Connect { target, source }),
            Err(_) => Err(SessionError::ConnectTimeout { target, timeout: limit }),
        },
    }
}

#[async_trait]
impl ConnectionHandler for ProxyHandler {
    async fn handle(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancelToken,
    ) -> Result<(), SessionError> {
        let server = match self.connect(&shutdown).await {
            Ok(server) => server,
            Err(e) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!(target_addr = %self.target, error = %e, "Target unreachable, closing client");
                let _ = stream.shutdown().await;
                return Err(e);
            }
        };

        debug!(peer_addr = %peer_addr, target_addr = %self.target, "Relaying");
        let summary = relay_streams(stream, server, &self.policy, &shutdown).await;
        self.stats.record(&summary);

        info!(
            reason = %summary.reason,
            bytes_to_server = summary.bytes_to_server,
            bytes_to_client = summary.bytes_to_client,
            heartbeats_sent = summary.heartbeats_sent,
            duration_ms = summary.duration.as_millis() as u64,
            "Connection closed"
        );
        Ok(())
    }
}

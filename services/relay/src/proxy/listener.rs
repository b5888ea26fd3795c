//! TCP listener and connection dispatch.
//!
//! The listener accepts connections in a loop and hands each one to a
//! [`ConnectionHandler`] on its own task, so a slow session never delays the
//! next accept. A semaphore caps concurrent connections; connections over the
//! cap are closed immediately.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use liveline_task::{CancelKind, CancelToken};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use super::session::SessionError;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Largest accepted `max_connections`.
pub const MAX_CONNECTIONS_LIMIT: usize = u32::MAX as usize;

/// Serves one accepted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handle `stream` until the session ends. Cancelling `shutdown` must
    /// end the session promptly.
    async fn handle(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancelToken,
    ) -> Result<(), SessionError>;
}

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Sessions that ended with an error.
    pub sessions_failed: AtomicU64,
    /// Accept errors that were skipped.
    pub accept_errors: AtomicU64,
}

/// A TCP listener dispatching connections to `H`.
pub struct Listener<H> {
    /// Listener configuration.
    config: ListenerConfig,
    /// The TCP listener.
    listener: TcpListener,
    /// Per-connection handler.
    handler: Arc<H>,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Permits held by the semaphore when no session is running.
    permits: u32,
    /// Cancelled to stop accepting and end every session.
    shutdown: CancelToken,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl<H> Listener<H> {
    /// Create a new listener.
    ///
    /// Fails with `InvalidInput` unless `max_connections` is between 1 and
    /// [`MAX_CONNECTIONS_LIMIT`].
    pub async fn bind(config: ListenerConfig, handler: Arc<H>) -> io::Result<Self> {
        let permits = connection_permits(config.max_connections)?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(permits as usize)),
            permits,
            listener,
            config,
            handler,
            shutdown: CancelToken::new(),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Stop accepting and cancel every active session.
    pub fn shutdown(&self) {
        self.shutdown.cancel(CancelKind::Full);
    }

    /// Token cancelled by [`Listener::shutdown`].
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Wait until every spawned session has finished.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.conn_semaphore.acquire_many(self.permits).await {
            drop(all);
        }
    }
}

impl<H: ConnectionHandler> Listener<H> {
    /// Run the listener, accepting and handling connections.
    ///
    /// Returns `Ok(())` after [`Listener::shutdown`], or the accept error
    /// that ended the loop.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(bind_addr = %local_addr, "Listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                Err(e) if is_connection_error(&e) => {
                    self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Accept error, skipping connection");
                }
                Err(e) => {
                    error!(error = %e, "Accept error, stopping listener");
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        // Try to acquire a permit
        let permit = match self.conn_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                return;
            }
        };

        self.stats
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.stats
            .connections_active
            .fetch_add(1, Ordering::Relaxed);

        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);
        let shutdown = self.shutdown.child();

        tokio::spawn(
            async move {
                if let Err(e) = handler.handle(stream, peer_addr, shutdown).await {
                    stats.sessions_failed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        peer_addr = %peer_addr,
                        error = %e,
                        "Session error"
                    );
                }

                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                drop(permit);
            }
            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
        );
    }
}

fn connection_permits(max_connections: usize) -> io::Result<u32> {
    let limit = MAX_CONNECTIONS_LIMIT.min(Semaphore::MAX_PERMITS);
    if max_connections == 0 || max_connections > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("max_connections must be between 1 and {limit}, got {max_connections}"),
        ));
    }
    u32::try_from(max_connections).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Accept errors scoped to a single incoming connection.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

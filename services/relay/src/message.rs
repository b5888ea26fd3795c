//! Framed-message sessions.
//!
//! Each connection is read as `|`-delimited messages. Every read races the
//! per-read timeout: a timeout is logged and the read is retried with the
//! partial message still buffered; end of stream ends the session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use liveline_framing::{MessageReader, DEFAULT_DELIMITER};
use liveline_task::{sleep_for, CancelToken, TaskGroup, Wake};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::proxy::{ConnectionHandler, SessionError};

/// Default per-read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters shared by every message session of a listener.
#[derive(Debug, Default)]
pub struct MessageStats {
    pub received: AtomicU64,
    pub timeouts: AtomicU64,
}

enum ReadOutcome {
    Message(Option<Bytes>),
    TimedOut,
    Abandoned,
}

/// Logs every message received on a connection.
#[derive(Debug)]
pub struct MessageHandler {
    read_timeout: Duration,
    delimiter: u8,
    stats: Arc<MessageStats>,
}

impl MessageHandler {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            delimiter: DEFAULT_DELIMITER,
            stats: Arc::new(MessageStats::default()),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn stats(&self) -> &Arc<MessageStats> {
        &self.stats
    }

    /// Read messages from `stream` until it ends or `shutdown` fires.
    pub async fn serve<S>(&self, stream: S, shutdown: &CancelToken)
    where
        S: AsyncRead + Unpin + Send,
    {
        let mut reader = MessageReader::with_delimiter(stream, self.delimiter);
        let read_timeout = self.read_timeout;

        loop {
            let outcome = {
                let reader = &mut reader;
                TaskGroup::new(shutdown)
                    .push(move |token| async move {
                        ReadOutcome::Message(reader.read_message(&token).await)
                    })
                    .push(move |token| async move {
                        match sleep_for(read_timeout, &token).await {
                            Wake::Elapsed => ReadOutcome::TimedOut,
                            Wake::Cancelled(_) => ReadOutcome::Abandoned,
                        }
                    })
                    .race()
                    .await
            };

            if shutdown.is_cancelled() {
                debug!(buffered = reader.buffered().len(), "message session shut down");
                return;
            }

            match outcome {
                Some((_, ReadOutcome::Message(Some(message)))) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    info!("received: {}", String::from_utf8_lossy(&message));
                }
                Some((_, ReadOutcome::TimedOut)) => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    info!(buffered = reader.buffered().len(), "timed out");
                }
                Some((_, ReadOutcome::Message(None))) | Some((_, ReadOutcome::Abandoned)) | None => {
                    debug!("message stream ended");
                    return;
                }
            }
        }
    }
}

impl Default for MessageHandler {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait]
impl ConnectionHandler for MessageHandler {
    async fn handle(
        &self,
        stream: TcpStream,
        _peer_addr: SocketAddr,
        shutdown: CancelToken,
    ) -> Result<(), SessionError> {
        self.serve(stream, &shutdown).await;
        Ok(())
    }
}

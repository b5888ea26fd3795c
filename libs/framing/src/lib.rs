//! Delimiter-framed message reading.
//!
//! A [`MessageReader`] owns one stream for its lifetime and turns it into a
//! sequence of messages separated by a single delimiter byte (`|` unless
//! configured otherwise). The delimiter is consumed but never delivered.
//!
//! Reads are cancellable without damaging the stream: the token passed to
//! [`MessageReader::read_message`] is observed through a
//! [`CancelFilter::Downgrade`] child, so even a full cancellation only
//! abandons the current wait. Bytes already received stay buffered and are
//! delivered by a later call.
//!
//! ```ignore
//! let mut reader = MessageReader::new(stream);
//! let session = CancelToken::new();
//!
//! let outcome = TaskGroup::new(&session)
//!     .push(|token| async move { Some(reader.read_message(&token).await) })
//!     .push(|token| async move { sleep_for(timeout, &token).await; None })
//!     .race()
//!     .await;
//! ```

use bytes::{Bytes, BytesMut};
use liveline_task::{CancelFilter, CancelToken};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Delimiter used by the line protocol.
pub const DEFAULT_DELIMITER: u8 = b'|';

/// Minimum free capacity reserved before each read.
const READ_RESERVE: usize = 1024;

/// Reads delimiter-terminated messages from a stream.
#[derive(Debug)]
pub struct MessageReader<S> {
    stream: S,
    buffer: BytesMut,
    delimiter: u8,
}

impl<S> MessageReader<S>
where
    S: AsyncRead + Unpin,
{
    /// Create a reader using [`DEFAULT_DELIMITER`].
    pub fn new(stream: S) -> Self {
        Self::with_delimiter(stream, DEFAULT_DELIMITER)
    }

    /// Create a reader for a custom delimiter byte.
    pub fn with_delimiter(stream: S, delimiter: u8) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_RESERVE),
            delimiter,
        }
    }

    /// Read the next message.
    ///
    /// Returns `None` when the stream has ended (EOF or read error) or when
    /// `cancel` was triggered during the call. A cancelled call leaves every
    /// received byte in the buffer. Undelimited bytes left at EOF are never
    /// delivered.
    pub async fn read_message(&mut self, cancel: &CancelToken) -> Option<Bytes> {
        // Dropped on return, which restores unfiltered cancellation for the
        // next call.
        let scoped = cancel.child_with_filter(CancelFilter::Downgrade);

        loop {
            if let Some(kind) = scoped.requested() {
                trace!(?kind, buffered = self.buffer.len(), "message read abandoned");
                return None;
            }

            if let Some(message) = self.take_message() {
                return Some(message);
            }

            self.buffer.reserve(READ_RESERVE);
            let read = tokio::select! {
                biased;
                _ = scoped.cancelled() => None,
                read = self.stream.read_buf(&mut self.buffer) => Some(read),
            };

            match read {
                // Re-checked at the top of the loop.
                None => continue,
                Some(Ok(0)) => {
                    if !self.buffer.is_empty() {
                        debug!(
                            discarded = self.buffer.len(),
                            "stream ended with an undelimited message"
                        );
                    }
                    return None;
                }
                Some(Ok(n)) => {
                    trace!(bytes = n, buffered = self.buffer.len(), "read message bytes");
                }
                Some(Err(e)) => {
                    debug!(error = %e, "message stream read failed");
                    return None;
                }
            }
        }
    }

    /// Read the next message without an external cancellation source.
    pub async fn next_message(&mut self) -> Option<Bytes> {
        self.read_message(&CancelToken::new()).await
    }

    fn take_message(&mut self) -> Option<Bytes> {
        let end = self.buffer.iter().position(|&b| b == self.delimiter)?;
        let mut message = self.buffer.split_to(end + 1);
        message.truncate(end);
        Some(message.freeze())
    }
}

impl<S> MessageReader<S> {
    /// Bytes received but not yet delivered as a message.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

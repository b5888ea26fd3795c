//! Per-connection shared state and the relay task group.
//!
//! A [`Connection`] is shared by reference between the tasks relaying one
//! client/target pair:
//!
//! ```text
//! client ──> relay (client→server) ──> target
//! client <── relay or heartbeat (server→client) <── target
//!            watchdog (reads the shared deadline)
//! ```
//!
//! The tasks run as one [`TaskGroup`] inside the session's own task, so the
//! streams and the connection outlive every task by construction. The first
//! task to reach a terminal state closes the connection through a one-shot
//! gate; the group then cancels and drains the others.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use liveline_task::{CancelKind, CancelToken, TaskGroup};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use super::heartbeat::relay_with_heartbeat;
use super::policy::RelayPolicy;
use super::relay::relay;
use super::watchdog::watchdog;

/// One direction of a relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Why a connection (or one of its tasks) stopped.
///
/// These are terminal signals, not errors: every variant ends the
/// connection through the same teardown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The source of a direction reached end of stream.
    Eof(Direction),
    /// Reading from the source of a direction failed.
    ReadFailed(Direction, io::ErrorKind),
    /// Writing to the destination of a direction failed.
    WriteFailed(Direction, io::ErrorKind),
    /// A single read exceeded the configured read timeout.
    ReadTimeout(Direction),
    /// A single write exceeded the configured write timeout.
    WriteTimeout(Direction),
    /// The watchdog saw no liveness refresh before the deadline.
    IdleTimeout,
    /// The task was cancelled from outside (sibling exit or shutdown).
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Eof(dir) => write!(f, "{dir} reached end of stream"),
            CloseReason::ReadFailed(dir, kind) => write!(f, "{dir} read failed: {kind}"),
            CloseReason::WriteFailed(dir, kind) => write!(f, "{dir} write failed: {kind}"),
            CloseReason::ReadTimeout(dir) => write!(f, "{dir} read timed out"),
            CloseReason::WriteTimeout(dir) => write!(f, "{dir} write timed out"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A monotonic timestamp that can only move forward.
///
/// Stored as nanoseconds past a fixed origin so it can be shared across
/// tasks without a lock.
#[derive(Debug)]
pub struct Deadline {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl Deadline {
    /// Create a deadline at `at`.
    pub fn new(at: Instant) -> Self {
        let origin = Instant::now();
        let deadline = Self {
            origin,
            offset_nanos: AtomicU64::new(0),
        };
        deadline.extend_to(at);
        deadline
    }

    /// Current deadline.
    pub fn get(&self) -> Instant {
        self.origin + Duration::from_nanos(self.offset_nanos.load(Ordering::Acquire))
    }

    /// Move the deadline to `at` if that is later than the current value.
    pub fn extend_to(&self, at: Instant) {
        let offset = at.saturating_duration_since(self.origin).as_nanos();
        let offset = u64::try_from(offset).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_max(offset, Ordering::AcqRel);
    }
}

/// Shared state of one relayed connection.
#[derive(Debug)]
pub struct Connection {
    idle_timeout: Duration,
    deadline: Deadline,
    /// Consecutive heartbeats since the last real upstream data.
    heartbeat_count: AtomicU64,
    heartbeats_sent: AtomicU64,
    bytes_to_server: AtomicU64,
    bytes_to_client: AtomicU64,
    closed: AtomicBool,
    close_reason: OnceLock<CloseReason>,
    cancel: CancelToken,
}

impl Connection {
    /// Create connection state whose tasks are cancelled with `parent`.
    ///
    /// The deadline starts one idle period from now.
    pub fn new(idle_timeout: Duration, parent: &CancelToken) -> Self {
        Self {
            idle_timeout,
            deadline: Deadline::new(Instant::now() + idle_timeout),
            heartbeat_count: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            bytes_to_server: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            close_reason: OnceLock::new(),
            cancel: parent.child(),
        }
    }

    /// Push the deadline to at least one idle period from now.
    pub fn refresh(&self) {
        self.deadline.extend_to(Instant::now() + self.idle_timeout);
    }

    pub fn deadline(&self) -> Instant {
        self.deadline.get()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Close the connection. Returns `true` only for the first caller.
    ///
    /// The first reason is kept and every task of the connection is
    /// cancelled.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.close_reason.set(reason);
        self.cancel.cancel(CancelKind::Full);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Count one more consecutive heartbeat and return the new count.
    pub fn next_heartbeat(&self) -> u64 {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.heartbeat_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Real upstream data arrived.
    pub fn reset_heartbeats(&self) {
        self.heartbeat_count.store(0, Ordering::Release);
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count.load(Ordering::Acquire)
    }

    pub(crate) fn record_bytes(&self, direction: Direction, n: usize) {
        let counter = match direction {
            Direction::ClientToServer => &self.bytes_to_server,
            Direction::ServerToClient => &self.bytes_to_client,
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn summary(&self, started: Instant) -> ConnectionSummary {
        ConnectionSummary {
            reason: self.close_reason().unwrap_or(CloseReason::Cancelled),
            bytes_to_server: self.bytes_to_server.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            duration: started.elapsed(),
        }
    }
}

/// What happened over the lifetime of a relayed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// First terminal event.
    pub reason: CloseReason,
    /// Relayed bytes, client to server.
    pub bytes_to_server: u64,
    /// Relayed bytes, server to client. Heartbeats are not included.
    pub bytes_to_client: u64,
    /// Synthetic heartbeat frames written to the client.
    pub heartbeats_sent: u64,
    pub duration: Duration,
}

/// Relay between an accepted client and a connected target until the first
/// terminal event, then tear both streams down.
///
/// Runs the client→server relay, the server→client relay (or heartbeat
/// emitter when enabled) and the watchdog together. Cancelling `shutdown`
/// ends the connection as well.
pub async fn relay_streams<C, S>(
    mut client: C,
    mut server: S,
    policy: &RelayPolicy,
    shutdown: &CancelToken,
) -> ConnectionSummary
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let started = Instant::now();
    let conn = Connection::new(policy.idle_timeout, shutdown);

    {
        let (client_read, client_write) = tokio::io::split(&mut client);
        let (server_read, server_write) = tokio::io::split(&mut server);
        let conn = &conn;

        let ended = TaskGroup::new(conn.cancel_token())
            .push(move |token| async move {
                let reason = relay(
                    client_read,
                    server_write,
                    Direction::ClientToServer,
                    conn,
                    policy,
                    &token,
                )
                .await;
                conn.close(reason);
            })
            .push(move |token| async move {
                let reason = match policy.heartbeat_interval {
                    Some(interval) => {
                        relay_with_heartbeat(server_read, client_write, interval, conn, policy, &token)
                            .await
                    }
                    None => {
                        relay(
                            server_read,
                            client_write,
                            Direction::ServerToClient,
                            conn,
                            policy,
                            &token,
                        )
                        .await
                    }
                };
                conn.close(reason);
            })
            .push(move |token| async move {
                let reason = watchdog(conn, &token).await;
                conn.close(reason);
            })
            .join()
            .await;

        debug!(task = ?ended, reason = ?conn.close_reason(), "relay tasks finished");
    }

    // Every task has exited; the streams are released exactly once here.
    conn.close(CloseReason::Cancelled);
    let _ = client.shutdown().await;
    let _ = server.shutdown().await;
    drop(client);
    drop(server);

    conn.summary(started)
}

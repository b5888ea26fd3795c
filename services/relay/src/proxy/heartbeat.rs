//! Server-to-client relay with synthetic heartbeats.
//!
//! Each cycle races one upstream read against the heartbeat interval:
//!
//! - read lands first: the heartbeat count resets and the bytes go to the
//!   client unchanged;
//! - interval elapses first: the read is abandoned with a partial cancel
//!   (no bytes are consumed) and `<heartbeat N>\r\n` is written instead.
//!
//! Only a failed read or write ends the direction. A silent upstream never
//! does.

use std::time::Duration;

use liveline_task::{sleep_for, CancelKind, CancelToken, TaskGroup, Wake};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::connection::{CloseReason, Connection, Direction};
use super::policy::RelayPolicy;
use super::relay::{read_chunk, write_chunk};

const DIRECTION: Direction = Direction::ServerToClient;

/// Build the heartbeat frame for the `count`-th consecutive heartbeat.
pub fn heartbeat_frame(count: u64) -> Vec<u8> {
    format!("<heartbeat {count}>\r\n").into_bytes()
}

/// Relay `upstream` to `client`, injecting a heartbeat whenever upstream
/// stays silent for `interval`.
///
/// The connection deadline is refreshed when a new upstream read starts
/// after real data, not when an abandoned read is re-issued after a
/// heartbeat, so heartbeats alone do not keep an idle connection open.
pub async fn relay_with_heartbeat<R, W>(
    mut upstream: R,
    mut client: W,
    interval: Duration,
    conn: &Connection,
    policy: &RelayPolicy,
    cancel: &CancelToken,
) -> CloseReason
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; policy.chunk_size.max(1)];
    let mut fresh_read = true;

    loop {
        if fresh_read {
            conn.refresh();
        }

        // The read stores its result here even if it completes after the
        // timer, so data that lands during cancellation is never dropped.
        let mut landed: Option<Result<usize, CloseReason>> = None;
        {
            let slot = &mut landed;
            let source = &mut upstream;
            let chunk = &mut buf[..];

            TaskGroup::new(cancel)
                .cancel_losers_with(CancelKind::Partial)
                .push(move |token| async move {
                    match read_chunk(source, chunk, None, DIRECTION, &token).await {
                        Err(CloseReason::Cancelled) => {}
                        result => *slot = Some(result),
                    }
                })
                .push(move |token| async move {
                    if let Wake::Cancelled(kind) = sleep_for(interval, &token).await {
                        trace!(?kind, "heartbeat timer abandoned");
                    }
                })
                .join()
                .await;
        }

        if cancel.is_cancelled() {
            return CloseReason::Cancelled;
        }

        match landed {
            Some(Ok(n)) => {
                conn.reset_heartbeats();
                if let Err(reason) =
                    write_chunk(&mut client, &buf[..n], policy.write_timeout, DIRECTION, cancel).await
                {
                    return reason;
                }
                conn.record_bytes(DIRECTION, n);
                fresh_read = true;
            }
            Some(Err(reason)) => return reason,
            None => {
                let count = conn.next_heartbeat();
                debug!(count, "upstream silent, sending heartbeat");
                let frame = heartbeat_frame(count);
                if let Err(reason) =
                    write_chunk(&mut client, &frame, policy.write_timeout, DIRECTION, cancel).await
                {
                    return reason;
                }
                fresh_read = false;
            }
        }
    }
}

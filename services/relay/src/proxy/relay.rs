//! Single-direction copy loop.

use std::time::Duration;

use liveline_task::CancelToken;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::connection::{CloseReason, Connection, Direction};
use super::policy::RelayPolicy;

/// Copy `source` to `destination` one chunk at a time until a read or write
/// fails, a per-operation timeout expires, or `cancel` fires.
///
/// The connection deadline is refreshed before every read, so a read that is
/// merely in progress still counts as liveness. At most one chunk is in
/// flight: a slow destination stalls the next read.
pub async fn relay<R, W>(
    mut source: R,
    mut destination: W,
    direction: Direction,
    conn: &Connection,
    policy: &RelayPolicy,
    cancel: &CancelToken,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; policy.chunk_size.max(1)];

    loop {
        conn.refresh();

        let n = match read_chunk(&mut source, &mut buf, policy.read_timeout, direction, cancel).await {
            Ok(n) => n,
            Err(reason) => return reason,
        };

        if let Err(reason) =
            write_chunk(&mut destination, &buf[..n], policy.write_timeout, direction, cancel).await
        {
            return reason;
        }

        conn.record_bytes(direction, n);
        trace!(%direction, bytes = n, "relayed chunk");
    }
}

/// Read once into `buf`. End of stream is reported as a close reason.
pub(crate) async fn read_chunk<R>(
    source: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
    direction: Direction,
    cancel: &CancelToken,
) -> Result<usize, CloseReason>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, source.read(buf)).await.ok(),
            None => Some(source.read(buf).await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloseReason::Cancelled),
        read = read => match read {
            None => Err(CloseReason::ReadTimeout(direction)),
            Some(Ok(0)) => Err(CloseReason::Eof(direction)),
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(CloseReason::ReadFailed(direction, e.kind())),
        },
    }
}

/// Write all of `data`, retrying short writes internally.
pub(crate) async fn write_chunk<W>(
    destination: &mut W,
    data: &[u8],
    timeout: Option<Duration>,
    direction: Direction,
    cancel: &CancelToken,
) -> Result<(), CloseReason>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        let write_all = async {
            destination.write_all(data).await?;
            destination.flush().await
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, write_all).await.ok(),
            None => Some(write_all.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloseReason::Cancelled),
        write = write => match write {
            None => Err(CloseReason::WriteTimeout(direction)),
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(CloseReason::WriteFailed(direction, e.kind())),
        },
    }
}

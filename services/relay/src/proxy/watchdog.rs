//! Idle watchdog.
//!
//! Sleeps until the connection deadline. On waking, a deadline that has
//! moved into the future means some direction refreshed it in the meantime
//! and the watchdog re-arms; otherwise the connection has been idle for a
//! full period and the watchdog reports [`CloseReason::IdleTimeout`].

use liveline_task::{sleep_until, CancelToken, Wake};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::connection::{CloseReason, Connection};

/// Watch `conn` until it goes idle or `cancel` fires.
pub async fn watchdog(conn: &Connection, cancel: &CancelToken) -> CloseReason {
    loop {
        let armed_at = conn.deadline();

        if let Wake::Cancelled(_) = sleep_until(armed_at, cancel).await {
            return CloseReason::Cancelled;
        }

        // Closed for another reason while asleep.
        if conn.is_closed() {
            return CloseReason::Cancelled;
        }

        let deadline = conn.deadline();
        if deadline > Instant::now() {
            trace!(
                extended_by_ms = deadline.saturating_duration_since(armed_at).as_millis() as u64,
                "watchdog re-armed"
            );
            continue;
        }

        debug!(idle_timeout_ms = conn.idle_timeout().as_millis() as u64, "connection idle");
        return CloseReason::IdleTimeout;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use liveline_task::CancelKind;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_refresh() {
        let conn = Connection::new(Duration::from_secs(5), &CancelToken::new());
        let start = Instant::now();

        let reason = watchdog(&conn, conn.cancel_token()).await;

        assert_eq!(reason, CloseReason::IdleTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_refresh() {
        let conn = Connection::new(Duration::from_secs(5), &CancelToken::new());
        let start = Instant::now();

        let refresher = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            conn.refresh();
        };
        let (reason, ()) = tokio::join!(watchdog(&conn, conn.cancel_token()), refresher);

        assert_eq!(reason, CloseReason::IdleTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_cancelled() {
        let conn = Connection::new(Duration::from_secs(5), &CancelToken::new());
        let cancel = conn.cancel_token().child();

        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel(CancelKind::Full);
        };
        let (reason, ()) = tokio::join!(watchdog(&conn, &cancel), canceller);

        assert_eq!(reason, CloseReason::Cancelled);
        assert!(!conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_act_on_closed_connection() {
        let conn = Connection::new(Duration::from_secs(5), &CancelToken::new());
        // A token that is never cancelled, so only the closed check can stop
        // the watchdog from reporting idleness.
        let detached = CancelToken::new();

        let closer = async {
            tokio::time::sleep(Duration::from_millis(4_900)).await;
            conn.close(CloseReason::Eof(crate::proxy::Direction::ClientToServer));
        };
        let (reason, ()) = tokio::join!(watchdog(&conn, &detached), closer);

        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(
            conn.close_reason(),
            Some(CloseReason::Eof(crate::proxy::Direction::ClientToServer))
        );
    }
}

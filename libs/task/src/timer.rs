//! Cancellable timer waits.

use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::{CancelKind, CancelToken};

/// How a timer wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The deadline was reached.
    Elapsed,
    /// The wait was abandoned before the deadline.
    Cancelled(CancelKind),
}

/// Sleep until `deadline`, or until `cancel` is triggered.
///
/// A cancellation that is already pending wins over an elapsed deadline.
pub async fn sleep_until(deadline: Instant, cancel: &CancelToken) -> Wake {
    tokio::select! {
        biased;
        kind = cancel.cancelled() => Wake::Cancelled(kind),
        _ = tokio::time::sleep_until(deadline) => Wake::Elapsed,
    }
}

/// Sleep for `duration`, or until `cancel` is triggered.
pub async fn sleep_for(duration: Duration, cancel: &CancelToken) -> Wake {
    sleep_until(Instant::now() + duration, cancel).await
}

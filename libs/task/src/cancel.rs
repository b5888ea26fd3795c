//! Cancellation tokens with two strengths.
//!
//! A [`CancelToken`] carries a request that can be either
//! [`CancelKind::Partial`] (stop waiting for the current result, keep the
//! underlying resource) or [`CancelKind::Full`] (tear the resource down as
//! well). Tokens form a tree: requests flow from a parent to every child,
//! optionally through a [`CancelFilter`] installed on the child.
//!
//! ```ignore
//! let session = CancelToken::new();
//! let read = session.child_with_filter(CancelFilter::Downgrade);
//!
//! session.cancel(CancelKind::Full);
//! assert_eq!(read.requested(), Some(CancelKind::Partial));
//! ```

use tokio_util::sync::CancellationToken;

/// Strength of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CancelKind {
    /// Abandon the pending wait; the underlying resource stays usable.
    Partial,
    /// Abandon the pending wait and tear down the underlying resource.
    Full,
}

/// Mapping applied to requests arriving from a parent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelFilter {
    /// Forward requests unchanged.
    #[default]
    PassThrough,
    /// Forward every request as [`CancelKind::Partial`].
    Downgrade,
}

impl CancelFilter {
    /// Apply the filter to an incoming request.
    pub fn apply(self, requested: CancelKind) -> CancelKind {
        match self {
            CancelFilter::PassThrough => requested,
            CancelFilter::Downgrade => CancelKind::Partial,
        }
    }
}

/// Cloneable handle to one node of a cancellation tree.
///
/// Each strength is its own [`CancellationToken`] chain: `any` fires for
/// every request, `full` only for [`CancelKind::Full`]. A downgrading child
/// hangs its `any` below the parent's `any` and starts a fresh `full`, so a
/// parent's full request arrives as partial.
///
/// Clones share the same node; use [`CancelToken::child`] to get a token
/// that can be cancelled independently of its parent.
#[derive(Clone, Default)]
pub struct CancelToken {
    any: CancellationToken,
    full: CancellationToken,
    filter: CancelFilter,
}

impl CancelToken {
    /// Create a root token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child that receives every request sent to this token.
    pub fn child(&self) -> Self {
        self.child_with_filter(CancelFilter::PassThrough)
    }

    /// Derive a child whose incoming requests pass through `filter`.
    ///
    /// If this token is already cancelled the child starts cancelled with
    /// the filtered strength.
    pub fn child_with_filter(&self, filter: CancelFilter) -> Self {
        let full = match filter {
            CancelFilter::PassThrough => self.full.child_token(),
            CancelFilter::Downgrade => CancellationToken::new(),
        };
        Self {
            any: self.any.child_token(),
            full,
            filter,
        }
    }

    /// Request cancellation. A weaker request never lowers a stronger one.
    pub fn cancel(&self, kind: CancelKind) {
        // `full` first, so a waiter woken through `any` sees the strength.
        if kind == CancelKind::Full {
            self.full.cancel();
        }
        self.any.cancel();
    }

    /// The strongest request received so far, if any.
    pub fn requested(&self) -> Option<CancelKind> {
        if self.full.is_cancelled() {
            Some(CancelKind::Full)
        } else if self.any.is_cancelled() {
            Some(CancelKind::Partial)
        } else {
            None
        }
    }

    /// Whether any cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.any.is_cancelled()
    }

    /// Wait until cancellation is requested and report its strength.
    ///
    /// The strength is sampled when the wait completes; it may be
    /// escalated afterwards.
    pub async fn cancelled(&self) -> CancelKind {
        self.any.cancelled().await;
        self.requested().unwrap_or(CancelKind::Partial)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("requested", &self.requested())
            .field("filter", &self.filter)
            .finish()
    }
}

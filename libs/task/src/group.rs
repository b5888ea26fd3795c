//! Structured "first of N" task groups.
//!
//! A [`TaskGroup`] runs a fixed set of operations concurrently inside the
//! calling task. When the first one completes, every other operation is
//! cancelled through its own [`CancelToken`] and then driven to completion,
//! so no work started by the group outlives the call.
//!
//! Two ways to finish a group:
//!
//! - [`TaskGroup::race`]: the winner's index and value are the result.
//! - [`TaskGroup::join`]: any termination ends the group; only the index of
//!   the operation that ended it is reported.
//!
//! Operations are plain futures (no `tokio::spawn`), so they may borrow
//! from the caller. Every operation must observe its token; a loser that
//! ignores cancellation keeps the group waiting.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tracing::trace;

use crate::cancel::{CancelKind, CancelToken};

struct Member<'a, T> {
    token: CancelToken,
    future: BoxFuture<'a, T>,
}

/// A set of cancellable operations that finishes on the first completion.
pub struct TaskGroup<'a, T> {
    scope: CancelToken,
    loser_cancel: CancelKind,
    members: Vec<Member<'a, T>>,
}

impl<'a, T: Send + 'a> TaskGroup<'a, T> {
    /// Create a group whose operations are children of `parent`.
    ///
    /// Cancelling `parent` cancels every operation in the group.
    pub fn new(parent: &CancelToken) -> Self {
        Self {
            scope: parent.child(),
            loser_cancel: CancelKind::Full,
            members: Vec::new(),
        }
    }

    /// Strength used to cancel the operations that did not finish first.
    pub fn cancel_losers_with(mut self, kind: CancelKind) -> Self {
        self.loser_cancel = kind;
        self
    }

    /// Add an operation. It receives the token it must observe.
    pub fn push<F, Fut>(mut self, op: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = T> + Send + 'a,
    {
        let token = self.scope.child();
        let future = op(token.clone()).boxed();
        self.members.push(Member { token, future });
        self
    }

    /// Run every operation and return the first to complete.
    ///
    /// Returns `None` for an empty group.
    pub async fn race(self) -> Option<(usize, T)> {
        self.first_completion().await
    }

    /// Run every operation until any one of them terminates.
    ///
    /// Returns the index of the terminating operation, or `None` for an
    /// empty group.
    pub async fn join(self) -> Option<usize> {
        self.first_completion().await.map(|(index, _)| index)
    }

    async fn first_completion(self) -> Option<(usize, T)> {
        let Self {
            scope: _scope,
            loser_cancel,
            members,
        } = self;

        let mut tokens = Vec::with_capacity(members.len());
        let mut running = FuturesUnordered::new();
        for (index, member) in members.into_iter().enumerate() {
            tokens.push(member.token);
            running.push(member.future.map(move |output| (index, output)));
        }

        let (winner, output) = running.next().await?;
        trace!(winner, remaining = running.len(), "task group settled");

        for (index, token) in tokens.iter().enumerate() {
            if index != winner {
                token.cancel(loser_cancel);
            }
        }

        // Losers must acknowledge cancellation before the group is done.
        while let Some((index, _)) = running.next().await {
            trace!(index, "task group member finished after cancellation");
        }

        Some((winner, output))
    }
}

impl<T> std::fmt::Debug for TaskGroup<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("members", &self.members.len())
            .field("loser_cancel", &self.loser_cancel)
            .finish()
    }
}

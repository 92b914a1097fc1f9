//! Request cancellation scopes.
//!
//! A [`RequestScope`] bundles a [`CancellationToken`] with an optional
//! deadline. It is the messenger by which everything working on behalf of a
//! request — the work loop, the deliverer serving it, and any recursive
//! base-template requests spawned for it — learns that the originating caller
//! has given up.
//!
//! Scopes form a tree: [`RequestScope::child`] derives a scope that fires when
//! its parent fires (or when the child's own guard drops), while
//! [`RequestScope::bounded`] additionally tightens the deadline to the earlier
//! of the parent's deadline and a configured global timeout.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::CacheError;

/// Cancellation handle for a single request.
///
/// Cloning a scope shares the underlying token: cancelling any clone fires
/// them all. A scope with neither a deadline nor a cancelled token never
/// fires.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// A scope that never fires on its own. Cancel it explicitly via
    /// [`RequestScope::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope that fires once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A scope that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A scope driven by an externally owned token, with no deadline.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Fire the scope. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the scope has fired, for either reason.
    pub fn is_fired(&self) -> bool {
        self.fire_reason().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the scope has fired, if it has.
    ///
    /// The deadline is checked before the token: when a deadline-driven early
    /// return also cancels the derived token, downstream observers must still
    /// classify the abort as deadline-exceeded.
    pub(crate) fn fire_reason(&self) -> Option<CacheError> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Some(CacheError::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Some(CacheError::Canceled);
        }
        None
    }

    /// Resolve when the scope fires, yielding the cancellation-family error
    /// describing why. Pending forever for a scope that cannot fire.
    ///
    /// Cancel-safe: safe to recreate on every `select!` iteration.
    pub(crate) async fn fired(&self) -> CacheError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => CacheError::DeadlineExceeded,
                    _ = self.token.cancelled() => {
                        self.fire_reason().unwrap_or(CacheError::Canceled)
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                CacheError::Canceled
            }
        }
    }

    /// Derive a child scope that fires when this scope fires, inheriting the
    /// deadline. The returned guard cancels the child when dropped, so a
    /// worker holding the child cannot outlive the operation it serves.
    pub(crate) fn child(&self) -> (RequestScope, DropGuard) {
        let token = self.token.child_token();
        let guard = token.clone().drop_guard();
        (
            RequestScope {
                token,
                deadline: self.deadline,
            },
            guard,
        )
    }

    /// Derive the effective scope for one `get` call: a child of this scope
    /// whose deadline is the earlier of the caller's deadline and
    /// `now + global_timeout`.
    pub(crate) fn bounded(&self, global_timeout: Option<Duration>) -> (RequestScope, DropGuard) {
        let (mut scope, guard) = self.child();
        if let Some(timeout) = global_timeout {
            let global_deadline = Instant::now() + timeout;
            scope.deadline = Some(match scope.deadline {
                Some(deadline) => deadline.min(global_deadline),
                None => global_deadline,
            });
        }
        (scope, guard)
    }
}

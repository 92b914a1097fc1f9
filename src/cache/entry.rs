//! Per-name memoization slots.
//!
//! A [`CacheEntry`] coordinates one parser and any number of deliverers for a
//! single template name. Two signals drive it:
//!
//! - the **outcome watch** is the one-shot ready broadcast: the parser
//!   publishes the terminal result exactly once, and every present or future
//!   deliverer observes the same value. The watch send provides the
//!   release-acquire edge that makes the parser's writes visible.
//! - the **retry semaphore** holds at most one permit. A parser that aborts
//!   on a transient cancellation adds the permit instead of publishing an
//!   outcome; exactly one waiting deliverer claims it and starts the next
//!   parse. Because a permit is only added by the parser that just exited,
//!   and a new parser only starts after the permit is claimed, the entry
//!   never has two parsers in flight.

use tokio::sync::{Semaphore, watch};

use crate::error::CacheError;
use crate::schematic::TemplateSchematic;

/// Terminal result published for an entry: the compiled artifact or the
/// cached per-name error.
pub(crate) type EntryOutcome<A> = Result<A, CacheError>;

/// Runtime cache slot for a single template name.
pub(crate) struct CacheEntry<A> {
    /// Snapshot of the schematic taken when the entry was allocated. `None`
    /// when the name had no schematic; the parser converts that into a
    /// cached `SchematicNotFound`.
    schematic: Option<TemplateSchematic>,
    outcome: watch::Sender<Option<EntryOutcome<A>>>,
    retry: Semaphore,
}

impl<A> CacheEntry<A> {
    pub(crate) fn new(schematic: Option<TemplateSchematic>) -> Self {
        Self {
            schematic,
            outcome: watch::Sender::new(None),
            retry: Semaphore::new(0),
        }
    }

    pub(crate) fn schematic(&self) -> Option<&TemplateSchematic> {
        self.schematic.as_ref()
    }

    /// Publish the terminal outcome. Called once per entry, by the parser
    /// that reached a terminal state.
    pub(crate) fn complete(&self, outcome: EntryOutcome<A>) {
        self.outcome.send_replace(Some(outcome));
    }

    /// Make the entry eligible for one more parse attempt. Drops the signal
    /// if a retry is already pending.
    pub(crate) fn signal_retry(&self) {
        if self.retry.available_permits() == 0 {
            self.retry.add_permits(1);
        }
    }

    /// Subscribe to the outcome broadcast. A receiver created after the
    /// outcome was published still observes it.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<EntryOutcome<A>>> {
        self.outcome.subscribe()
    }

    /// Resolve when this caller wins the pending retry, consuming it. At most
    /// one caller resolves per [`CacheEntry::signal_retry`].
    ///
    /// Cancel-safe: losing a `select!` race does not consume the permit.
    pub(crate) async fn claim_retry(&self) {
        match self.retry.acquire().await {
            Ok(permit) => permit.forget(),
            // The semaphore is never closed; park forever rather than letting
            // a deliverer mistake closure for a won retry.
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn outcome_is_visible_to_late_subscribers() {
        let entry: CacheEntry<u32> = CacheEntry::new(None);
        entry.complete(Ok(7));

        let mut rx = entry.subscribe();
        let value = rx.wait_for(|outcome| outcome.is_some()).await.unwrap();
        assert!(matches!(value.as_ref(), Some(Ok(7))));
    }

    #[tokio::test]
    async fn retry_signal_is_single_slot() {
        let entry: CacheEntry<u32> = CacheEntry::new(None);
        entry.signal_retry();
        entry.signal_retry();
        entry.signal_retry();

        entry.claim_retry().await;

        // Only one permit was ever pending; a second claim must not resolve.
        let second = tokio::time::timeout(Duration::from_millis(50), entry.claim_retry()).await;
        assert!(second.is_err(), "second retry claim should stay pending");
    }

    #[tokio::test]
    async fn retry_can_be_rearmed_after_a_claim() {
        let entry: CacheEntry<u32> = CacheEntry::new(None);
        entry.signal_retry();
        entry.claim_retry().await;

        entry.signal_retry();
        tokio::time::timeout(Duration::from_millis(50), entry.claim_retry())
            .await
            .expect("rearmed retry should be claimable");
    }
}

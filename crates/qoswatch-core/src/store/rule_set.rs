// ── Confirmed rule sets ──
//
// The locally known copy of a backend rule list. It only ever changes by
// wholesale replacement from a backend re-list, and each re-list carries
// a ticket taken when it was issued: a response older than the one
// already applied is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Monotonic sequence number for one re-list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

/// A write that has been sent to the backend but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum PendingWrite<W> {
    Upsert(W),
    Delete,
}

/// A pending write together with the rule key it targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry<W> {
    pub key: String,
    #[serde(flatten)]
    pub write: PendingWrite<W>,
}

pub struct RuleSet<T, W> {
    rules: watch::Sender<Arc<Vec<Arc<T>>>>,
    issued: AtomicU64,
    applied: Mutex<u64>,
    pending: DashMap<String, PendingWrite<W>>,
    label: &'static str,
}

impl<T, W> RuleSet<T, W>
where
    T: Send + Sync + 'static,
    W: Clone,
{
    pub(crate) fn new(label: &'static str) -> Self {
        let (rules, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            rules,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            pending: DashMap::new(),
            label,
        }
    }

    /// Last confirmed list (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.rules.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.rules.subscribe()
    }

    /// Take a ticket before issuing a re-list.
    pub(crate) fn begin_refresh(&self) -> RefreshTicket {
        RefreshTicket(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Replace the confirmed list with a re-list result.
    ///
    /// Returns `false` (and changes nothing) if a newer ticket has already
    /// been applied.
    pub(crate) fn apply_refresh(&self, ticket: RefreshTicket, rules: Vec<T>) -> bool {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        if ticket.0 <= *applied {
            debug!(
                rules = self.label,
                ticket = ticket.0,
                applied = *applied,
                "discarding stale rule refresh"
            );
            return false;
        }
        *applied = ticket.0;
        self.rules
            .send_replace(Arc::new(rules.into_iter().map(Arc::new).collect()));
        true
    }

    pub(crate) fn mark_pending(&self, key: &str, write: PendingWrite<W>) {
        self.pending.insert(key.to_owned(), write);
    }

    pub(crate) fn clear_pending(&self, key: &str) {
        self.pending.remove(key);
    }

    /// In-flight writes, sorted by key.
    pub fn pending(&self) -> Vec<PendingEntry<W>> {
        let mut entries: Vec<_> = self
            .pending
            .iter()
            .map(|e| PendingEntry {
                key: e.key().clone(),
                write: e.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn older_ticket_cannot_overwrite_newer() {
        let set: RuleSet<&str, ()> = RuleSet::new("test");
        let first = set.begin_refresh();
        let second = set.begin_refresh();

        assert!(set.apply_refresh(second, vec!["new"]));
        assert!(!set.apply_refresh(first, vec!["old"]));
        assert_eq!(*set.snapshot()[0], "new");
    }

    #[test]
    fn tickets_apply_in_sequence() {
        let set: RuleSet<u8, ()> = RuleSet::new("test");
        let a = set.begin_refresh();
        assert!(set.apply_refresh(a, vec![1]));
        let b = set.begin_refresh();
        assert!(set.apply_refresh(b, vec![1, 2]));
        assert_eq!(set.snapshot().len(), 2);
        // Re-applying the same ticket is stale too.
        assert!(!set.apply_refresh(b, vec![]));
    }

    #[test]
    fn pending_entries_sorted_by_key() {
        let set: RuleSet<u8, u8> = RuleSet::new("test");
        set.mark_pending("UDP", PendingWrite::Upsert(3));
        set.mark_pending("TCP", PendingWrite::Delete);
        let keys: Vec<_> = set.pending().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["TCP", "UDP"]);

        set.clear_pending("TCP");
        assert_eq!(set.pending().len(), 1);
    }
}

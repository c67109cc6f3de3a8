//! Transaction coordination.
//!
//! Hands out transaction ids and commit stamps from one monotone
//! clock. A commit stamp is always greater than zero and greater than
//! every `start_time` handed out before it.

use std::sync::atomic::{AtomicU64, Ordering};

use tessera_table::Transaction;

/// Monotone source of transaction ids and commit stamps.
#[derive(Debug)]
pub struct TxnCoordinator {
    next_txn_id: AtomicU64,
    clock: AtomicU64,
}

impl Default for TxnCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Begin an active transaction positioned at the current commit
    /// frontier.
    pub fn begin(&self) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        Transaction::active(id, self.clock.load(Ordering::SeqCst))
    }

    /// A passive reader at the current frontier.
    pub fn reader(&self) -> Transaction {
        Transaction::reader(self.clock.load(Ordering::SeqCst))
    }

    /// Claim the next commit stamp; strictly positive, monotone.
    pub fn commit_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The newest stamp already handed out.
    pub fn frontier(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_positive_and_monotone() {
        let coord = TxnCoordinator::new();
        let a = coord.commit_stamp();
        let b = coord.commit_stamp();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn new_readers_see_previous_commits() {
        let coord = TxnCoordinator::new();
        let txn = coord.begin();
        let cid = coord.commit_stamp();
        assert!(txn.start_time < cid);
        let reader = coord.reader();
        assert!(reader.start_time >= cid);
        assert_eq!(reader.id, 0);
    }

    #[test]
    fn txn_ids_are_unique() {
        let coord = TxnCoordinator::new();
        let a = coord.begin();
        let b = coord.begin();
        assert_ne!(a.id, b.id);
        assert!(a.id > 0);
    }
}

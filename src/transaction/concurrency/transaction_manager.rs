use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Transaction registry: allocates monotonically increasing ids (lower id
/// = older transaction, the ordering wound-wait relies on) and tracks
/// every live transaction so the lock manager can reach them.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new transaction in the growing phase
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Look up a live transaction by id; wound-wait uses this to abort
    /// younger lock holders.
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release every lock still held, then retire the transaction
    pub fn commit(&self, txn: &Transaction, lock_manager: &LockManager) {
        self.release_all_locks(txn, lock_manager);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Abort: surrender the write log to the caller's rollback machinery,
    /// release every lock, retire the transaction.
    pub fn abort(&self, txn: &Transaction, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Aborted);
        // Undo of the drained records belongs to the executor layer.
        let _write_set = txn.take_write_set();
        self.release_all_locks(txn, lock_manager);
        self.active_transactions.lock().remove(&txn.id());
    }

    fn release_all_locks(&self, txn: &Transaction, lock_manager: &LockManager) {
        for rid in txn.held_locks() {
            lock_manager.unlock(txn, rid);
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_allocates_increasing_ids() {
        let manager = TransactionManager::new();
        let t0 = manager.begin(IsolationLevel::RepeatableRead);
        let t1 = manager.begin(IsolationLevel::ReadCommitted);

        assert!(t0.id() < t1.id());
        assert!(manager.get_transaction(t0.id()).is_some());
        assert!(manager.get_transaction(t1.id()).is_some());
    }

    #[test]
    fn test_commit_retires_transaction() {
        let manager = Arc::new(TransactionManager::new());
        let lock_manager = LockManager::new(manager.clone());

        let txn = manager.begin(IsolationLevel::RepeatableRead);
        let txn_id = txn.id();
        manager.commit(&txn, &lock_manager);

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.get_transaction(txn_id).is_none());
    }

    #[test]
    fn test_abort_releases_locks() {
        let manager = Arc::new(TransactionManager::new());
        let lock_manager = LockManager::new(manager.clone());

        let txn = manager.begin(IsolationLevel::RepeatableRead);
        let rid = crate::common::types::Rid::new(1, 0);
        assert!(lock_manager.lock_exclusive(&txn, rid).unwrap());

        manager.abort(&txn, &lock_manager);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(!txn.is_exclusive_locked(rid));

        // The queue is free again for somebody else
        let other = manager.begin(IsolationLevel::RepeatableRead);
        assert!(lock_manager.lock_exclusive(&other, rid).unwrap());
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-RID FIFO request queue. The condvar wakes every waiter on any
/// queue change; each re-evaluates grantability and its own abort state.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    /// At most one transaction may be upgrading shared -> exclusive on a
    /// RID at a time.
    upgrading: Option<TxnId>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: None,
        }
    }

    fn remove_request(&mut self, txn_id: TxnId) {
        if let Some(pos) = self.requests.iter().position(|r| r.txn_id == txn_id) {
            self.requests.remove(pos);
        }
    }

    fn grant(&mut self, txn_id: TxnId) {
        for request in self.requests.iter_mut() {
            if request.txn_id == txn_id {
                request.granted = true;
            }
        }
    }
}

/// Tuple-granularity two-phase lock manager with wound-wait deadlock
/// prevention: an older transaction aborts younger conflicting holders;
/// a younger transaction waits for older ones. Queue mutation happens
/// under one short global latch; waiting happens on the queue's condvar.
pub struct LockManager {
    txn_manager: Arc<TransactionManager>,
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on `rid`. Protocol violations (lock after
    /// shrinking under RepeatableRead, shared lock under ReadUncommitted)
    /// abort the transaction and surface as errors; losing to wound-wait
    /// comes back as `Ok(false)`.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionAbortError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn.id(), AbortReason::LockOnShrinking));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::SharedLockOnReadUncommitted,
            ));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        self.acquire(txn, rid, LockMode::Shared)
    }

    /// Take an exclusive lock on `rid`. A holder of the shared lock
    /// escalates through the upgrade path.
    pub fn lock_exclusive(
        &self,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn.id(), AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }

        self.acquire(txn, rid, LockMode::Exclusive)
    }

    /// Convert an already-held shared lock into an exclusive one. Only
    /// one upgrade may be in flight per RID; a second one loses with
    /// `Ok(false)` and may retry.
    pub fn lock_upgrade(
        &self,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        if txn.state() == TransactionState::Aborted || !txn.is_shared_locked(rid) {
            return Ok(false);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn.id(), AbortReason::LockOnShrinking));
        }

        let mut table = self.latch.lock();
        {
            let queue = match table.get_mut(&rid) {
                Some(queue) => queue,
                None => return Ok(false),
            };
            if queue.upgrading.is_some() {
                return Ok(false);
            }
            queue.upgrading = Some(txn.id());

            // Convert the shared request in place; the grant is recomputed
            // from scratch below.
            for request in queue.requests.iter_mut() {
                if request.txn_id == txn.id() {
                    request.granted = false;
                    request.mode = LockMode::Exclusive;
                }
            }
        }
        txn.remove_shared_lock(rid);

        let cv = table.get(&rid).expect("queue exists").cv.clone();
        loop {
            let must_wait = {
                let queue = match table.get_mut(&rid) {
                    Some(queue) => queue,
                    None => return Ok(false),
                };
                if txn.state() == TransactionState::Aborted {
                    queue.remove_request(txn.id());
                    queue.upgrading = None;
                    queue.cv.notify_all();
                    return Ok(false);
                }
                self.wound_or_wait(queue, txn.id(), LockMode::Exclusive)
            };
            if !must_wait {
                break;
            }
            cv.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("queue exists");
        queue.grant(txn.id());
        queue.upgrading = None;
        drop(table);

        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Release the transaction's lock on `rid`. Under RepeatableRead the
    /// first unlock moves a growing transaction into its shrinking phase.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        let mut table = self.latch.lock();
        if let Some(queue) = table.get_mut(&rid) {
            queue.remove_request(txn.id());
            if queue.upgrading == Some(txn.id()) {
                queue.upgrading = None;
            }
            queue.cv.notify_all();
            if queue.requests.is_empty() && queue.upgrading.is_none() {
                table.remove(&rid);
            }
        }
        drop(table);

        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        true
    }

    /// Append a request and wait until it is grantable (or the caller is
    /// wounded while waiting).
    fn acquire(
        &self,
        txn: &Transaction,
        rid: Rid,
        mode: LockMode,
    ) -> Result<bool, TransactionAbortError> {
        let mut table = self.latch.lock();
        table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new)
            .requests
            .push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });

        let cv = table.get(&rid).expect("queue just touched").cv.clone();
        loop {
            let must_wait = {
                let queue = match table.get_mut(&rid) {
                    Some(queue) => queue,
                    None => return Ok(false),
                };
                if txn.state() == TransactionState::Aborted {
                    queue.remove_request(txn.id());
                    queue.cv.notify_all();
                    return Ok(false);
                }
                self.wound_or_wait(queue, txn.id(), mode)
            };
            if !must_wait {
                break;
            }
            cv.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("queue exists");
        queue.grant(txn.id());
        drop(table);

        match mode {
            LockMode::Shared => txn.add_shared_lock(rid),
            LockMode::Exclusive => txn.add_exclusive_lock(rid),
        }
        Ok(true)
    }

    /// One pass of the wound-wait rule for `txn_id` requesting `mode`:
    /// every conflicting younger transaction is wounded (aborted and
    /// dropped from the queue); any conflicting older transaction means
    /// the caller must wait. Requests behind the caller's own block only
    /// if already granted, which happens when an upgrade re-enters the
    /// queue ahead of granted readers.
    fn wound_or_wait(&self, queue: &mut LockRequestQueue, txn_id: TxnId, mode: LockMode) -> bool {
        let mut must_wait = false;
        let mut wounded_any = false;
        let mut ahead = true;
        let mut i = 0;

        while i < queue.requests.len() {
            let request = &queue.requests[i];
            if request.txn_id == txn_id {
                ahead = false;
                i += 1;
                continue;
            }

            let conflicts = match mode {
                LockMode::Shared => request.mode == LockMode::Exclusive,
                LockMode::Exclusive => true,
            };
            let blocks = conflicts && (ahead || request.granted);
            if !blocks {
                i += 1;
                continue;
            }

            if request.txn_id > txn_id {
                // Younger blocker: wound it
                let victim_id = request.txn_id;
                if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
                    victim.set_state(TransactionState::Aborted);
                }
                debug!("txn {} wounds txn {}", txn_id, victim_id);
                queue.requests.remove(i);
                if queue.upgrading == Some(victim_id) {
                    queue.upgrading = None;
                }
                wounded_any = true;
            } else {
                must_wait = true;
                i += 1;
            }
        }

        if wounded_any {
            queue.cv.notify_all();
        }
        must_wait
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

mod common;

use sirindb::common::types::Rid;
use sirindb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionManager, TransactionState,
};

fn setup() -> (Arc<TransactionManager>, Arc<LockManager>) {
    common::init_test_logging();
    let txn_manager = Arc::new(TransactionManager::new());
    let lock_manager = Arc::new(LockManager::new(txn_manager.clone()));
    (txn_manager, lock_manager)
}

#[test]
fn test_shared_lock_and_unlock() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&txn, rid)?);
    assert!(txn.is_shared_locked(rid));

    // Idempotent while held
    assert!(lock_manager.lock_shared(&txn, rid)?);

    assert!(lock_manager.unlock(&txn, rid));
    assert!(!txn.is_shared_locked(rid));

    // Nothing left to release
    assert!(!lock_manager.unlock(&txn, rid));
    Ok(())
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&t1, rid)?);
    assert!(lock_manager.lock_shared(&t2, rid)?);
    assert_eq!(t1.state(), TransactionState::Growing);
    assert_eq!(t2.state(), TransactionState::Growing);
    Ok(())
}

#[test]
fn test_younger_waits_for_older_exclusive() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_exclusive(&t1, rid)?);

    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid).unwrap())
    };

    // Give the younger transaction time to block, then release
    thread::sleep(Duration::from_millis(100));
    assert!(lock_manager.unlock(&t1, rid));

    assert!(waiter.join().unwrap());
    assert!(t2.is_exclusive_locked(rid));
    Ok(())
}

// Wound-wait: an older transaction arriving at a lock held by a younger
// one aborts the younger holder instead of waiting.
#[test]
fn test_older_wounds_younger_holder() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_exclusive(&t2, rid)?);

    // The older transaction does not wait
    assert!(lock_manager.lock_exclusive(&t1, rid)?);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // The wounded transaction fails every further lock call
    assert!(!lock_manager.lock_exclusive(&t2, Rid::new(1, 1))?);
    Ok(())
}

// Scenario: both transactions hold the shared lock; the older one
// upgrades, wounding the younger reader, and the upgrade grants.
#[test]
fn test_upgrade_wounds_younger_reader() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&t1, rid)?);
    assert!(lock_manager.lock_shared(&t2, rid)?);

    assert!(lock_manager.lock_upgrade(&t1, rid)?);
    assert!(t1.is_exclusive_locked(rid));
    assert!(!t1.is_shared_locked(rid));
    assert_eq!(t2.state(), TransactionState::Aborted);

    assert!(!lock_manager.lock_shared(&t2, Rid::new(2, 0))?);
    Ok(())
}

#[test]
fn test_concurrent_upgrade_loses() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&t1, rid)?);
    assert!(lock_manager.lock_shared(&t2, rid)?);

    // The younger transaction starts its upgrade first and blocks on the
    // older shared holder
    let upgrader = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_upgrade(&t2, rid).unwrap())
    };
    thread::sleep(Duration::from_millis(100));

    // A second upgrade on the same RID loses without aborting
    assert!(!lock_manager.lock_upgrade(&t1, rid)?);
    assert_ne!(t1.state(), TransactionState::Aborted);

    // Releasing the older reader lets the pending upgrade grant
    assert!(lock_manager.unlock(&t1, rid));
    assert!(upgrader.join().unwrap());
    assert!(t2.is_exclusive_locked(rid));
    Ok(())
}

// A transaction wounded while parked on the condvar must observe its
// aborted state on wake-up and give up.
#[test]
fn test_wounded_waiter_observes_abort() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t3 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_exclusive(&t2, rid)?);

    // The youngest transaction queues up behind t2
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t3 = t3.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t3, rid).unwrap())
    };
    thread::sleep(Duration::from_millis(100));

    // The oldest transaction wounds both the holder and the waiter
    assert!(lock_manager.lock_exclusive(&t1, rid)?);

    assert!(!waiter.join().unwrap());
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert_eq!(t3.state(), TransactionState::Aborted);
    Ok(())
}

// Scenario: repeatable read follows strict 2PL. The first unlock flips
// the transaction into its shrinking phase and any further lock attempt
// aborts it.
#[test]
fn test_two_phase_locking_enforced() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid1 = Rid::new(1, 0);
    let rid2 = Rid::new(1, 1);
    let rid3 = Rid::new(1, 2);

    assert!(lock_manager.lock_shared(&txn, rid1)?);
    assert!(lock_manager.lock_exclusive(&txn, rid2)?);

    assert!(lock_manager.unlock(&txn, rid1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lock_manager.lock_shared(&txn, rid3).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_read_committed_unlocks_freely() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    let rid1 = Rid::new(1, 0);
    let rid2 = Rid::new(1, 1);

    assert!(lock_manager.lock_shared(&txn, rid1)?);
    assert!(lock_manager.unlock(&txn, rid1));

    // No shrinking phase under read committed: locking continues
    assert_eq!(txn.state(), TransactionState::Growing);
    assert!(lock_manager.lock_shared(&txn, rid2)?);
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_locks() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    let rid = Rid::new(1, 0);

    let err = lock_manager.lock_shared(&txn, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::SharedLockOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);

    // Writers under read uncommitted still lock exclusively
    let writer = txn_manager.begin(IsolationLevel::ReadUncommitted);
    assert!(lock_manager.lock_exclusive(&writer, rid)?);
    Ok(())
}

#[test]
fn test_exclusive_escalates_held_shared() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&txn, rid)?);
    assert!(lock_manager.lock_exclusive(&txn, rid)?);
    assert!(txn.is_exclusive_locked(rid));
    assert!(!txn.is_shared_locked(rid));
    Ok(())
}

#[test]
fn test_aborted_transaction_cannot_lock() -> Result<()> {
    let (txn_manager, lock_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    txn.set_state(TransactionState::Aborted);

    assert!(!lock_manager.lock_shared(&txn, Rid::new(1, 0))?);
    assert!(!lock_manager.lock_exclusive(&txn, Rid::new(1, 1))?);
    Ok(())
}

//! Transaction manager (spec §4.8).
//!
//! A transaction is an ordered list of `(apply, undo, lock)` triples.
//! Locks are acquired in the growing phase, as each operation is
//! appended (two-phase locking); `run_transaction` executes every
//! operation's `apply` under a wall-clock deadline, rolling back via
//! `undo` (in reverse order) on either an application error or an
//! overrun. A timeout is treated as a deadlock signal, matching spec
//! §4.8's "timeout == deadlock" design note. Locks are always released
//! exactly once, whichever way the transaction ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::error::{DocStoreError, Result};
use crate::rwlock::KeyLockMap;

type ApplyFn = Box<dyn FnOnce() -> Result<()> + Send>;
type UndoFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct Operation {
    apply: ApplyFn,
    undo: UndoFn,
}

/// A single atomic unit of work spanning one or more document mutations.
pub struct Transaction {
    id: u64,
    operations: Vec<Operation>,
    guards: Vec<OwnedMutexGuard<()>>,
    locked_keys: std::collections::HashSet<u64>,
}

impl Transaction {
    /// Append an operation, acquiring its lock immediately (2PL growing
    /// phase), unless this same transaction already holds it — a second
    /// op against a key this transaction already locked just joins the
    /// op list instead of awaiting a guard it would never release to
    /// itself. `locks` is consulted in the caller-established lock
    /// ordering: per-key lock before any store-wide lock the caller also
    /// holds.
    pub async fn add_operation(
        &mut self,
        locks: &KeyLockMap<u64>,
        lock_key: u64,
        apply: ApplyFn,
        undo: UndoFn,
    ) {
        if self.locked_keys.insert(lock_key) {
            let lock = locks.lock_for(&lock_key);
            let guard = lock.lock_owned().await;
            self.guards.push(guard);
        }
        self.operations.push(Operation { apply, undo });
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

/// Coordinates transaction ids and timeout-bounded execution.
pub struct TransactionManager {
    next_id: AtomicU64,
    timeout: Duration,
}

impl TransactionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn begin(&self) -> Transaction {
        Transaction {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            operations: Vec::new(),
            guards: Vec::new(),
            locked_keys: std::collections::HashSet::new(),
        }
    }

    /// Run every operation's `apply` in order, within the configured
    /// deadline. On failure, or once the deadline has passed, every
    /// already-applied operation is undone in reverse order *before*
    /// this returns — never after — so the locks release (when the
    /// transaction is dropped) onto state with no partial mutation
    /// visible.
    ///
    /// The apply/undo loop runs on the blocking-thread pool, since
    /// `apply`/`undo` closures are plain synchronous code with no
    /// internal suspension point (spec §5's "scheduler thread never
    /// blocks" discipline). The deadline is checked from inside that
    /// same closure, after every op, rather than by racing
    /// `tokio::time::timeout` against the `JoinHandle`: a `spawn_blocking`
    /// task that loses such a race keeps running detached, so it would
    /// go on committing every remaining op — with no undo — after the
    /// caller had already been told the transaction deadlocked.
    pub async fn run_transaction(&self, mut txn: Transaction) -> Result<()> {
        let id = txn.id;
        let ops: Vec<Operation> = txn.operations.drain(..).collect();
        let op_count = ops.len();
        let deadline = Instant::now() + self.timeout;

        debug!(txn_id = id, op_count, "transaction starting");

        let run = tokio::task::spawn_blocking(move || {
            let mut applied: Vec<UndoFn> = Vec::new();
            for op in ops {
                match (op.apply)() {
                    Ok(()) => {
                        applied.push(op.undo);
                        if Instant::now() >= deadline {
                            warn!(txn_id = id, "transaction exceeded its deadline, rolling back");
                            for undo in applied.into_iter().rev() {
                                let _ = undo();
                            }
                            return Err(DocStoreError::Deadlock(id));
                        }
                    }
                    Err(e) => {
                        warn!(txn_id = id, error = %e, "transaction operation failed, rolling back");
                        for undo in applied.into_iter().rev() {
                            let _ = undo();
                        }
                        return Err(DocStoreError::TransactionAborted(id, e.to_string()));
                    }
                }
            }
            Ok(())
        });

        match run.await {
            Ok(Ok(())) => {
                info!(txn_id = id, op_count, "transaction committed");
                Ok(())
            }
            Ok(Err(e)) => {
                if matches!(e, DocStoreError::Deadlock(_)) {
                    error!(txn_id = id, "transaction rolled back after deadline overrun");
                }
                Err(e)
            }
            Err(join_err) => {
                error!(txn_id = id, error = %join_err, "transaction worker thread panicked");
                Err(DocStoreError::Storage(join_err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn successful_transaction_applies_all_operations() {
        let manager = TransactionManager::new(Duration::from_secs(1));
        let locks: KeyLockMap<u64> = KeyLockMap::new();
        let log = Arc::new(SyncMutex::new(Vec::new()));

        let mut txn = manager.begin();
        for i in 0..3u64 {
            let log = log.clone();
            txn.add_operation(
                &locks,
                i,
                Box::new(move || {
                    log.lock().push(i);
                    Ok(())
                }),
                Box::new(|| Ok(())),
            )
            .await;
        }
        manager.run_transaction(txn).await.unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_operation_rolls_back_prior_ones() {
        let manager = TransactionManager::new(Duration::from_secs(1));
        let locks: KeyLockMap<u64> = KeyLockMap::new();
        let log = Arc::new(SyncMutex::new(Vec::new()));

        let mut txn = manager.begin();
        {
            let log = log.clone();
            txn.add_operation(
                &locks,
                1u64,
                Box::new(move || {
                    log.lock().push("apply-1".to_string());
                    Ok(())
                }),
                Box::new({
                    let log = log.clone();
                    move || {
                        log.lock().push("undo-1".to_string());
                        Ok(())
                    }
                }),
            )
            .await;
        }
        txn.add_operation(
            &locks,
            2u64,
            Box::new(|| Err(DocStoreError::Validation("boom".to_string()))),
            Box::new(|| Ok(())),
        )
        .await;

        let result = manager.run_transaction(txn).await;
        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["apply-1".to_string(), "undo-1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_reports_deadlock() {
        let manager = TransactionManager::new(Duration::from_millis(10));
        let locks: KeyLockMap<u64> = KeyLockMap::new();
        let mut txn = manager.begin();
        txn.add_operation(
            &locks,
            1u64,
            Box::new(|| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(())
            }),
            Box::new(|| Ok(())),
        )
        .await;
        let result = manager.run_transaction(txn).await;
        assert!(matches!(result, Err(DocStoreError::Deadlock(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_overrun_rolls_back_the_op_that_crossed_it() {
        let manager = TransactionManager::new(Duration::from_millis(10));
        let locks: KeyLockMap<u64> = KeyLockMap::new();
        let log = Arc::new(SyncMutex::new(Vec::new()));

        let mut txn = manager.begin();
        {
            let log = log.clone();
            txn.add_operation(
                &locks,
                1u64,
                Box::new(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    log.lock().push("apply-1".to_string());
                    Ok(())
                }),
                Box::new({
                    let log = log.clone();
                    move || {
                        log.lock().push("undo-1".to_string());
                        Ok(())
                    }
                }),
            )
            .await;
        }

        let result = manager.run_transaction(txn).await;
        assert!(matches!(result, Err(DocStoreError::Deadlock(_))));
        assert_eq!(*log.lock(), vec!["apply-1".to_string(), "undo-1".to_string()]);
    }

    #[tokio::test]
    async fn reusing_a_key_within_one_transaction_does_not_self_deadlock() {
        let manager = TransactionManager::new(Duration::from_secs(1));
        let locks: KeyLockMap<u64> = KeyLockMap::new();
        let log = Arc::new(SyncMutex::new(Vec::new()));

        let mut txn = manager.begin();
        {
            let log = log.clone();
            txn.add_operation(
                &locks,
                7u64,
                Box::new(move || {
                    log.lock().push("update-7".to_string());
                    Ok(())
                }),
                Box::new(|| Ok(())),
            )
            .await;
        }
        {
            let log = log.clone();
            txn.add_operation(
                &locks,
                7u64,
                Box::new(move || {
                    log.lock().push("delete-7".to_string());
                    Ok(())
                }),
                Box::new(|| Ok(())),
            )
            .await;
        }

        manager.run_transaction(txn).await.unwrap();
        assert_eq!(*log.lock(), vec!["update-7".to_string(), "delete-7".to_string()]);
    }
}

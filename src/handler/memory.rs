//! In-memory transaction handler.
//!
//! This is the reference implementation of `TransactionHandler`.
//! Transactions are plain state machines with no backing resource.
//!
//! ## Limitations
//!
//! - **Nothing durable**: commit and rollback only flip the transaction's
//!   phase. There is no data to apply or undo.
//! - **No global coordination**: `join_global_transaction` just counts the
//!   call.
//!
//! Use this handler for:
//! - Testing propagation behavior — every lifecycle hook increments an
//!   observable counter, so tests can assert exact call sequences
//! - Embedding transactional call discipline around code with no
//!   transactional resource of its own

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::metadata::TransactionMetadata;
use crate::{Error, Result};

use super::TransactionHandler;

// ============================================================================
// MemoryTransaction
// ============================================================================

/// Phase of an in-memory transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Created but not begun.
    Created,
    /// Begun and not yet decided.
    Active,
    Committed,
    RolledBack,
}

/// Handler-native transaction handle for [`MemoryHandler`].
pub struct MemoryTransaction {
    id: u64,
    phase: Mutex<TxPhase>,
    rollback_only: AtomicBool,
    released: AtomicBool,
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> TxPhase {
        *self.phase.lock()
    }

    pub fn is_active(&self) -> bool {
        self.phase() == TxPhase::Active
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}

// ============================================================================
// Lifecycle counters
// ============================================================================

/// Running totals of every lifecycle hook the handler has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleCounts {
    pub initialize: u64,
    pub create: u64,
    pub begin: u64,
    pub join: u64,
    pub commit: u64,
    pub rollback: u64,
    pub mark_rollback_only: u64,
    pub release: u64,
    pub cleanup: u64,
}

// ============================================================================
// MemoryHandler
// ============================================================================

/// In-memory reference handler with observable lifecycle counters.
pub struct MemoryHandler {
    counts: Mutex<LifecycleCounts>,
    next_tx_id: AtomicU64,
}

impl MemoryHandler {
    pub fn new() -> Self {
        MemoryHandler {
            counts: Mutex::new(LifecycleCounts::default()),
            next_tx_id: AtomicU64::new(1),
        }
    }

    /// Snapshot of the lifecycle counters.
    pub fn counts(&self) -> LifecycleCounts {
        *self.counts.lock()
    }

    /// Zero the counters. Handy between test scenarios.
    pub fn reset_counts(&self) {
        *self.counts.lock() = LifecycleCounts::default();
    }

    fn bump(&self, field: impl FnOnce(&mut LifecycleCounts) -> &mut u64) {
        let mut counts = self.counts.lock();
        *field(&mut counts) += 1;
    }
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionHandler for MemoryHandler {
    type Tx = MemoryTransaction;

    fn initialize(&self, _meta: &TransactionMetadata) -> Result<()> {
        self.bump(|c| &mut c.initialize);
        Ok(())
    }

    fn create_transaction(&self) -> Result<MemoryTransaction> {
        self.bump(|c| &mut c.create);
        Ok(MemoryTransaction {
            id: self.next_tx_id.fetch_add(1, Ordering::Relaxed),
            phase: Mutex::new(TxPhase::Created),
            rollback_only: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    fn begin_transaction(&self, tx: &MemoryTransaction) -> Result<()> {
        self.bump(|c| &mut c.begin);
        let mut phase = tx.phase.lock();
        if *phase != TxPhase::Created {
            return Err(Error::Transaction(format!(
                "begin on {:?} transaction {}",
                *phase, tx.id
            )));
        }
        *phase = TxPhase::Active;
        Ok(())
    }

    fn join_global_transaction(&self) -> Result<()> {
        self.bump(|c| &mut c.join);
        Ok(())
    }

    fn commit_transaction(&self, tx: &MemoryTransaction) -> Result<()> {
        self.bump(|c| &mut c.commit);
        let mut phase = tx.phase.lock();
        if *phase != TxPhase::Active {
            return Err(Error::Transaction(format!(
                "commit on {:?} transaction {}",
                *phase, tx.id
            )));
        }
        if tx.is_rollback_only() {
            *phase = TxPhase::RolledBack;
            return Err(Error::RollbackOnly);
        }
        *phase = TxPhase::Committed;
        Ok(())
    }

    fn rollback_transaction(&self, tx: &MemoryTransaction) -> Result<()> {
        self.bump(|c| &mut c.rollback);
        let mut phase = tx.phase.lock();
        if *phase != TxPhase::Active {
            return Err(Error::Transaction(format!(
                "rollback on {:?} transaction {}",
                *phase, tx.id
            )));
        }
        *phase = TxPhase::RolledBack;
        Ok(())
    }

    fn mark_rollback_only(&self, tx: &MemoryTransaction) -> Result<()> {
        self.bump(|c| &mut c.mark_rollback_only);
        tx.rollback_only.store(true, Ordering::Release);
        Ok(())
    }

    fn release_transaction(&self, tx: &MemoryTransaction) -> Result<()> {
        self.bump(|c| &mut c.release);
        // Releasing an undecided transaction abandons it; allowed so the
        // engine can settle swallowed-exception invocations.
        tx.released.store(true, Ordering::Release);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.bump(|c| &mut c.cleanup);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_flow() {
        let handler = MemoryHandler::new();
        let tx = handler.create_transaction().unwrap();
        assert_eq!(tx.phase(), TxPhase::Created);

        handler.begin_transaction(&tx).unwrap();
        assert!(tx.is_active());

        handler.commit_transaction(&tx).unwrap();
        assert_eq!(tx.phase(), TxPhase::Committed);

        handler.release_transaction(&tx).unwrap();
        assert!(tx.is_released());
    }

    #[test]
    fn test_begin_twice_fails() {
        let handler = MemoryHandler::new();
        let tx = handler.create_transaction().unwrap();
        handler.begin_transaction(&tx).unwrap();
        assert!(matches!(
            handler.begin_transaction(&tx),
            Err(Error::Transaction(_))
        ));
    }

    #[test]
    fn test_commit_of_rollback_only_fails_and_rolls_back() {
        let handler = MemoryHandler::new();
        let tx = handler.create_transaction().unwrap();
        handler.begin_transaction(&tx).unwrap();
        handler.mark_rollback_only(&tx).unwrap();

        assert!(matches!(
            handler.commit_transaction(&tx),
            Err(Error::RollbackOnly)
        ));
        assert_eq!(tx.phase(), TxPhase::RolledBack);
    }

    #[test]
    fn test_counts_observe_every_hook() {
        let handler = MemoryHandler::new();
        let tx = handler.create_transaction().unwrap();
        handler.begin_transaction(&tx).unwrap();
        handler.join_global_transaction().unwrap();
        handler.rollback_transaction(&tx).unwrap();
        handler.release_transaction(&tx).unwrap();
        handler.cleanup().unwrap();

        let counts = handler.counts();
        assert_eq!(counts.create, 1);
        assert_eq!(counts.begin, 1);
        assert_eq!(counts.join, 1);
        assert_eq!(counts.commit, 0);
        assert_eq!(counts.rollback, 1);
        assert_eq!(counts.release, 1);
        assert_eq!(counts.cleanup, 1);

        handler.reset_counts();
        assert_eq!(handler.counts(), LifecycleCounts::default());
    }

    #[test]
    fn test_tx_ids_are_unique() {
        let handler = MemoryHandler::new();
        let a = handler.create_transaction().unwrap();
        let b = handler.create_transaction().unwrap();
        assert_ne!(a.id(), b.id());
    }
}

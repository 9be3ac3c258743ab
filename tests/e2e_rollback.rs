//! End-to-end rollback-decision tests: rule matching over the error-class
//! tree, the exception-handler hook, and rollback-only marking.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use txguard::{
    ANY, CallError, CallResult, ClassifiedError, Error, ErrorClass, ExceptionHandler, FATAL,
    MemoryHandler, MemoryTransaction, Propagation, RollbackRules, TransactionManager,
    TransactionMetadata, TxHandle,
};

// ============================================================================
// Test error classes
// ============================================================================

static APP: ErrorClass = ErrorClass::subclass("app", &ANY);
static CONFLICT: ErrorClass = ErrorClass::subclass("conflict", &APP);
static STALE_READ: ErrorClass = ErrorClass::subclass("stale_read", &CONFLICT);
static DISK_GONE: ErrorClass = ErrorClass::subclass("disk_gone", &FATAL);

#[derive(Debug)]
enum ServiceError {
    Conflict,
    StaleRead,
    DiskGone,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Conflict => f.write_str("write conflict"),
            ServiceError::StaleRead => f.write_str("stale read"),
            ServiceError::DiskGone => f.write_str("disk gone"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl ClassifiedError for ServiceError {
    fn class(&self) -> &'static ErrorClass {
        match self {
            ServiceError::Conflict => &CONFLICT,
            ServiceError::StaleRead => &STALE_READ,
            ServiceError::DiskGone => &DISK_GONE,
        }
    }
}

fn setup() -> (Arc<MemoryHandler>, TransactionManager) {
    let handler = Arc::new(MemoryHandler::new());
    let manager = TransactionManager::builder()
        .handler::<MemoryHandler>("memory", Arc::clone(&handler))
        .build()
        .unwrap();
    (handler, manager)
}

// ============================================================================
// 1. no-rollback-for subtype beats rollback-on supertype: commit
// ============================================================================

#[test]
fn test_no_rollback_subtype_commits() {
    let (handler, manager) = setup();

    let meta = TransactionMetadata::new(Propagation::Required).with_rules(
        RollbackRules::default()
            .with_rollback_on(&APP)
            .with_no_rollback_for(&STALE_READ),
    );

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::StaleRead));
    assert!(matches!(
        result,
        Err(CallError::Guarded(ServiceError::StaleRead))
    ));

    let counts = handler.counts();
    assert_eq!(counts.commit, 1);
    assert_eq!(counts.rollback, 0);
    assert_eq!(counts.release, 1);
    assert_eq!(counts.cleanup, 1);
}

// ============================================================================
// 2. sibling of the vetoed class still rolls back
// ============================================================================

#[test]
fn test_vetoed_sibling_still_rolls_back() {
    let (handler, manager) = setup();

    let meta = TransactionMetadata::new(Propagation::Required).with_rules(
        RollbackRules::default()
            .with_rollback_on(&APP)
            .with_no_rollback_for(&STALE_READ),
    );

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::Conflict));
    assert!(result.is_err());

    let counts = handler.counts();
    assert_eq!(counts.commit, 0);
    assert_eq!(counts.rollback, 1);
}

// ============================================================================
// 3. FATAL classes roll back even when every class is vetoed
// ============================================================================

#[test]
fn test_fatal_always_rolls_back() {
    let (handler, manager) = setup();

    let meta = TransactionMetadata::new(Propagation::Required)
        .with_rules(RollbackRules::default().with_no_rollback_for(&ANY));

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::DiskGone));
    assert!(result.is_err());

    let counts = handler.counts();
    assert_eq!(counts.rollback, 1);
    assert_eq!(counts.commit, 0);
}

// ============================================================================
// 4. error outside the rollback-on set commits
// ============================================================================

#[test]
fn test_unmatched_error_commits() {
    let (handler, manager) = setup();

    // Rollback only on STALE_READ; CONFLICT is its parent, not a subtype.
    let meta = TransactionMetadata::new(Propagation::Required)
        .with_rules(RollbackRules::default().with_rollback_on(&STALE_READ));

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::Conflict));
    assert!(result.is_err());

    let counts = handler.counts();
    assert_eq!(counts.commit, 1);
    assert_eq!(counts.rollback, 0);
}

// ============================================================================
// 5. exception handler claiming the error swallows it
// ============================================================================

#[test]
fn test_exception_handler_swallows() {
    let (handler, manager) = setup();

    let seen = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&seen);
    let exception_handler: Arc<dyn ExceptionHandler> = Arc::new(
        move |error: &dyn ClassifiedError, _meta: &TransactionMetadata, tx: Option<&TxHandle>| {
            observer.fetch_add(1, Ordering::SeqCst);
            // The handler-native transaction is visible to the hook.
            let tx = tx.expect("owning call passes its transaction");
            assert!(tx.downcast_ref::<MemoryTransaction>().unwrap().is_active());
            assert_eq!(error.class(), &CONFLICT);
            true
        },
    );

    let meta = TransactionMetadata::new(Propagation::Required)
        .with_exception_handler(exception_handler);

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::Conflict));
    assert_eq!(result.unwrap(), None);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // Decision logic skipped: neither commit nor rollback, but the
    // transaction was still released and cleaned up.
    let counts = handler.counts();
    assert_eq!(counts.commit, 0);
    assert_eq!(counts.rollback, 0);
    assert_eq!(counts.release, 1);
    assert_eq!(counts.cleanup, 1);
}

// ============================================================================
// 6. exception handler declining: decision applies, error propagates
// ============================================================================

#[test]
fn test_exception_handler_declines() {
    let (handler, manager) = setup();

    let exception_handler: Arc<dyn ExceptionHandler> = Arc::new(
        |_: &dyn ClassifiedError, _: &TransactionMetadata, _: Option<&TxHandle>| false,
    );

    let meta = TransactionMetadata::new(Propagation::Required)
        .with_exception_handler(exception_handler);

    let result: CallResult<(), ServiceError> =
        manager.execute(&meta, || Err(ServiceError::Conflict));
    assert!(matches!(
        result,
        Err(CallError::Guarded(ServiceError::Conflict))
    ));

    let counts = handler.counts();
    assert_eq!(counts.rollback, 1);
    assert_eq!(counts.commit, 0);
}

// ============================================================================
// 7. failed joined call marks rollback-only; the owner's commit refuses
// ============================================================================

#[test]
fn test_joined_failure_marks_rollback_only() {
    let (handler, manager) = setup();

    let meta_outer = TransactionMetadata::new(Propagation::Required);
    let meta_inner = TransactionMetadata::new(Propagation::Required);

    let result: CallResult<(), ServiceError> = manager.execute(&meta_outer, || {
        let inner: CallResult<(), ServiceError> =
            manager.execute(&meta_inner, || Err(ServiceError::Conflict));
        // The joined call's failure is absorbed here; the outer body
        // finishes normally.
        assert!(matches!(
            inner,
            Err(CallError::Guarded(ServiceError::Conflict))
        ));
        Ok(())
    });

    // The owner's commit must refuse the poisoned transaction.
    match result {
        Err(CallError::Engine(Error::Handler { op, .. })) => {
            assert_eq!(op, "commit_transaction");
        }
        other => panic!("expected a refused commit, got {other:?}"),
    }

    let counts = handler.counts();
    assert_eq!(counts.mark_rollback_only, 1);
    assert_eq!(counts.commit, 1);
    assert_eq!(counts.release, 1);
    assert_eq!(counts.cleanup, 1);
}

// ============================================================================
// 8. joined call whose error commits (vetoed) does not poison the owner
// ============================================================================

#[test]
fn test_joined_vetoed_failure_leaves_owner_clean() {
    let (handler, manager) = setup();

    let meta_inner = TransactionMetadata::new(Propagation::Required)
        .with_rules(RollbackRules::default().with_no_rollback_for(&CONFLICT));

    let result: CallResult<(), ServiceError> =
        manager.execute(&TransactionMetadata::new(Propagation::Required), || {
            let inner: CallResult<(), ServiceError> =
                manager.execute(&meta_inner, || Err(ServiceError::Conflict));
            assert!(inner.is_err());
            Ok(())
        });
    assert_eq!(result.unwrap(), Some(()));

    let counts = handler.counts();
    assert_eq!(counts.mark_rollback_only, 0);
    assert_eq!(counts.commit, 1);
}

// ============================================================================
// 9. a panicking body rolls back and the panic resumes
// ============================================================================

#[test]
fn test_panic_rolls_back_and_resumes() {
    let (handler, manager) = setup();

    let meta = TransactionMetadata::new(Propagation::Required);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: CallResult<(), ServiceError> = manager.execute(&meta, || panic!("boom"));
    }));
    assert!(outcome.is_err());

    let counts = handler.counts();
    assert_eq!(counts.rollback, 1);
    assert_eq!(counts.commit, 0);
    assert_eq!(counts.release, 1);
    assert_eq!(counts.cleanup, 1);
}

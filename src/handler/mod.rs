//! # Transaction Handler Contract
//!
//! This is THE contract between the propagation engine and any
//! transactional resource kind. Everything the engine ever asks of a
//! resource — begin, commit, rollback, release — is defined here.
//!
//! ## Implementations
//!
//! | Handler | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryHandler` | `memory` | In-memory reference handler with observable lifecycle counters |
//!
//! Resource kinds backed by real drivers (a relational pool, a message
//! broker session factory) implement [`TransactionHandler`] the same way
//! and are registered under their own [`HandlerType`] at startup.

pub mod memory;

use std::any::Any;
use std::sync::Arc;

use crate::engine::context::{self, ContextKey};
use crate::metadata::{HandlerType, TransactionMetadata};
use crate::{Error, Result};

pub use memory::{LifecycleCounts, MemoryHandler, MemoryTransaction, TxPhase};

/// Handler-native transaction handle, type-erased for the engine.
///
/// The engine never looks inside; it only threads the handle back through
/// the owning handler's lifecycle methods and the thread context.
pub type TxHandle = Arc<dyn Any + Send + Sync>;

// ============================================================================
// TransactionHandler trait
// ============================================================================

/// The capability set a transactional resource kind must implement.
///
/// One invocation that owns its transaction drives the hooks in this
/// order: `initialize` → `create_transaction` → `begin_transaction` →
/// (`join_global_transaction` when the runtime coordinates globally) →
/// guarded call → `commit_transaction` or `rollback_transaction` →
/// `release_transaction` → `cleanup`. Release and cleanup always run,
/// even when commit or rollback fails.
///
/// Handlers receive the handle by shared reference and use interior
/// mutability — the engine owns the handle and may still be holding it in
/// thread context when a hook runs.
pub trait TransactionHandler: Send + Sync + 'static {
    /// The handler-native transaction type, opaque to the engine.
    type Tx: Send + Sync + 'static;

    /// Called once per owning invocation, before any transaction exists.
    fn initialize(&self, meta: &TransactionMetadata) -> Result<()>;

    /// Produce a fresh, not-yet-begun transaction.
    fn create_transaction(&self) -> Result<Self::Tx>;

    /// Start the transaction on the underlying resource.
    fn begin_transaction(&self, tx: &Self::Tx) -> Result<()>;

    /// Enlist in an externally coordinated (global) transaction. Called
    /// instead of the local lifecycle when joining an ambient transaction,
    /// and after `begin_transaction` when the runtime is in global mode.
    fn join_global_transaction(&self) -> Result<()> {
        Ok(())
    }

    fn commit_transaction(&self, tx: &Self::Tx) -> Result<()>;

    fn rollback_transaction(&self, tx: &Self::Tx) -> Result<()>;

    /// Flag the transaction so a later commit by its owner must refuse.
    /// Used when a joined call fails with a rollback-worthy error.
    fn mark_rollback_only(&self, tx: &Self::Tx) -> Result<()>;

    /// Return the underlying resource to its pool / close it. Runs
    /// unconditionally after commit or rollback.
    fn release_transaction(&self, tx: &Self::Tx) -> Result<()>;

    /// Tear down per-invocation handler state. Runs unconditionally at
    /// the end of an owning invocation.
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// The live transaction for `key`, if any.
    ///
    /// The default reads the engine's thread-scoped context, which is
    /// correct for every handler that lets the engine own binding.
    /// Override only when the resource kind tracks its current
    /// transaction natively (e.g. a driver with thread affinity).
    fn current_transaction(&self, key: &ContextKey) -> Option<Arc<Self::Tx>> {
        context::current_as::<Self::Tx>(key)
    }
}

// ============================================================================
// Erased protocol
// ============================================================================

/// Object-safe view of [`TransactionHandler`] the engine drives.
///
/// Handles cross this seam as [`TxHandle`]; the blanket adapter downcasts
/// back to the handler-native type and reports a mismatch as a typed
/// error rather than panicking.
pub(crate) trait HandlerProtocol: Send + Sync {
    fn handler_type(&self) -> &HandlerType;
    fn initialize(&self, meta: &TransactionMetadata) -> Result<()>;
    fn create_transaction(&self) -> Result<TxHandle>;
    fn begin_transaction(&self, tx: &TxHandle) -> Result<()>;
    fn join_global_transaction(&self) -> Result<()>;
    fn commit_transaction(&self, tx: &TxHandle) -> Result<()>;
    fn rollback_transaction(&self, tx: &TxHandle) -> Result<()>;
    fn mark_rollback_only(&self, tx: &TxHandle) -> Result<()>;
    fn release_transaction(&self, tx: &TxHandle) -> Result<()>;
    fn cleanup(&self) -> Result<()>;
    fn current_transaction(&self, key: &ContextKey) -> Option<TxHandle>;
}

/// Blanket adapter binding a typed handler to its registered name.
pub(crate) struct Registered<H: TransactionHandler> {
    name: HandlerType,
    inner: Arc<H>,
}

impl<H: TransactionHandler> Registered<H> {
    pub(crate) fn new(name: HandlerType, inner: Arc<H>) -> Self {
        Registered { name, inner }
    }

    fn native<'a>(&self, tx: &'a TxHandle) -> Result<&'a H::Tx> {
        tx.downcast_ref::<H::Tx>()
            .ok_or_else(|| Error::HandleType(self.name.clone()))
    }

    fn wrap(&self, op: &'static str, res: Result<()>) -> Result<()> {
        res.map_err(|source| Error::Handler {
            handler: self.name.clone(),
            op,
            source: Box::new(source),
        })
    }
}

impl<H: TransactionHandler> HandlerProtocol for Registered<H> {
    fn handler_type(&self) -> &HandlerType {
        &self.name
    }

    fn initialize(&self, meta: &TransactionMetadata) -> Result<()> {
        tracing::trace!(handler = %self.name, "initialize");
        self.wrap("initialize", self.inner.initialize(meta))
    }

    fn create_transaction(&self) -> Result<TxHandle> {
        tracing::trace!(handler = %self.name, "create_transaction");
        match self.inner.create_transaction() {
            Ok(tx) => Ok(Arc::new(tx) as TxHandle),
            Err(source) => Err(Error::Handler {
                handler: self.name.clone(),
                op: "create_transaction",
                source: Box::new(source),
            }),
        }
    }

    fn begin_transaction(&self, tx: &TxHandle) -> Result<()> {
        tracing::trace!(handler = %self.name, "begin_transaction");
        let native = self.native(tx)?;
        self.wrap("begin_transaction", self.inner.begin_transaction(native))
    }

    fn join_global_transaction(&self) -> Result<()> {
        tracing::trace!(handler = %self.name, "join_global_transaction");
        self.wrap("join_global_transaction", self.inner.join_global_transaction())
    }

    fn commit_transaction(&self, tx: &TxHandle) -> Result<()> {
        tracing::trace!(handler = %self.name, "commit_transaction");
        let native = self.native(tx)?;
        self.wrap("commit_transaction", self.inner.commit_transaction(native))
    }

    fn rollback_transaction(&self, tx: &TxHandle) -> Result<()> {
        tracing::trace!(handler = %self.name, "rollback_transaction");
        let native = self.native(tx)?;
        self.wrap("rollback_transaction", self.inner.rollback_transaction(native))
    }

    fn mark_rollback_only(&self, tx: &TxHandle) -> Result<()> {
        tracing::trace!(handler = %self.name, "mark_rollback_only");
        let native = self.native(tx)?;
        self.wrap("mark_rollback_only", self.inner.mark_rollback_only(native))
    }

    fn release_transaction(&self, tx: &TxHandle) -> Result<()> {
        tracing::trace!(handler = %self.name, "release_transaction");
        let native = self.native(tx)?;
        self.wrap("release_transaction", self.inner.release_transaction(native))
    }

    fn cleanup(&self) -> Result<()> {
        tracing::trace!(handler = %self.name, "cleanup");
        self.wrap("cleanup", self.inner.cleanup())
    }

    fn current_transaction(&self, key: &ContextKey) -> Option<TxHandle> {
        self.inner
            .current_transaction(key)
            .map(|tx| tx as TxHandle)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Handler bindings, keyed by [`HandlerType`]. Assembled at startup by
/// the runtime builder; read-only afterwards.
pub(crate) struct HandlerRegistry {
    handlers: hashbrown::HashMap<HandlerType, Arc<dyn HandlerProtocol>>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        HandlerRegistry {
            handlers: hashbrown::HashMap::new(),
        }
    }

    pub(crate) fn insert<H: TransactionHandler>(&mut self, name: HandlerType, handler: Arc<H>) {
        self.handlers
            .insert(name.clone(), Arc::new(Registered::new(name, handler)));
    }

    pub(crate) fn get(&self, name: &HandlerType) -> Result<&Arc<dyn HandlerProtocol>> {
        self.handlers
            .get(name)
            .ok_or_else(|| Error::UnknownHandler(name.clone()))
    }

    pub(crate) fn contains(&self, name: &HandlerType) -> bool {
        self.handlers.contains_key(name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    /// The single registered handler type, when there is exactly one.
    pub(crate) fn sole_handler(&self) -> Option<HandlerType> {
        if self.handlers.len() == 1 {
            self.handlers.keys().next().cloned()
        } else {
            None
        }
    }
}

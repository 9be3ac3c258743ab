//! # txguard — Declarative Transaction Management
//!
//! Propagation policies, pluggable resource handlers, and rollback rules
//! for any transactional resource — relational connections, message-queue
//! sessions, or plain in-memory state.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `TransactionHandler` is the contract between the
//!    propagation engine and every resource kind
//! 2. **Metadata crosses all boundaries**: `TransactionMetadata` is the
//!    one descriptor resolvers produce and the engine consumes
//! 3. **Thread-scoped state**: ambient transactions live in per-thread
//!    context owned by the engine — nested calls on one thread see them,
//!    other threads never do
//! 4. **Explicit call sites**: no reflection; wrapped contracts declare
//!    their metadata at startup through the resolver chain
//!
//! ## Quick Start
//!
//! ```rust
//! use txguard::{MemoryHandler, Propagation, TransactionManager, TransactionMetadata};
//! # #[derive(Debug)]
//! # struct AppError;
//! # impl std::fmt::Display for AppError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//! #         f.write_str("app error")
//! #     }
//! # }
//! # impl std::error::Error for AppError {}
//! # impl txguard::ClassifiedError for AppError {}
//!
//! # fn main() -> txguard::Result<()> {
//! let manager = TransactionManager::builder()
//!     .handler("memory", MemoryHandler::new())
//!     .build()?;
//!
//! // REQUIRED with no ambient transaction: the call owns a full
//! // create → begin → commit lifecycle around the body.
//! let meta = TransactionMetadata::new(Propagation::Required);
//! let shipped = manager
//!     .execute(&meta, || Ok::<_, AppError>(42))
//!     .expect("commit succeeds");
//! assert_eq!(shipped, Some(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Propagation Modes
//!
//! | Mode | No active transaction | Active transaction present |
//! |------|-----------------------|----------------------------|
//! | `Required` | start one | join |
//! | `Mandatory` | error | join |
//! | `RequiresNew` | start one | suspend, start one, resume |
//! | `NotSupported` | run plain | suspend, run plain, resume |
//! | `Never` | run plain | error |
//! | `Supports` | run plain | join |
//! | `Nested` | error (unsupported) | error (unsupported) |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod engine;
pub mod handler;
pub mod intercept;
pub mod metadata;
pub mod resolver;

// ============================================================================
// Re-exports: Metadata
// ============================================================================

pub use metadata::{
    ANY, ClassifiedError, ErrorClass, FATAL, HandlerType, Propagation, ResourceId,
    RollbackDecision, RollbackRules, TransactionMetadata,
};

// ============================================================================
// Re-exports: Handler contract
// ============================================================================

pub use handler::{
    LifecycleCounts, MemoryHandler, MemoryTransaction, TransactionHandler, TxHandle, TxPhase,
};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use engine::{Builder, ContextKey, ExceptionHandler, TransactionManager};

// ============================================================================
// Re-exports: Resolution & interception
// ============================================================================

pub use intercept::{CurrentResource, Interceptor, Transactional};
pub use resolver::{ANY_METHOD, CallSite, DeclaredResolver, MetadataResolver};

// ============================================================================
// Re-exports: Configuration
// ============================================================================

pub use config::{GlobalNames, ManagerKind, TxConfig};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Propagation-contract violation: the mode demands an ambient
    /// transaction and none is active.
    #[error("{0} call requires an active transaction")]
    TransactionRequired(Propagation),

    /// Propagation-contract violation: the mode forbids an ambient
    /// transaction and one is active.
    #[error("active transaction not allowed for {0} call")]
    TransactionNotAllowed(Propagation),

    /// Propagation mode this engine does not implement.
    #[error("propagation {0} is not supported")]
    UnsupportedPropagation(Propagation),

    /// A handler lifecycle hook failed.
    #[error("handler '{handler}' failed during {op}: {source}")]
    Handler {
        handler: HandlerType,
        op: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Metadata named a handler type nothing is registered under.
    #[error("no handler registered for type '{0}'")]
    UnknownHandler(HandlerType),

    /// A transaction handle reached a handler of a different native type.
    #[error("transaction handle type mismatch for handler '{0}'")]
    HandleType(HandlerType),

    /// Handler-native transaction state violation.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Commit refused because the transaction was marked rollback-only.
    #[error("transaction is marked rollback-only")]
    RollbackOnly,

    /// No transaction in progress for the requested resource.
    #[error("no transaction in progress for resource '{0}'")]
    NoTransaction(ResourceId),

    /// Startup configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of one intercepted invocation: either the engine (or a handler
/// it drove) failed, or the guarded call itself did — the latter
/// propagates unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Engine(#[from] Error),

    #[error(transparent)]
    Guarded(E),
}

impl<E> CallError<E> {
    /// The guarded call's own error, if that is what this is.
    pub fn into_guarded(self) -> Option<E> {
        match self {
            CallError::Guarded(e) => Some(e),
            CallError::Engine(_) => None,
        }
    }
}

/// Result of one intercepted invocation. `Ok(None)` means an exception
/// handler swallowed the guarded call's error.
pub type CallResult<T, E> = std::result::Result<Option<T>, CallError<E>>;

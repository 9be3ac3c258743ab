//! # Propagation Engine
//!
//! The state machine at the center of the crate. One invocation comes in
//! with resolved [`TransactionMetadata`]; the engine checks whether a
//! transaction is already active for the governed resource on this thread,
//! then drives the resource handler through the lifecycle the propagation
//! mode demands.
//!
//! | Mode | No active transaction | Active transaction present |
//! |------|-----------------------|----------------------------|
//! | `Required` | own full lifecycle | join |
//! | `Mandatory` | error | join |
//! | `RequiresNew` | own full lifecycle | suspend, own, resume |
//! | `NotSupported` | plain call | suspend, plain call, resume |
//! | `Never` | plain call | error |
//! | `Supports` | plain call | join |
//! | `Nested` | error | error |
//!
//! "Join" performs only the handler's join-global hook — the owning call
//! keeps lifecycle responsibility. Release and cleanup of an owned
//! transaction run unconditionally, even when commit or rollback fails,
//! so handler-native resources never leak.

pub mod context;
pub mod exceptions;

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use crate::config::{ManagerKind, TxConfig};
use crate::handler::{HandlerProtocol, HandlerRegistry, TransactionHandler, TxHandle};
use crate::metadata::{
    ClassifiedError, HandlerType, Propagation, RollbackDecision, TransactionMetadata,
};
use crate::resolver::{CallSite, DeclaredResolver, MetadataResolver, resolve_chain};
use crate::{CallError, CallResult, Error, Result};

pub use context::ContextKey;
pub use exceptions::ExceptionHandler;

// ============================================================================
// TransactionManager
// ============================================================================

/// The propagation engine. Holds the handler registry, the resolver
/// chain, and the runtime configuration; all three are read-only after
/// [`Builder::build`]. Transactional state itself lives in thread-scoped
/// context, so one manager serves any number of threads.
pub struct TransactionManager {
    handlers: HandlerRegistry,
    resolvers: Vec<Arc<dyn MetadataResolver>>,
    config: TxConfig,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("resolvers", &self.resolvers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Resolve an intercepted call through the resolver chain.
    pub(crate) fn resolve(&self, call: &CallSite) -> Option<TransactionMetadata> {
        resolve_chain(&self.resolvers, call)
    }

    /// Run `body` under the transactional behavior `meta` describes.
    ///
    /// `Ok(Some(value))` is the guarded call's return value;
    /// `Ok(None)` means an exception handler swallowed the call's error.
    pub fn execute<T, E, F>(&self, meta: &TransactionMetadata, body: F) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let owned;
        let meta = if meta.handler.is_default() {
            owned = meta
                .clone()
                .with_handler(self.config.default_handler.clone());
            &owned
        } else {
            meta
        };
        let handler = self.handlers.get(&meta.handler).map_err(CallError::Engine)?;
        let key = ContextKey {
            handler: meta.handler.clone(),
            resource: meta.resource.clone(),
        };
        let active = handler.current_transaction(&key).is_some();
        tracing::debug!(
            mode = %meta.propagation,
            active,
            key = %key,
            depth = context::depth(),
            "dispatching"
        );

        match (meta.propagation, active) {
            (Propagation::Required, false) => self.owning(handler, &key, meta, body),
            (Propagation::Required, true) => self.joining(handler, &key, meta, body),
            (Propagation::Mandatory, true) => self.joining(handler, &key, meta, body),
            (Propagation::Mandatory, false) => {
                Err(Error::TransactionRequired(Propagation::Mandatory).into())
            }
            (Propagation::RequiresNew, _) => {
                let suspended = context::SuspendedTransaction::suspend(&key);
                if suspended.was_active() {
                    tracing::debug!(key = %key, "suspended ambient transaction");
                }
                let result = self.owning(handler, &key, meta, body);
                drop(suspended);
                result
            }
            (Propagation::NotSupported, false) => self.plain(meta, body),
            (Propagation::NotSupported, true) => {
                let suspended = context::SuspendedTransaction::suspend(&key);
                tracing::debug!(key = %key, "suspended ambient transaction");
                let result = self.plain(meta, body);
                drop(suspended);
                result
            }
            (Propagation::Never, false) => self.plain(meta, body),
            (Propagation::Never, true) => {
                Err(Error::TransactionNotAllowed(Propagation::Never).into())
            }
            (Propagation::Supports, false) => self.plain(meta, body),
            (Propagation::Supports, true) => self.joining(handler, &key, meta, body),
            (Propagation::Nested, _) => {
                Err(Error::UnsupportedPropagation(Propagation::Nested).into())
            }
        }
    }

    // ========================================================================
    // Owning path
    // ========================================================================

    /// Full lifecycle: the invocation owns its transaction from create to
    /// cleanup.
    fn owning<T, E, F>(
        &self,
        handler: &Arc<dyn HandlerProtocol>,
        key: &ContextKey,
        meta: &TransactionMetadata,
        body: F,
    ) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        handler.initialize(meta).map_err(CallError::Engine)?;
        let tx = match handler.create_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                return Err(CallError::Engine(
                    settle(handler, None, Some(e)).expect("primary error is set"),
                ));
            }
        };
        if let Err(e) = self.start(handler, &tx) {
            return Err(CallError::Engine(
                settle(handler, Some(&tx), Some(e)).expect("primary error is set"),
            ));
        }

        context::bind(key, Arc::clone(&tx));
        let outcome = catch_unwind(AssertUnwindSafe(body));
        context::unbind(key);

        match outcome {
            Err(panic) => {
                // A panic is non-recoverable: roll back, settle, re-raise.
                let mut primary = None;
                if let Err(e) = handler.rollback_transaction(&tx) {
                    note(&mut primary, e);
                }
                if let Some(error) = settle(handler, Some(&tx), primary) {
                    tracing::warn!(%error, "lifecycle failure while unwinding");
                }
                resume_unwind(panic)
            }
            Ok(Ok(value)) => {
                let primary = handler.commit_transaction(&tx).err();
                match settle(handler, Some(&tx), primary) {
                    None => Ok(Some(value)),
                    Some(e) => Err(CallError::Engine(e)),
                }
            }
            Ok(Err(error)) => {
                if self.swallow(meta, &error, Some(&tx)) {
                    return match settle(handler, Some(&tx), None) {
                        None => Ok(None),
                        Some(e) => Err(CallError::Engine(e)),
                    };
                }
                let decision = meta.rules.decide(error.class());
                tracing::debug!(class = error.class().name(), ?decision, "rollback decision");
                let primary = match decision {
                    RollbackDecision::Rollback => handler.rollback_transaction(&tx).err(),
                    RollbackDecision::Commit => handler.commit_transaction(&tx).err(),
                };
                match settle(handler, Some(&tx), primary) {
                    None => Err(CallError::Guarded(error)),
                    Some(e) => {
                        tracing::warn!(guarded = %error, "guarded error displaced by lifecycle failure");
                        Err(CallError::Engine(e))
                    }
                }
            }
        }
    }

    /// Begin, plus global enlistment when the runtime coordinates
    /// globally.
    fn start(&self, handler: &Arc<dyn HandlerProtocol>, tx: &TxHandle) -> Result<()> {
        handler.begin_transaction(tx)?;
        if self.config.manager == ManagerKind::Global {
            handler.join_global_transaction()?;
        }
        Ok(())
    }

    // ========================================================================
    // Joining path
    // ========================================================================

    /// Join the ambient transaction: the join-global hook only, no
    /// lifecycle. A rollback-worthy failure marks the ambient transaction
    /// rollback-only so its owner's commit must refuse.
    fn joining<T, E, F>(
        &self,
        handler: &Arc<dyn HandlerProtocol>,
        key: &ContextKey,
        meta: &TransactionMetadata,
        body: F,
    ) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        handler.join_global_transaction().map_err(CallError::Engine)?;
        match catch_unwind(AssertUnwindSafe(body)) {
            Err(panic) => {
                if let Some(tx) = handler.current_transaction(key) {
                    if let Err(error) = handler.mark_rollback_only(&tx) {
                        tracing::warn!(%error, "mark_rollback_only failed while unwinding");
                    }
                }
                resume_unwind(panic)
            }
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(error)) => {
                let tx = handler.current_transaction(key);
                if self.swallow(meta, &error, tx.as_ref()) {
                    return Ok(None);
                }
                if meta.rules.decide(error.class()) == RollbackDecision::Rollback {
                    if let Some(tx) = &tx {
                        if let Err(lifecycle) = handler.mark_rollback_only(tx) {
                            tracing::warn!(guarded = %error, "guarded error displaced by lifecycle failure");
                            return Err(CallError::Engine(lifecycle));
                        }
                    }
                }
                Err(CallError::Guarded(error))
            }
        }
    }

    // ========================================================================
    // Plain path
    // ========================================================================

    /// No transaction at all. Errors still pass through the exception
    /// handler, but there is nothing to commit or roll back.
    fn plain<T, E, F>(&self, meta: &TransactionMetadata, body: F) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        match body() {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                if self.swallow(meta, &error, None) {
                    Ok(None)
                } else {
                    Err(CallError::Guarded(error))
                }
            }
        }
    }

    /// Offer the error to the configured exception handler, if any.
    fn swallow<E: ClassifiedError>(
        &self,
        meta: &TransactionMetadata,
        error: &E,
        tx: Option<&TxHandle>,
    ) -> bool {
        let Some(handler) = &meta.exception_handler else {
            return false;
        };
        let handled = handler.handle_exception(error, meta, tx);
        if handled {
            tracing::debug!(%error, "error claimed by exception handler, swallowing");
        }
        handled
    }
}

/// Run release (when a transaction exists) and cleanup, folding failures
/// into `primary`. The first error wins; later ones are logged and
/// dropped.
fn settle(
    handler: &Arc<dyn HandlerProtocol>,
    tx: Option<&TxHandle>,
    mut primary: Option<Error>,
) -> Option<Error> {
    if let Some(tx) = tx {
        if let Err(e) = handler.release_transaction(tx) {
            note(&mut primary, e);
        }
    }
    if let Err(e) = handler.cleanup() {
        note(&mut primary, e);
    }
    primary
}

fn note(primary: &mut Option<Error>, error: Error) {
    if primary.is_some() {
        tracing::warn!(%error, "secondary lifecycle failure dropped");
    } else {
        *primary = Some(error);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`TransactionManager`] from handler bindings, resolvers,
/// call-site declarations, and configuration. Startup-time validation
/// happens in [`Builder::build`]; nothing is checked at call time.
pub struct Builder {
    handlers: HandlerRegistry,
    resolvers: Vec<Arc<dyn MetadataResolver>>,
    declared: DeclaredResolver,
    config: TxConfig,
}

impl Builder {
    fn new() -> Self {
        Builder {
            handlers: HandlerRegistry::new(),
            resolvers: Vec::new(),
            declared: DeclaredResolver::new(),
            config: TxConfig::default(),
        }
    }

    /// Register a handler under `name`. Accepts the handler by value or
    /// already wrapped in an `Arc` (useful when the caller keeps a
    /// reference, e.g. to observe `MemoryHandler` counters).
    pub fn handler<H: TransactionHandler>(
        mut self,
        name: impl Into<HandlerType>,
        handler: impl Into<Arc<H>>,
    ) -> Self {
        self.handlers.insert(name.into(), handler.into());
        self
    }

    /// Append a resolver to the chain. Registration order is resolution
    /// order; the declared-metadata fallback always runs last.
    pub fn resolver(mut self, resolver: impl MetadataResolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Declare metadata for a call site, fed to the fallback resolver.
    /// A method of `"*"` declares the target-wide fallback.
    pub fn declare(
        mut self,
        target: impl Into<String>,
        method: impl Into<String>,
        meta: TransactionMetadata,
    ) -> Self {
        self.declared.declare(target, method, meta);
        self
    }

    pub fn config(mut self, config: TxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_handler(mut self, name: impl Into<HandlerType>) -> Self {
        self.config.default_handler = name.into();
        self
    }

    pub fn build(mut self) -> Result<TransactionManager> {
        if self.handlers.is_empty() {
            return Err(Error::Config("no transaction handlers registered".into()));
        }
        if self.config.default_handler.is_default() {
            match self.handlers.sole_handler() {
                Some(name) => self.config.default_handler = name,
                None => {
                    return Err(Error::Config(format!(
                        "{} handlers registered but no default handler configured",
                        self.handlers.len()
                    )));
                }
            }
        }
        if !self.handlers.contains(&self.config.default_handler) {
            return Err(Error::Config(format!(
                "default handler '{}' is not registered",
                self.config.default_handler
            )));
        }
        // The declared-metadata fallback terminates every chain.
        self.resolvers.push(Arc::new(self.declared));
        Ok(TransactionManager {
            handlers: self.handlers,
            resolvers: self.resolvers,
            config: self.config,
        })
    }
}

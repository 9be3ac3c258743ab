//! # Interception Layer
//!
//! Connects wrapped service contracts to the propagation engine. There is
//! exactly one delegation point — [`Interceptor::invoke`] — and two ways
//! to put a service behind it, mirroring the two proxy strategies a
//! reflective runtime would use:
//!
//! - **interface-style**: wrap an `Arc<dyn Trait>` in a
//!   [`Transactional`] and hand-write one forwarding impl per contract;
//! - **concrete-style**: wrap the struct itself — `Transactional<MyService>`
//!   owns it and forwards the same way.
//!
//! Application code inside a wrapped method reaches its live resource
//! through [`CurrentResource`]; it only ever sees the handler-native
//! resource type, never the engine.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::context::{self, ContextKey};
use crate::engine::TransactionManager;
use crate::handler::TransactionHandler;
use crate::metadata::{ClassifiedError, HandlerType, ResourceId};
use crate::resolver::CallSite;
use crate::{CallError, CallResult, Error, Result};

// ============================================================================
// Interceptor
// ============================================================================

/// Cheap-clone handle over the runtime: resolves a call site through the
/// resolver chain and funnels the call body through the engine.
///
/// A call site no resolver recognizes is not transactional — its body
/// runs directly, with no lifecycle and no rollback decision. This lets a
/// wrapped service mix declared and undeclared methods.
#[derive(Clone)]
pub struct Interceptor {
    manager: Arc<TransactionManager>,
}

impl Interceptor {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Interceptor { manager }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// The single delegation point every wrapped call goes through.
    pub fn invoke<T, E, F>(&self, call: &CallSite, body: F) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        match self.manager.resolve(call) {
            Some(meta) => {
                tracing::debug!(call = %call, meta = ?meta, "intercepted");
                self.manager.execute(&meta, body)
            }
            None => {
                tracing::trace!(call = %call, "no metadata resolved, running plain");
                body().map(Some).map_err(CallError::Guarded)
            }
        }
    }
}

// ============================================================================
// Transactional wrapper
// ============================================================================

/// Decorator that puts a whole service behind the interceptor.
///
/// ```
/// use std::sync::Arc;
/// use txguard::{
///     CallResult, Interceptor, MemoryHandler, Propagation, Transactional,
///     TransactionManager, TransactionMetadata,
/// };
/// # #[derive(Debug)]
/// # struct NoFault;
/// # impl std::fmt::Display for NoFault {
/// #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
/// #         f.write_str("no fault")
/// #     }
/// # }
/// # impl std::error::Error for NoFault {}
/// # impl txguard::ClassifiedError for NoFault {}
///
/// struct OrderService;
///
/// impl OrderService {
///     fn place(&self, qty: u32) -> Result<u32, NoFault> {
///         Ok(qty)
///     }
/// }
///
/// # fn main() -> txguard::Result<()> {
/// let manager = Arc::new(
///     TransactionManager::builder()
///         .handler("memory", MemoryHandler::new())
///         .declare(
///             "OrderService",
///             "*",
///             TransactionMetadata::new(Propagation::Required),
///         )
///         .build()?,
/// );
///
/// let orders = Transactional::wrap(OrderService, "OrderService", Interceptor::new(manager));
/// let placed: CallResult<u32, NoFault> = orders.call("place", |svc| svc.place(3));
/// assert_eq!(placed.unwrap(), Some(3));
/// # Ok(())
/// # }
/// ```
pub struct Transactional<S> {
    service: S,
    target: String,
    interceptor: Interceptor,
}

impl<S> Transactional<S> {
    pub fn wrap(service: S, target: impl Into<String>, interceptor: Interceptor) -> Self {
        Transactional {
            service,
            target: target.into(),
            interceptor,
        }
    }

    /// Forward one method call through the engine. Hand-written wrappers
    /// call this once per contract method.
    pub fn call<T, E, F>(&self, method: &str, body: F) -> CallResult<T, E>
    where
        E: ClassifiedError,
        F: FnOnce(&S) -> std::result::Result<T, E>,
    {
        let call = CallSite::new(self.target.clone(), method);
        self.interceptor.invoke(&call, || body(&self.service))
    }

    /// Access the wrapped service without interception.
    pub fn get_ref(&self) -> &S {
        &self.service
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

// ============================================================================
// CurrentResource
// ============================================================================

/// Typed supplier of the live handler-native resource for application
/// code running inside a transactional call.
///
/// Constructed once per resource and freely cloneable; [`CurrentResource::get`]
/// reads the calling thread's context, so the same supplier works from
/// any thread the runtime dispatches on.
pub struct CurrentResource<H: TransactionHandler> {
    key: ContextKey,
    _handler: PhantomData<fn() -> H>,
}

impl<H: TransactionHandler> CurrentResource<H> {
    pub fn new(handler: impl Into<HandlerType>, resource: impl Into<ResourceId>) -> Self {
        CurrentResource {
            key: ContextKey::new(handler, resource),
            _handler: PhantomData,
        }
    }

    /// The live resource for the current thread's transaction.
    pub fn get(&self) -> Result<Arc<H::Tx>> {
        self.try_get()
            .ok_or_else(|| Error::NoTransaction(self.key.resource.clone()))
    }

    pub fn try_get(&self) -> Option<Arc<H::Tx>> {
        context::current_as::<H::Tx>(&self.key)
    }
}

impl<H: TransactionHandler> Clone for CurrentResource<H> {
    fn clone(&self) -> Self {
        CurrentResource {
            key: self.key.clone(),
            _handler: PhantomData,
        }
    }
}

impl<H: TransactionHandler> std::fmt::Debug for CurrentResource<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentResource")
            .field("key", &self.key)
            .finish()
    }
}

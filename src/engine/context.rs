//! Thread-scoped transaction context.
//!
//! A per-thread stack of `(ContextKey → TxHandle)` frames. The engine is
//! the sole mutator: it binds a handle around the owning span of a call
//! and detaches/reattaches handles for suspension. Handlers and
//! application code only ever read through [`current_as`]-backed
//! accessors.
//!
//! Thread scoping is what makes nested calls on one thread observe
//! "transaction already active" while concurrent calls on other threads
//! stay independent. Nothing here is shared across threads.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use crate::handler::TxHandle;
use crate::metadata::{HandlerType, ResourceId};

// ============================================================================
// ContextKey
// ============================================================================

/// Identifies one transactional resource on the current thread: which
/// handler kind governs it, and which named instance it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub handler: HandlerType,
    pub resource: ResourceId,
}

impl ContextKey {
    pub fn new(handler: impl Into<HandlerType>, resource: impl Into<ResourceId>) -> Self {
        ContextKey {
            handler: handler.into(),
            resource: resource.into(),
        }
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.handler, self.resource)
    }
}

// ============================================================================
// Frame stack
// ============================================================================

struct Frame {
    key: ContextKey,
    tx: TxHandle,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Bind `tx` as the current transaction for `key`.
pub(crate) fn bind(key: &ContextKey, tx: TxHandle) {
    FRAMES.with(|frames| {
        frames.borrow_mut().push(Frame {
            key: key.clone(),
            tx,
        });
    });
}

/// Detach the most recent binding for `key`, returning it.
pub(crate) fn unbind(key: &ContextKey) -> Option<TxHandle> {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let pos = frames.iter().rposition(|f| f.key == *key)?;
        Some(frames.remove(pos).tx)
    })
}

/// The current transaction for `key`, if any.
pub(crate) fn current(key: &ContextKey) -> Option<TxHandle> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|f| f.key == *key)
            .map(|f| Arc::clone(&f.tx))
    })
}

/// Typed view of [`current`], downcast to the handler-native handle type.
pub(crate) fn current_as<T: Any + Send + Sync>(key: &ContextKey) -> Option<Arc<T>> {
    current(key).and_then(|tx| tx.downcast::<T>().ok())
}

/// Number of live bindings on this thread. Diagnostic only.
pub(crate) fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

// ============================================================================
// Suspension
// ============================================================================

/// A transaction set aside so an incompatible propagation mode can run
/// without it. Rebinds on drop, so every suspend is resumed exactly once —
/// including when the nested call unwinds.
pub(crate) struct SuspendedTransaction {
    key: ContextKey,
    tx: Option<TxHandle>,
}

impl SuspendedTransaction {
    /// Detach the current binding for `key`, if any.
    pub(crate) fn suspend(key: &ContextKey) -> Self {
        SuspendedTransaction {
            key: key.clone(),
            tx: unbind(key),
        }
    }

    pub(crate) fn was_active(&self) -> bool {
        self.tx.is_some()
    }
}

impl Drop for SuspendedTransaction {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::debug!(key = %self.key, "resumed transaction");
            bind(&self.key, tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(resource: &'static str) -> ContextKey {
        ContextKey::new("memory", resource)
    }

    fn handle(n: u64) -> TxHandle {
        Arc::new(n)
    }

    #[test]
    fn test_bind_unbind_lifo_per_key() {
        let k = key("a");
        bind(&k, handle(1));
        bind(&k, handle(2));
        assert_eq!(current_as::<u64>(&k).as_deref(), Some(&2));
        assert_eq!(unbind(&k).unwrap().downcast::<u64>().ok().as_deref(), Some(&2));
        assert_eq!(current_as::<u64>(&k).as_deref(), Some(&1));
        unbind(&k);
        assert!(current(&k).is_none());
    }

    #[test]
    fn test_keys_do_not_interfere() {
        let ka = key("left");
        let kb = key("right");
        bind(&ka, handle(10));
        assert!(current(&kb).is_none());
        bind(&kb, handle(20));
        unbind(&ka);
        assert_eq!(current_as::<u64>(&kb).as_deref(), Some(&20));
        unbind(&kb);
    }

    #[test]
    fn test_suspend_rebinds_on_drop() {
        let k = key("suspend");
        bind(&k, handle(7));
        {
            let suspended = SuspendedTransaction::suspend(&k);
            assert!(suspended.was_active());
            assert!(current(&k).is_none());
        }
        assert_eq!(current_as::<u64>(&k).as_deref(), Some(&7));
        unbind(&k);
    }

    #[test]
    fn test_suspend_without_active_is_noop() {
        let k = key("idle");
        let before = depth();
        {
            let suspended = SuspendedTransaction::suspend(&k);
            assert!(!suspended.was_active());
        }
        assert_eq!(depth(), before);
    }

    #[test]
    fn test_threads_are_independent() {
        let k = key("shared-name");
        bind(&k, handle(1));
        let seen = std::thread::spawn({
            let k = k.clone();
            move || current(&k).is_some()
        })
        .join()
        .unwrap();
        assert!(!seen);
        unbind(&k);
    }
}

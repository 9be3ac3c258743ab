//! # Metadata Resolution
//!
//! Maps an intercepted call to its [`TransactionMetadata`]. Resolvers run
//! in registration order and the first one returning `Some` wins; the
//! chain always ends with a [`DeclaredResolver`] holding the call-site
//! declarations registered at startup, so a call the chain recognizes
//! nowhere else still gets its declared policy.
//!
//! There is no runtime reflection: call sites are plain
//! `target`/`method` name pairs, declared explicitly.

use hashbrown::HashMap;

use crate::metadata::TransactionMetadata;

// ============================================================================
// CallSite
// ============================================================================

/// Describes one intercepted call: the wrapped contract's name and the
/// method being invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub target: String,
    pub method: String,
}

impl CallSite {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        CallSite {
            target: target.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.target, self.method)
    }
}

// ============================================================================
// MetadataResolver trait
// ============================================================================

/// Strategy that derives transaction metadata for an intercepted call.
///
/// `defaults` carries the engine-wide default metadata; a resolver that
/// recognizes the call copies it and overrides the fields it knows about.
/// Returning `None` passes the call to the next resolver in the chain.
pub trait MetadataResolver: Send + Sync {
    fn resolve(
        &self,
        call: &CallSite,
        defaults: &TransactionMetadata,
    ) -> Option<TransactionMetadata>;
}

impl<F> MetadataResolver for F
where
    F: Fn(&CallSite, &TransactionMetadata) -> Option<TransactionMetadata> + Send + Sync,
{
    fn resolve(
        &self,
        call: &CallSite,
        defaults: &TransactionMetadata,
    ) -> Option<TransactionMetadata> {
        self(call, defaults)
    }
}

// ============================================================================
// DeclaredResolver
// ============================================================================

/// Wildcard method name: a declaration for `(target, "*")` applies to
/// every method of `target` that has no exact declaration.
pub const ANY_METHOD: &str = "*";

/// The fallback resolver: a startup-registered map of call-site
/// declarations. Exact `target::method` declarations win over
/// `target::*` wildcards.
///
/// The runtime builder appends one of these to every chain, fed by its
/// `declare` calls, so declared call sites resolve even when no custom
/// resolver recognizes them.
#[derive(Default)]
pub struct DeclaredResolver {
    exact: HashMap<CallSite, TransactionMetadata>,
    wildcard: HashMap<String, TransactionMetadata>,
}

impl DeclaredResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare metadata for `target::method`. A `method` of [`ANY_METHOD`]
    /// declares the target-wide fallback.
    pub fn declare(
        &mut self,
        target: impl Into<String>,
        method: impl Into<String>,
        meta: TransactionMetadata,
    ) {
        let target = target.into();
        let method = method.into();
        if method == ANY_METHOD {
            self.wildcard.insert(target, meta);
        } else {
            self.exact.insert(CallSite { target, method }, meta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

impl MetadataResolver for DeclaredResolver {
    fn resolve(
        &self,
        call: &CallSite,
        _defaults: &TransactionMetadata,
    ) -> Option<TransactionMetadata> {
        self.exact
            .get(call)
            .or_else(|| self.wildcard.get(&call.target))
            .cloned()
    }
}

// ============================================================================
// Chain resolution
// ============================================================================

/// First non-`None` result wins, in registration order.
pub(crate) fn resolve_chain(
    resolvers: &[std::sync::Arc<dyn MetadataResolver>],
    call: &CallSite,
) -> Option<TransactionMetadata> {
    let defaults = TransactionMetadata::default();
    resolvers.iter().find_map(|r| r.resolve(call, &defaults))
}

//! # Transaction Metadata
//!
//! Per-invocation descriptors that tell the engine what to do: the
//! propagation mode, which handler governs the resource, which resource
//! instance, and the rollback policy. These types cross every boundary:
//! resolver ↔ engine ↔ handler.
//!
//! This module is pure data — no I/O, no thread state.

pub mod propagation;
pub mod rules;

use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::ExceptionHandler;

pub use propagation::Propagation;
pub use rules::{ClassifiedError, ErrorClass, RollbackDecision, RollbackRules, ANY, FATAL};

// ============================================================================
// HandlerType
// ============================================================================

/// Names a registered resource handler kind (e.g. `"jms"`, `"jdbc"`,
/// `"memory"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerType(Cow<'static, str>);

impl HandlerType {
    /// Sentinel meaning "substitute the runtime's configured default
    /// handler at execution time".
    pub const DEFAULT: HandlerType = HandlerType(Cow::Borrowed("default"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        HandlerType(name.into())
    }

    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for HandlerType {
    fn from(name: &'static str) -> Self {
        HandlerType::new(name)
    }
}

impl From<String> for HandlerType {
    fn from(name: String) -> Self {
        HandlerType::new(name)
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ResourceId
// ============================================================================

/// Distinguishes multiple resources of the same handler type, e.g. a
/// connection or session name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Cow<'static, str>);

impl ResourceId {
    pub const DEFAULT: ResourceId = ResourceId(Cow::Borrowed("default"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        ResourceId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ResourceId {
    fn from(name: &'static str) -> Self {
        ResourceId::new(name)
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        ResourceId::new(name)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TransactionMetadata
// ============================================================================

/// Everything the engine needs to know about one transactional call.
///
/// Built by a resolver (or by hand), then treated as immutable for the
/// duration of the invocation.
#[derive(Clone)]
pub struct TransactionMetadata {
    pub propagation: Propagation,
    pub handler: HandlerType,
    pub resource: ResourceId,
    pub rules: RollbackRules,
    /// Optional hook consulted before the default rollback decision.
    pub exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl Default for TransactionMetadata {
    fn default() -> Self {
        TransactionMetadata {
            propagation: Propagation::Required,
            handler: HandlerType::DEFAULT,
            resource: ResourceId::DEFAULT,
            rules: RollbackRules::default(),
            exception_handler: None,
        }
    }
}

impl TransactionMetadata {
    pub fn new(propagation: Propagation) -> Self {
        TransactionMetadata {
            propagation,
            ..Default::default()
        }
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_handler(mut self, handler: impl Into<HandlerType>) -> Self {
        self.handler = handler.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<ResourceId>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_rules(mut self, rules: RollbackRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_rollback_on(mut self, class: &'static ErrorClass) -> Self {
        self.rules = self.rules.with_rollback_on(class);
        self
    }

    pub fn with_no_rollback_for(mut self, class: &'static ErrorClass) -> Self {
        self.rules = self.rules.with_no_rollback_for(class);
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for TransactionMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMetadata")
            .field("propagation", &self.propagation)
            .field("handler", &self.handler)
            .field("resource", &self.resource)
            .field("rules", &self.rules)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let meta = TransactionMetadata::default();
        assert_eq!(meta.propagation, Propagation::Required);
        assert!(meta.handler.is_default());
        assert_eq!(meta.resource, ResourceId::DEFAULT);
        assert!(meta.rules.rollback_on.is_empty());
        assert!(meta.exception_handler.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let meta = TransactionMetadata::new(Propagation::RequiresNew)
            .with_handler("jms")
            .with_resource("orders-queue");
        assert_eq!(meta.propagation, Propagation::RequiresNew);
        assert_eq!(meta.handler.as_str(), "jms");
        assert_eq!(meta.resource.as_str(), "orders-queue");
    }
}

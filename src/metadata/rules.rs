//! Error classes and rollback rules.
//!
//! Rust has no open class-hierarchy queries, so rollback rules are expressed
//! over an explicit tree of error classes: `static` nodes linked by parent
//! pointers. An application declares its own classes under [`ANY`] (or under
//! [`FATAL`] for non-recoverable conditions) and tags its error types with
//! them via [`ClassifiedError`].

use smallvec::SmallVec;

// ============================================================================
// ErrorClass
// ============================================================================

/// A node in the error-class tree.
///
/// Classes are declared as statics and compared by address, so two classes
/// are the same class only if they are the same static:
///
/// ```
/// use txguard::{ErrorClass, ANY};
///
/// static IO: ErrorClass = ErrorClass::subclass("io", &ANY);
/// static TIMEOUT: ErrorClass = ErrorClass::subclass("timeout", &IO);
///
/// assert!(TIMEOUT.is_within(&IO));
/// assert_eq!(TIMEOUT.distance_to(&ANY), Some(2));
/// ```
pub struct ErrorClass {
    name: &'static str,
    parent: Option<&'static ErrorClass>,
}

/// Root of the class tree. Every class is within `ANY`, and the default
/// rollback policy rolls back on it.
pub static ANY: ErrorClass = ErrorClass { name: "any", parent: None };

/// Non-recoverable errors. Classes within `FATAL` always force rollback,
/// regardless of configured rules.
pub static FATAL: ErrorClass = ErrorClass::subclass("fatal", &ANY);

impl ErrorClass {
    /// Declare a class under `parent`.
    pub const fn subclass(name: &'static str, parent: &'static ErrorClass) -> Self {
        ErrorClass {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of parent hops from `self` up to `ancestor`, or `None` if
    /// `ancestor` is not on the parent chain. `Some(0)` means same class.
    pub fn distance_to(&self, ancestor: &'static ErrorClass) -> Option<u32> {
        let mut cur = self;
        let mut hops = 0;
        loop {
            if std::ptr::eq(cur, ancestor) {
                return Some(hops);
            }
            cur = cur.parent?;
            hops += 1;
        }
    }

    /// Whether `self` is `ancestor` or one of its descendants.
    pub fn is_within(&self, ancestor: &'static ErrorClass) -> bool {
        self.distance_to(ancestor).is_some()
    }
}

impl PartialEq for ErrorClass {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for ErrorClass {}

impl std::fmt::Debug for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.parent {
            Some(p) => write!(f, "ErrorClass({} < {})", self.name, p.name),
            None => write!(f, "ErrorClass({})", self.name),
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

// ============================================================================
// ClassifiedError
// ============================================================================

/// An error type that places itself in the class tree.
///
/// Guarded calls return errors implementing this trait; the engine consults
/// [`ClassifiedError::class`] when applying rollback rules. The default
/// class is [`ANY`], which under the default rules means rollback.
pub trait ClassifiedError: std::error::Error + Send + Sync + 'static {
    fn class(&self) -> &'static ErrorClass {
        &ANY
    }
}

// ============================================================================
// RollbackRules
// ============================================================================

/// Outcome of the rollback decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackDecision {
    Commit,
    Rollback,
}

/// Per-invocation rollback policy.
///
/// `rollback_on` lists classes that force rollback; an empty set means
/// every classified error forces rollback (the default). `no_rollback_for`
/// is evaluated after `rollback_on` and vetoes it — when both sets match
/// the thrown class, the veto wins, even if the veto class is a subclass
/// of a rollback-on class. Classes within [`FATAL`] are never vetoed.
#[derive(Debug, Clone, Default)]
pub struct RollbackRules {
    pub rollback_on: SmallVec<[&'static ErrorClass; 2]>,
    pub no_rollback_for: SmallVec<[&'static ErrorClass; 2]>,
}

impl RollbackRules {
    /// The default policy: every error rolls back, nothing is vetoed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rollback_on(mut self, class: &'static ErrorClass) -> Self {
        self.rollback_on.push(class);
        self
    }

    pub fn with_no_rollback_for(mut self, class: &'static ErrorClass) -> Self {
        self.no_rollback_for.push(class);
        self
    }

    /// Most specific match for `class` in `set`: the rule with the fewest
    /// parent hops wins.
    fn closest(
        set: &[&'static ErrorClass],
        class: &'static ErrorClass,
    ) -> Option<(&'static ErrorClass, u32)> {
        set.iter()
            .filter_map(|rule| class.distance_to(rule).map(|d| (*rule, d)))
            .min_by_key(|(_, d)| *d)
    }

    /// Decide commit vs rollback for an error of `class`.
    pub fn decide(&self, class: &'static ErrorClass) -> RollbackDecision {
        if class.is_within(&FATAL) {
            tracing::debug!(class = class.name(), "fatal error class, forcing rollback");
            return RollbackDecision::Rollback;
        }
        let veto = Self::closest(&self.no_rollback_for, class);
        let force = if self.rollback_on.is_empty() {
            // Empty set matches everything, as if it held ANY.
            Some((&ANY as &'static ErrorClass, u32::MAX))
        } else {
            Self::closest(&self.rollback_on, class)
        };
        match (force, veto) {
            (_, Some((rule, _))) => {
                tracing::debug!(class = class.name(), rule = rule.name(), "rollback vetoed");
                RollbackDecision::Commit
            }
            (Some((rule, _)), None) => {
                tracing::debug!(class = class.name(), rule = rule.name(), "rollback forced");
                RollbackDecision::Rollback
            }
            (None, None) => RollbackDecision::Commit,
        }
    }
}

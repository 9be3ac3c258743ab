//! Propagation modes.

use serde::{Deserialize, Serialize};

/// Policy governing whether a call starts, joins, rejects, or ignores an
/// ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the ambient transaction; start one if none is active.
    Required,
    /// Join the ambient transaction; fail if none is active.
    Mandatory,
    /// Always start a fresh transaction, suspending any ambient one.
    RequiresNew,
    /// Run without a transaction, suspending any ambient one.
    NotSupported,
    /// Run without a transaction; fail if one is active.
    Never,
    /// Join the ambient transaction if present, otherwise run without one.
    Supports,
    /// Savepoint-style nesting. Not supported by this engine.
    Nested,
}

impl Default for Propagation {
    fn default() -> Self {
        Propagation::Required
    }
}

impl std::fmt::Display for Propagation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::Mandatory => "MANDATORY",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Supports => "SUPPORTS",
            Propagation::Nested => "NESTED",
        };
        f.write_str(name)
    }
}

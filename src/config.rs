//! Runtime configuration.
//!
//! Consumed at startup, never mutated afterwards. The embedding
//! application decides where this comes from (file, environment,
//! hard-coded); the crate only parses and validates.

use serde::{Deserialize, Serialize};

use crate::metadata::HandlerType;
use crate::{Error, Result};

/// Which coordination style owning transactions use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    /// Each handler coordinates its own resource. The default.
    #[default]
    Local,
    /// An external coordinator exists: owning transactions also enlist via
    /// `join_global_transaction` after begin.
    Global,
}

/// Lookup names for an external coordinator. Carried for the embedding
/// integration layer; the engine itself never performs the lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalNames {
    pub transaction_manager: String,
    pub user_transaction: String,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxConfig {
    /// Handler substituted when metadata carries `HandlerType::DEFAULT`.
    /// Leaving this at the sentinel is allowed when exactly one handler is
    /// registered — the builder resolves it to that handler.
    #[serde(default = "HandlerType::default_sentinel")]
    pub default_handler: HandlerType,

    #[serde(default)]
    pub manager: ManagerKind,

    #[serde(default)]
    pub global: Option<GlobalNames>,
}

impl Default for TxConfig {
    fn default() -> Self {
        TxConfig {
            default_handler: HandlerType::DEFAULT,
            manager: ManagerKind::Local,
            global: None,
        }
    }
}

impl TxConfig {
    /// Parse from a JSON document. Unknown fields are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

impl HandlerType {
    fn default_sentinel() -> HandlerType {
        HandlerType::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TxConfig::default();
        assert!(config.default_handler.is_default());
        assert_eq!(config.manager, ManagerKind::Local);
        assert!(config.global.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let config = TxConfig::from_json(
            r#"{
                "default_handler": "jms",
                "manager": "global",
                "global": {
                    "transaction_manager": "java:/TransactionManager",
                    "user_transaction": "java:comp/UserTransaction"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_handler.as_str(), "jms");
        assert_eq!(config.manager, ManagerKind::Global);
        assert_eq!(
            config.global.unwrap().user_transaction,
            "java:comp/UserTransaction"
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = TxConfig::from_json(r#"{"default_handler": "memory"}"#).unwrap();
        assert_eq!(config.manager, ManagerKind::Local);
        assert!(config.global.is_none());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = TxConfig::from_json(r#"{"default_handlr": "memory"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

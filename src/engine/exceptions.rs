//! Exception handler contract.

use crate::handler::TxHandle;
use crate::metadata::{ClassifiedError, TransactionMetadata};

/// Intercepts a guarded call's error before the default rollback decision.
///
/// Returning `true` claims the error: the engine skips the rollback
/// decision entirely (the transaction is left to whatever side effects the
/// handler performed — typically through `tx`), and the error is swallowed
/// at the interception boundary instead of propagating. Returning `false`
/// lets the default decision apply and the error propagate unchanged.
///
/// `tx` is the handler-native transaction handle of the governing
/// transaction, absent when the call ran without one.
pub trait ExceptionHandler: Send + Sync {
    fn handle_exception(
        &self,
        error: &dyn ClassifiedError,
        meta: &TransactionMetadata,
        tx: Option<&TxHandle>,
    ) -> bool;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&dyn ClassifiedError, &TransactionMetadata, Option<&TxHandle>) -> bool + Send + Sync,
{
    fn handle_exception(
        &self,
        error: &dyn ClassifiedError,
        meta: &TransactionMetadata,
        tx: Option<&TxHandle>,
    ) -> bool {
        self(error, meta, tx)
    }
}

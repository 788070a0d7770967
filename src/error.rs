// Error taxonomy for the capital ledger
//
// Every variant is detected before any write, or caught by the surrounding
// all-or-nothing transaction, so a failure never leaves a ledger entry
// without its matching balance update (or vice versa).

use rust_decimal::Decimal;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A debit would drive the vendor's balance below zero. Returned, never
    /// retried; the stored balance is untouched.
    #[error("insufficient balance: have {balance}, debit of {requested} would go negative")]
    InsufficientBalance { balance: Decimal, requested: Decimal },

    /// Amount was zero, negative, or otherwise unusable for this kind.
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Transaction kind string did not match any known kind.
    #[error("unknown transaction kind: {0}")]
    InvalidKind(String),

    /// Vendor / partner / supplier / good lookup failed.
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Offline goods with recorded sales cannot be deleted, so their cost
    /// is never reversed once a unit has sold.
    #[error("goods have {sold} sold unit(s); deletion would reverse cost already realized")]
    HasOutstandingSales { sold: i64 },

    /// An idempotency key was reused with a different request payload.
    #[error("idempotency key reused with a different payload")]
    IdempotencyConflict,

    /// Lock contention on the vendor row. Nothing was written, so the
    /// caller may safely retry.
    #[error("concurrent modification of vendor state; safe to retry")]
    ConcurrentModification,

    /// Caller's role does not carry the required capability.
    #[error("capability required: {0}")]
    Forbidden(&'static str),

    /// A ledger entry chain failed to replay (balance_before/after links
    /// broken, or the fold disagrees with the stored balance).
    #[error("ledger chain broken for vendor {vendor_id}: {detail}")]
    ChainBroken { vendor_id: String, detail: String },

    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED mean another writer holds the vendor
        // state; the transaction never started or never committed.
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return LedgerError::ConcurrentModification;
            }
        }
        LedgerError::Storage(err)
    }
}

impl LedgerError {
    /// True when the caller can retry the identical call without risking
    /// double-application.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_concurrent_modification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err: LedgerError = busy.into();
        assert!(matches!(err, LedgerError::ConcurrentModification));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_sqlite_errors_are_storage() {
        let err: LedgerError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(!err.is_retryable());
    }
}

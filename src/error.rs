//! Crate-wide error taxonomy
//!
//! One enum covers the wallet engine and the saga engine; both share the
//! same retry policy and the same HTTP mapping, so splitting the type per
//! module would only duplicate the classification logic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid amount: must be positive with at most 2 decimal places")]
    InvalidAmount,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("wallet is not active")]
    WalletNotActive,

    #[error("wallet is closed")]
    WalletClosed,

    #[error("daily withdrawal limit exceeded")]
    WithdrawalLimitExceeded,

    #[error("currency mismatch: {from} -> {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("wallet balance must be zero to close")]
    NonZeroBalance,

    #[error("source and destination wallets are the same")]
    SameWallet,

    #[error("concurrent request in flight")]
    ConcurrentRequest,

    #[error("version conflict on wallet {0}")]
    VersionConflict(String),

    #[error("illegal saga transition: {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("saga not found: {0}")]
    SagaNotFound(uuid::Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("event bus error: {0}")]
    Bus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// SQLSTATE codes the shared retry policy recovers from.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

impl WalletError {
    /// Whether the shared backoff policy should retry this error.
    ///
    /// Retryable: serialization failures, deadlocks, unique violations on
    /// insert-if-missing races, optimistic version conflicts, lock
    /// contention, and transient store connectivity. Business rule
    /// violations are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::VersionConflict(_) | WalletError::ConcurrentRequest => true,
            WalletError::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some(SQLSTATE_SERIALIZATION_FAILURE)
                    | Some(SQLSTATE_DEADLOCK_DETECTED)
                    | Some(SQLSTATE_UNIQUE_VIOLATION)
            ),
            WalletError::Database(sqlx::Error::Io(_))
            | WalletError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    /// Whether this is a business rule violation (fail fast, HTTP 422).
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidAmount
                | WalletError::WalletNotFound(_)
                | WalletError::InsufficientFunds
                | WalletError::WalletNotActive
                | WalletError::WalletClosed
                | WalletError::WithdrawalLimitExceeded
                | WalletError::CurrencyMismatch { .. }
                | WalletError::NonZeroBalance
                | WalletError::SameWallet
        )
    }

    /// Stable machine-readable kind, used in idempotent replays and in the
    /// `type` field of the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::InvalidAmount => "InvalidAmount",
            WalletError::Validation(_) => "Validation",
            WalletError::WalletNotFound(_) => "WalletNotFound",
            WalletError::InsufficientFunds => "InsufficientFunds",
            WalletError::WalletNotActive => "WalletNotActive",
            WalletError::WalletClosed => "WalletClosed",
            WalletError::WithdrawalLimitExceeded => "WithdrawalLimitExceeded",
            WalletError::CurrencyMismatch { .. } => "CurrencyMismatch",
            WalletError::NonZeroBalance => "NonZeroBalance",
            WalletError::SameWallet => "SameWallet",
            WalletError::ConcurrentRequest => "ConcurrentRequest",
            WalletError::VersionConflict(_) => "VersionConflict",
            WalletError::IllegalTransition { .. } => "IllegalTransition",
            WalletError::SagaNotFound(_) => "SagaNotFound",
            WalletError::Database(_) => "Database",
            WalletError::Cache(_) => "Cache",
            WalletError::Bus(_) => "Bus",
            WalletError::Serialization(_) => "Serialization",
            WalletError::Internal(_) => "Internal",
        }
    }

    /// Raw payload stored alongside [`kind`](Self::kind) so a replay can
    /// rebuild an error that renders exactly like the original. Variants
    /// without fields store their Display form, which reconstruction
    /// ignores.
    pub fn stored_message(&self) -> String {
        match self {
            WalletError::Validation(m) => m.clone(),
            WalletError::WalletNotFound(id) => id.clone(),
            WalletError::CurrencyMismatch { from, to } => format!("{} -> {}", from, to),
            _ => self.to_string(),
        }
    }

    /// Rebuild a business error from a stored `(kind, message)` pair.
    ///
    /// Used when replaying an idempotency record whose original outcome was
    /// an error: the replay must surface the same error the first attempt
    /// did. `message` carries the raw payload from
    /// [`stored_message`](Self::stored_message); saga metadata records the
    /// Display form instead, so the known prefixes are stripped rather than
    /// wrapped a second time. Unknown kinds collapse to `Validation`.
    pub fn from_stored(kind: &str, message: &str) -> WalletError {
        match kind {
            "InvalidAmount" => WalletError::InvalidAmount,
            "InsufficientFunds" => WalletError::InsufficientFunds,
            "WalletNotActive" => WalletError::WalletNotActive,
            "WalletClosed" => WalletError::WalletClosed,
            "WithdrawalLimitExceeded" => WalletError::WithdrawalLimitExceeded,
            "NonZeroBalance" => WalletError::NonZeroBalance,
            "SameWallet" => WalletError::SameWallet,
            "ConcurrentRequest" => WalletError::ConcurrentRequest,
            "WalletNotFound" => {
                let id = message.strip_prefix("wallet not found: ").unwrap_or(message);
                WalletError::WalletNotFound(id.to_string())
            }
            "CurrencyMismatch" => {
                let pair = message
                    .strip_prefix("currency mismatch: ")
                    .unwrap_or(message);
                let (from, to) = pair.split_once(" -> ").unwrap_or(("", pair));
                WalletError::CurrencyMismatch {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            "Validation" => {
                let msg = message.strip_prefix("validation error: ").unwrap_or(message);
                WalletError::Validation(msg.to_string())
            }
            _ => WalletError::Validation(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_errors_not_retryable() {
        assert!(!WalletError::InsufficientFunds.is_retryable());
        assert!(!WalletError::WalletNotActive.is_retryable());
        assert!(!WalletError::NonZeroBalance.is_retryable());
        assert!(WalletError::InsufficientFunds.is_business());
    }

    #[test]
    fn test_concurrency_errors_retryable() {
        assert!(WalletError::ConcurrentRequest.is_retryable());
        assert!(WalletError::VersionConflict("w1".into()).is_retryable());
    }

    #[test]
    fn test_programming_errors_not_retryable() {
        let err = WalletError::IllegalTransition {
            from: "COMPLETED",
            to: "PENDING",
        };
        assert!(!err.is_retryable());
        assert!(!err.is_business());
    }

    #[test]
    fn test_stored_roundtrip_renders_identically() {
        // A replayed error must surface the exact message the first
        // attempt produced, fielded variants included.
        let errs = [
            WalletError::InvalidAmount,
            WalletError::InsufficientFunds,
            WalletError::WalletNotActive,
            WalletError::WalletClosed,
            WalletError::WithdrawalLimitExceeded,
            WalletError::NonZeroBalance,
            WalletError::SameWallet,
            WalletError::ConcurrentRequest,
            WalletError::Validation("amount is required".into()),
            WalletError::WalletNotFound("bob".into()),
            WalletError::CurrencyMismatch {
                from: "USD".into(),
                to: "EUR".into(),
            },
        ];
        for err in errs {
            let replayed = WalletError::from_stored(err.kind(), &err.stored_message());
            assert_eq!(replayed.kind(), err.kind());
            assert_eq!(replayed.to_string(), err.to_string());
        }
    }

    #[test]
    fn test_from_stored_strips_display_prefixes() {
        // Saga metadata records the Display form; reconstruction must not
        // wrap the prefix a second time.
        let replayed = WalletError::from_stored("WalletNotFound", "wallet not found: bob");
        assert_eq!(replayed.to_string(), "wallet not found: bob");

        let replayed =
            WalletError::from_stored("CurrencyMismatch", "currency mismatch: USD -> EUR");
        assert_eq!(replayed.to_string(), "currency mismatch: USD -> EUR");

        let replayed = WalletError::from_stored("Validation", "validation error: bad field");
        assert_eq!(replayed.to_string(), "validation error: bad field");
    }

    #[test]
    fn test_unknown_kind_collapses_to_validation() {
        let err = WalletError::from_stored("SomethingNew", "oops");
        assert_eq!(err.kind(), "Validation");
    }
}

//! Wallet data access
//!
//! Three small repositories share this file: wallet rows, the append-only
//! event journal, and idempotency records. The journal deliberately exposes
//! insert and select only; the store-side trigger and role grants back the
//! same invariant.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use super::model::{NewWalletEvent, Wallet, WalletEvent, WalletStatus};
use crate::error::WalletError;

pub struct WalletRepository;

impl WalletRepository {
    const COLUMNS: &'static str = "wallet_id, balance, currency, status, \
         daily_withdrawal_limit, daily_withdrawal_total, last_withdrawal_date, \
         version, created_at, updated_at";

    pub async fn get(pool: &PgPool, wallet_id: &str) -> Result<Option<Wallet>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE wallet_id = $1",
            Self::COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(pool)
        .await?;

        row.map(map_wallet).transpose()
    }

    /// Plain read inside a transaction (no row lock).
    pub async fn get_in_tx(
        conn: &mut PgConnection,
        wallet_id: &str,
    ) -> Result<Option<Wallet>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE wallet_id = $1",
            Self::COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(map_wallet).transpose()
    }

    /// Load under an exclusive row lock; held until commit/rollback.
    pub async fn get_for_update(
        conn: &mut PgConnection,
        wallet_id: &str,
    ) -> Result<Option<Wallet>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE wallet_id = $1 FOR UPDATE",
            Self::COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(map_wallet).transpose()
    }

    /// Provision a wallet with zero balance. Returns `false` when a
    /// concurrent insert won the race (the row exists either way).
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        wallet_id: &str,
        currency: &str,
    ) -> Result<bool, WalletError> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (wallet_id, balance, currency, status, daily_withdrawal_total, version)
            VALUES ($1, 0, $2, $3, 0, 1)
            ON CONFLICT (wallet_id) DO NOTHING
            "#,
        )
        .bind(wallet_id)
        .bind(currency)
        .bind(WalletStatus::Active.id())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a mutated wallet with an optimistic version bump.
    pub async fn persist(conn: &mut PgConnection, wallet: &Wallet) -> Result<(), WalletError> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $1,
                status = $2,
                daily_withdrawal_limit = $3,
                daily_withdrawal_total = $4,
                last_withdrawal_date = $5,
                version = version + 1,
                updated_at = NOW()
            WHERE wallet_id = $6 AND version = $7
            "#,
        )
        .bind(wallet.balance)
        .bind(wallet.status.id())
        .bind(wallet.daily_withdrawal_limit)
        .bind(wallet.daily_withdrawal_total)
        .bind(wallet.last_withdrawal_date)
        .bind(&wallet.wallet_id)
        .bind(wallet.version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WalletError::VersionConflict(wallet.wallet_id.clone()));
        }
        Ok(())
    }
}

fn map_wallet(row: PgRow) -> Result<Wallet, WalletError> {
    let status_id: i16 = row.get("status");
    let status = WalletStatus::from_id(status_id)
        .ok_or_else(|| WalletError::Internal(format!("invalid wallet status id: {}", status_id)))?;

    Ok(Wallet {
        wallet_id: row.get("wallet_id"),
        balance: row.get("balance"),
        currency: row.get::<String, _>("currency").trim().to_string(),
        status,
        daily_withdrawal_limit: row.get("daily_withdrawal_limit"),
        daily_withdrawal_total: row.get("daily_withdrawal_total"),
        last_withdrawal_date: row.get("last_withdrawal_date"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Append-only journal access. No update or delete path exists here; the
/// store enforces the same with a trigger and role grants.
pub struct EventJournal;

impl EventJournal {
    pub async fn append(
        conn: &mut PgConnection,
        event: &NewWalletEvent,
    ) -> Result<i64, sqlx::Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO wallet_events (wallet_id, event_type, currency, amount, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id
            "#,
        )
        .bind(&event.wallet_id)
        .bind(event.event_type.as_str())
        .bind(&event.currency)
        .bind(event.amount)
        .bind(&event.metadata)
        .fetch_one(conn)
        .await?;

        Ok(id)
    }

    /// Event history, newest first. `limit` is capped by the caller.
    pub async fn history(
        pool: &PgPool,
        wallet_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, event_type, currency, amount, metadata, created_at
            FROM wallet_events
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WalletEvent {
                id: row.get("id"),
                wallet_id: row.get("wallet_id"),
                event_type: row.get("event_type"),
                currency: row.get::<String, _>("currency").trim().to_string(),
                amount: row.get("amount"),
                metadata: row.get("metadata"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

/// Stored outcome of a request, replayed verbatim on duplicate request ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredResponse {
    Success { body: serde_json::Value },
    Error { error_type: String, message: String },
}

impl StoredResponse {
    pub fn success<T: Serialize>(value: &T) -> Result<Self, WalletError> {
        Ok(StoredResponse::Success {
            body: serde_json::to_value(value)?,
        })
    }

    pub fn error(err: &WalletError) -> Self {
        StoredResponse::Error {
            error_type: err.kind().to_string(),
            // Raw payload, not the Display form: reconstruction re-renders
            // the message and must not wrap the prefix twice.
            message: err.stored_message(),
        }
    }

    /// Decode back into the original outcome.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, WalletError> {
        match self {
            StoredResponse::Success { body } => Ok(serde_json::from_value(body)?),
            StoredResponse::Error {
                error_type,
                message,
            } => Err(WalletError::from_stored(&error_type, &message)),
        }
    }
}

pub struct IdempotencyRepository;

impl IdempotencyRepository {
    pub async fn get(
        pool: &PgPool,
        request_id: &str,
    ) -> Result<Option<StoredResponse>, WalletError> {
        let row = sqlx::query("SELECT response FROM idempotency_keys WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(pool)
            .await?;

        decode_stored(row)
    }

    pub async fn get_in_tx(
        conn: &mut PgConnection,
        request_id: &str,
    ) -> Result<Option<StoredResponse>, WalletError> {
        let row = sqlx::query("SELECT response FROM idempotency_keys WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(conn)
            .await?;

        decode_stored(row)
    }

    /// Insert within the state-changing transaction. A unique violation
    /// surfaces as a retryable store error: the retry re-reads the winner's
    /// record.
    pub async fn insert(
        conn: &mut PgConnection,
        request_id: &str,
        response: &StoredResponse,
    ) -> Result<(), WalletError> {
        sqlx::query("INSERT INTO idempotency_keys (request_id, response) VALUES ($1, $2)")
            .bind(request_id)
            .bind(serde_json::to_value(response)?)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Insert unless some attempt already stored an outcome for the id.
    /// Used by the saga engine, whose response is only known at the final
    /// transition (recovery may have raced it there).
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        request_id: &str,
        response: &StoredResponse,
    ) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (request_id, response)
            VALUES ($1, $2)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(request_id)
        .bind(serde_json::to_value(response)?)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record a failed outcome after rollback, so replays of the same
    /// request id surface the same error. Losing this race is fine: some
    /// concurrent attempt stored an outcome for the id.
    pub async fn record_failure(pool: &PgPool, request_id: &str, response: &StoredResponse) {
        let value = match serde_json::to_value(response) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize idempotency record");
                return;
            }
        };
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (request_id, response)
            VALUES ($1, $2)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(request_id)
        .bind(value)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to record idempotency outcome");
        }
    }

    /// Drop records older than the retention window. Returns rows deleted.
    pub async fn purge_expired(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(older_than)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn decode_stored(row: Option<PgRow>) -> Result<Option<StoredResponse>, WalletError> {
    match row {
        Some(row) => {
            let value: serde_json::Value = row.get("response");
            Ok(Some(serde_json::from_value(value)?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_response_success_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Body {
            wallet_id: String,
            balance: String,
        }

        let body = Body {
            wallet_id: "alice".into(),
            balance: "100.00".into(),
        };
        let stored = StoredResponse::success(&body).unwrap();
        let decoded: Body = stored.into_result().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_stored_response_error_roundtrip() {
        let stored = StoredResponse::error(&WalletError::InsufficientFunds);
        let result: Result<serde_json::Value, _> = stored.into_result();
        assert!(matches!(result, Err(WalletError::InsufficientFunds)));
    }

    #[test]
    fn test_stored_error_replays_identical_message() {
        let errs = [
            WalletError::WalletNotFound("bob".to_string()),
            WalletError::CurrencyMismatch {
                from: "USD".to_string(),
                to: "EUR".to_string(),
            },
        ];
        for err in errs {
            let stored = StoredResponse::error(&err);
            let replayed = stored
                .into_result::<serde_json::Value>()
                .expect_err("stored error must replay as an error");
            assert_eq!(replayed.to_string(), err.to_string());
        }
    }

    #[test]
    fn test_stored_response_json_shape() {
        let stored = StoredResponse::error(&WalletError::WalletNotActive);
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["error_type"], "WalletNotActive");
    }
}

//! Transfer saga persistence
//!
//! All state updates are atomic CAS against the expected state; legality of
//! the edge is checked by the caller before the CAS so an illegal transition
//! fails loudly instead of silently losing the race.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::state::SagaState;
use crate::error::WalletError;

/// Saga legs with exactly-once effects, recorded in `saga_legs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaLeg {
    Credit,
    Compensate,
}

impl SagaLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaLeg::Credit => "CREDIT",
            SagaLeg::Compensate => "COMPENSATE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferSaga {
    pub id: Uuid,
    pub request_id: Option<String>,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub state: SagaState,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for TransferSaga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Saga[{}] {} -> {} amount={} state={}",
            self.id, self.from_wallet_id, self.to_wallet_id, self.amount, self.state
        )
    }
}

pub struct SagaRepository;

impl SagaRepository {
    const COLUMNS: &'static str = "id, request_id, from_wallet_id, to_wallet_id, \
         amount, currency, state, metadata, created_at, updated_at";

    /// Insert a new saga in PENDING state.
    pub async fn insert(
        conn: &mut PgConnection,
        saga: &TransferSaga,
    ) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO transfer_sagas
                (id, request_id, from_wallet_id, to_wallet_id, amount, currency, state, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            "#,
        )
        .bind(saga.id)
        .bind(&saga.request_id)
        .bind(&saga.from_wallet_id)
        .bind(&saga.to_wallet_id)
        .bind(saga.amount)
        .bind(&saga.currency)
        .bind(saga.state.id())
        .bind(&saga.metadata)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<TransferSaga>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_sagas WHERE id = $1",
            Self::COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(map_saga).transpose()
    }

    pub async fn get_in_tx(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<TransferSaga>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_sagas WHERE id = $1",
            Self::COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        row.map(map_saga).transpose()
    }

    /// Look up a saga by the client request id that created it.
    pub async fn get_by_request_id(
        pool: &PgPool,
        request_id: &str,
    ) -> Result<Option<TransferSaga>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_sagas WHERE request_id = $1",
            Self::COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(pool)
        .await?;

        row.map(map_saga).transpose()
    }

    pub async fn get_by_request_id_in_tx(
        conn: &mut PgConnection,
        request_id: &str,
    ) -> Result<Option<TransferSaga>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_sagas WHERE request_id = $1",
            Self::COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(conn)
        .await?;

        row.map(map_saga).transpose()
    }

    /// CAS transition guarded by the declared edge set.
    ///
    /// Returns `false` when the row was not in `from` (another worker
    /// advanced it first). An edge outside the state machine is a
    /// programming error and fails with `IllegalTransition`.
    pub async fn transition(
        conn: &mut PgConnection,
        id: Uuid,
        from: SagaState,
        to: SagaState,
        metadata_patch: Option<&serde_json::Value>,
    ) -> Result<bool, WalletError> {
        if !from.can_transition_to(to) {
            return Err(WalletError::IllegalTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas
            SET state = $1,
                metadata = metadata || COALESCE($2, '{}'::jsonb),
                updated_at = NOW()
            WHERE id = $3 AND state = $4
            "#,
        )
        .bind(to.id())
        .bind(metadata_patch)
        .bind(id)
        .bind(from.id())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sagas stuck in DEBITED past the threshold, oldest first.
    pub async fn find_stuck(
        pool: &PgPool,
        threshold: Duration,
        limit: i64,
    ) -> Result<Vec<TransferSaga>, WalletError> {
        let threshold_secs = threshold.as_secs() as i64;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transfer_sagas
            WHERE state = $1
              AND updated_at < NOW() - INTERVAL '1 second' * $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
            Self::COLUMNS
        ))
        .bind(SagaState::Debited.id())
        .bind(threshold_secs)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(map_saga).collect()
    }

    /// Record a leg execution. Returns `false` when the leg already ran
    /// (recovery replay after a lost status update must not re-apply it).
    pub async fn record_leg(
        conn: &mut PgConnection,
        id: Uuid,
        leg: SagaLeg,
    ) -> Result<bool, WalletError> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_legs (saga_id, leg)
            VALUES ($1, $2)
            ON CONFLICT (saga_id, leg) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(leg.as_str())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_saga(row: PgRow) -> Result<TransferSaga, WalletError> {
    let state_id: i16 = row.get("state");
    let state = SagaState::from_id(state_id)
        .ok_or_else(|| WalletError::Internal(format!("invalid saga state id: {}", state_id)))?;

    Ok(TransferSaga {
        id: row.get("id"),
        request_id: row.get("request_id"),
        from_wallet_id: row.get("from_wallet_id"),
        to_wallet_id: row.get("to_wallet_id"),
        amount: row.get("amount"),
        currency: row.get::<String, _>("currency").trim().to_string(),
        state,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

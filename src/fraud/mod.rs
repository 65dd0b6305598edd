//! Fraud detection
//!
//! At-least-once consumer applying idempotent rules to withdrawal events.
//! Rule evaluation lives in [`FraudProcessor`], separated from the broker
//! loop in [`FraudConsumer`] so the rules can be exercised without AMQP.

mod consumer;
mod processor;

pub use consumer::{FraudConsumer, FraudTopology};
pub use processor::{FraudProcessor, Outcome};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudAlertType {
    HighValueTransaction,
    RapidWithdrawals,
}

impl FraudAlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudAlertType::HighValueTransaction => "HIGH_VALUE_TRANSACTION",
            FraudAlertType::RapidWithdrawals => "RAPID_WITHDRAWALS",
        }
    }
}

/// Append-only alert record
#[derive(Debug, Clone)]
pub struct FraudAlert {
    pub id: i64,
    pub wallet_id: String,
    pub alert_type: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct FraudAlertRepository;

impl FraudAlertRepository {
    pub async fn insert(
        pool: &PgPool,
        wallet_id: &str,
        alert_type: FraudAlertType,
        details: serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO fraud_alerts (wallet_id, alert_type, details, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id
            "#,
        )
        .bind(wallet_id)
        .bind(alert_type.as_str())
        .bind(details)
        .fetch_one(pool)
        .await?;

        Ok(id)
    }

    pub async fn list_for_wallet(
        pool: &PgPool,
        wallet_id: &str,
    ) -> Result<Vec<FraudAlert>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, alert_type, details, created_at
            FROM fraud_alerts
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FraudAlert {
                id: row.get("id"),
                wallet_id: row.get("wallet_id"),
                alert_type: row.get("alert_type"),
                details: row.get("details"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

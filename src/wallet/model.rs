//! Wallet domain types
//!
//! Status ids are stored as SMALLINT; event types as TEXT (routing keys on
//! the bus derive from them).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum WalletStatus {
    Active = 1,
    Frozen = 2,
    Closed = 3,
}

impl WalletStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletStatus::Active),
            2 => Some(WalletStatus::Frozen),
            3 => Some(WalletStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "ACTIVE",
            WalletStatus::Frozen => "FROZEN",
            WalletStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-account balance record
#[derive(Debug, Clone)]
pub struct Wallet {
    pub wallet_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub status: WalletStatus,
    pub daily_withdrawal_limit: Option<Decimal>,
    pub daily_withdrawal_total: Decimal,
    pub last_withdrawal_date: Option<NaiveDate>,
    /// Optimistic conflict detection; bumped on every persisted mutation.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Journal event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletEventType {
    WalletCreated,
    FundsDeposited,
    FundsWithdrawn,
    TransferInitiated,
    TransferCompleted,
    TransferFailed,
    TransferCompensated,
    WalletFrozen,
    WalletUnfrozen,
    WalletClosed,
    DailyLimitSet,
    DailyLimitRemoved,
}

impl WalletEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletEventType::WalletCreated => "WALLET_CREATED",
            WalletEventType::FundsDeposited => "FUNDS_DEPOSITED",
            WalletEventType::FundsWithdrawn => "FUNDS_WITHDRAWN",
            WalletEventType::TransferInitiated => "TRANSFER_INITIATED",
            WalletEventType::TransferCompleted => "TRANSFER_COMPLETED",
            WalletEventType::TransferFailed => "TRANSFER_FAILED",
            WalletEventType::TransferCompensated => "TRANSFER_COMPENSATED",
            WalletEventType::WalletFrozen => "WALLET_FROZEN",
            WalletEventType::WalletUnfrozen => "WALLET_UNFROZEN",
            WalletEventType::WalletClosed => "WALLET_CLOSED",
            WalletEventType::DailyLimitSet => "DAILY_LIMIT_SET",
            WalletEventType::DailyLimitRemoved => "DAILY_LIMIT_REMOVED",
        }
    }

    /// Routing key on the event bus.
    pub fn routing_key(&self) -> String {
        crate::bus::routing_key(self.as_str())
    }
}

impl fmt::Display for WalletEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalletEventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WALLET_CREATED" => Ok(WalletEventType::WalletCreated),
            "FUNDS_DEPOSITED" => Ok(WalletEventType::FundsDeposited),
            "FUNDS_WITHDRAWN" => Ok(WalletEventType::FundsWithdrawn),
            "TRANSFER_INITIATED" => Ok(WalletEventType::TransferInitiated),
            "TRANSFER_COMPLETED" => Ok(WalletEventType::TransferCompleted),
            "TRANSFER_FAILED" => Ok(WalletEventType::TransferFailed),
            "TRANSFER_COMPENSATED" => Ok(WalletEventType::TransferCompensated),
            "WALLET_FROZEN" => Ok(WalletEventType::WalletFrozen),
            "WALLET_UNFROZEN" => Ok(WalletEventType::WalletUnfrozen),
            "WALLET_CLOSED" => Ok(WalletEventType::WalletClosed),
            "DAILY_LIMIT_SET" => Ok(WalletEventType::DailyLimitSet),
            "DAILY_LIMIT_REMOVED" => Ok(WalletEventType::DailyLimitRemoved),
            _ => Err(()),
        }
    }
}

/// Journal row: immutable once written
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletEvent {
    pub id: i64,
    pub wallet_id: String,
    pub event_type: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Journal row to append
#[derive(Debug, Clone)]
pub struct NewWalletEvent {
    pub wallet_id: String,
    pub event_type: WalletEventType,
    pub currency: String,
    pub amount: Option<Decimal>,
    pub metadata: serde_json::Value,
}

//! Wallet engine
//!
//! Single-wallet state changes: deposit, withdraw, admin transitions, limit
//! changes, balance and history reads. Every state-changing operation runs
//! under an exclusive row lock inside a coordinator transaction, honors the
//! request-id idempotency protocol, and journals exactly one event plus one
//! outbox row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use utoipa::ToSchema;

use super::model::{NewWalletEvent, Wallet, WalletEvent, WalletEventType, WalletStatus};
use super::repository::{EventJournal, IdempotencyRepository, StoredResponse, WalletRepository};
use crate::bus::EventMessage;
use crate::cache::{self, CacheStore};
use crate::coordinator::{TxContext, TxCoordinator, TxOptions};
use crate::error::WalletError;
use crate::money;
use crate::outbox::NewOutboxEvent;
use crate::retry::{with_retries, RetryPolicy};

/// Maximum page size for history queries.
const HISTORY_LIMIT_CAP: i64 = 100;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_currency: String,
    pub balance_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            balance_cache_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResult {
    pub wallet_id: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatusResult {
    pub wallet_id: String,
    pub status: String,
}

/// Result of one engine transaction, distinguishing fresh execution from an
/// idempotent replay (replays must not rewrite the balance cache with a
/// stale value).
pub(crate) struct OpOutcome<T> {
    pub value: T,
    pub replayed: bool,
}

impl<T> OpOutcome<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            replayed: false,
        }
    }

    pub fn replayed(value: T) -> Self {
        Self {
            value,
            replayed: true,
        }
    }
}

pub struct WalletEngine {
    coordinator: Arc<TxCoordinator>,
    pool: PgPool,
    cache: Arc<dyn CacheStore>,
    retry: RetryPolicy,
    settings: EngineSettings,
}

impl WalletEngine {
    pub fn new(
        coordinator: Arc<TxCoordinator>,
        pool: PgPool,
        cache: Arc<dyn CacheStore>,
        retry: RetryPolicy,
        settings: EngineSettings,
    ) -> Self {
        Self {
            coordinator,
            pool,
            cache,
            retry,
            settings,
        }
    }

    // === State-changing operations ===

    pub async fn deposit(
        &self,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<BalanceResult, WalletError> {
        let amount = money::validate_amount(amount)?;
        let outcome = self
            .run_idempotent(request_id, || self.deposit_once(wallet_id, amount, request_id))
            .await?;
        if !outcome.replayed {
            self.write_balance_cache(wallet_id, outcome.value.balance).await;
        }
        Ok(outcome.value)
    }

    pub async fn withdraw(
        &self,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<BalanceResult, WalletError> {
        let amount = money::validate_amount(amount)?;
        let outcome = self
            .run_idempotent(request_id, || self.withdraw_once(wallet_id, amount, request_id))
            .await?;
        if !outcome.replayed {
            self.write_balance_cache(wallet_id, outcome.value.balance).await;
        }
        Ok(outcome.value)
    }

    pub async fn freeze(
        &self,
        wallet_id: &str,
        request_id: Option<&str>,
    ) -> Result<WalletStatusResult, WalletError> {
        self.admin_transition(wallet_id, request_id, apply_freeze).await
    }

    pub async fn unfreeze(
        &self,
        wallet_id: &str,
        request_id: Option<&str>,
    ) -> Result<WalletStatusResult, WalletError> {
        self.admin_transition(wallet_id, request_id, apply_unfreeze).await
    }

    pub async fn close(
        &self,
        wallet_id: &str,
        request_id: Option<&str>,
    ) -> Result<WalletStatusResult, WalletError> {
        self.admin_transition(wallet_id, request_id, apply_close).await
    }

    pub async fn set_daily_withdrawal_limit(
        &self,
        wallet_id: &str,
        limit: Option<Decimal>,
        request_id: Option<&str>,
    ) -> Result<WalletStatusResult, WalletError> {
        let limit = money::validate_limit(limit)?;
        let outcome = self
            .run_idempotent(request_id, || self.set_limit_once(wallet_id, limit, request_id))
            .await?;
        if !outcome.replayed {
            self.invalidate_balance_cache(wallet_id).await;
        }
        Ok(outcome.value)
    }

    // === Reads ===

    /// Read-through cached balance. An unknown wallet reads as zero and is
    /// not provisioned.
    pub async fn get_balance(&self, wallet_id: &str) -> Result<BalanceResult, WalletError> {
        let key = cache::balance_key(wallet_id);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(balance) = cached.parse::<Decimal>() {
                    return Ok(BalanceResult {
                        wallet_id: wallet_id.to_string(),
                        balance,
                    });
                }
                tracing::warn!(wallet_id = %wallet_id, "Unparseable cached balance; falling back to store");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache read failed; falling back to store");
            }
        }

        let balance = WalletRepository::get(&self.pool, wallet_id)
            .await?
            .map(|w| w.balance)
            .unwrap_or_else(money::zero);
        self.write_balance_cache(wallet_id, balance).await;

        Ok(BalanceResult {
            wallet_id: wallet_id.to_string(),
            balance,
        })
    }

    /// Event history, newest first. `limit` is capped at 100.
    pub async fn get_history(
        &self,
        wallet_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletEvent>, WalletError> {
        let limit = limit.clamp(1, HISTORY_LIMIT_CAP);
        let offset = offset.max(0);
        Ok(EventJournal::history(&self.pool, wallet_id, limit, offset).await?)
    }

    // === Internals ===

    /// Idempotency protocol shared by every state-changing operation:
    /// replay a stored response when the request id is known; otherwise run
    /// the operation under the shared retry policy, and make failed business
    /// outcomes replayable too.
    async fn run_idempotent<T, F, Fut>(
        &self,
        request_id: Option<&str>,
        op: F,
    ) -> Result<OpOutcome<T>, WalletError>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<OpOutcome<T>, WalletError>>,
    {
        if let Some(rid) = request_id {
            if let Some(stored) = IdempotencyRepository::get(&self.pool, rid).await? {
                return Ok(OpOutcome::replayed(stored.into_result()?));
            }
        }

        match with_retries(&self.retry, op).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Some(rid) = request_id {
                    if e.is_business() {
                        IdempotencyRepository::record_failure(
                            &self.pool,
                            rid,
                            &StoredResponse::error(&e),
                        )
                        .await;
                    }
                }
                Err(e)
            }
        }
    }

    fn tx_options(&self, request_id: Option<&str>) -> TxOptions {
        match request_id {
            Some(rid) => TxOptions::with_lock(cache::request_lock_key(rid)),
            None => TxOptions::default(),
        }
    }

    async fn deposit_once(
        &self,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<BalanceResult>, WalletError> {
        self.coordinator
            .execute(self.tx_options(request_id), |mut ctx| async move {
                let result = self
                    .deposit_in_tx(&mut ctx, wallet_id, amount, request_id)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn deposit_in_tx(
        &self,
        ctx: &mut TxContext,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<BalanceResult>, WalletError> {
        if let Some(replay) = self.replay_in_tx(ctx, request_id).await? {
            return Ok(replay);
        }

        let mut wallet = self.load_or_provision(ctx, wallet_id).await?;
        apply_deposit(&mut wallet, amount);
        WalletRepository::persist(ctx.conn(), &wallet).await?;
        self.record_event(
            ctx,
            &wallet,
            WalletEventType::FundsDeposited,
            Some(amount),
            request_metadata(request_id),
        )
        .await?;

        let result = BalanceResult {
            wallet_id: wallet.wallet_id.clone(),
            balance: wallet.balance,
        };
        self.store_response(ctx, request_id, &result).await?;
        Ok(OpOutcome::fresh(result))
    }

    async fn withdraw_once(
        &self,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<BalanceResult>, WalletError> {
        self.coordinator
            .execute(self.tx_options(request_id), |mut ctx| async move {
                let result = self
                    .withdraw_in_tx(&mut ctx, wallet_id, amount, request_id)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn withdraw_in_tx(
        &self,
        ctx: &mut TxContext,
        wallet_id: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<BalanceResult>, WalletError> {
        if let Some(replay) = self.replay_in_tx(ctx, request_id).await? {
            return Ok(replay);
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(wallet_id.to_string()))?;
        apply_withdrawal(&mut wallet, amount, Utc::now().date_naive())?;
        WalletRepository::persist(ctx.conn(), &wallet).await?;
        self.record_event(
            ctx,
            &wallet,
            WalletEventType::FundsWithdrawn,
            Some(amount),
            request_metadata(request_id),
        )
        .await?;

        let result = BalanceResult {
            wallet_id: wallet.wallet_id.clone(),
            balance: wallet.balance,
        };
        self.store_response(ctx, request_id, &result).await?;
        Ok(OpOutcome::fresh(result))
    }

    async fn admin_transition(
        &self,
        wallet_id: &str,
        request_id: Option<&str>,
        apply: fn(&mut Wallet) -> Result<Option<WalletEventType>, WalletError>,
    ) -> Result<WalletStatusResult, WalletError> {
        let outcome = self
            .run_idempotent(request_id, || self.admin_once(wallet_id, request_id, apply))
            .await?;
        if !outcome.replayed {
            self.invalidate_balance_cache(wallet_id).await;
        }
        Ok(outcome.value)
    }

    async fn admin_once(
        &self,
        wallet_id: &str,
        request_id: Option<&str>,
        apply: fn(&mut Wallet) -> Result<Option<WalletEventType>, WalletError>,
    ) -> Result<OpOutcome<WalletStatusResult>, WalletError> {
        self.coordinator
            .execute(self.tx_options(request_id), |mut ctx| async move {
                let result = self
                    .admin_in_tx(&mut ctx, wallet_id, request_id, apply)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn admin_in_tx(
        &self,
        ctx: &mut TxContext,
        wallet_id: &str,
        request_id: Option<&str>,
        apply: fn(&mut Wallet) -> Result<Option<WalletEventType>, WalletError>,
    ) -> Result<OpOutcome<WalletStatusResult>, WalletError> {
        if let Some(replay) = self.replay_in_tx(ctx, request_id).await? {
            return Ok(replay);
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(wallet_id.to_string()))?;

        if let Some(event_type) = apply(&mut wallet)? {
            WalletRepository::persist(ctx.conn(), &wallet).await?;
            self.record_event(ctx, &wallet, event_type, None, request_metadata(request_id))
                .await?;
        }

        let result = WalletStatusResult {
            wallet_id: wallet.wallet_id.clone(),
            status: wallet.status.as_str().to_string(),
        };
        self.store_response(ctx, request_id, &result).await?;
        Ok(OpOutcome::fresh(result))
    }

    async fn set_limit_once(
        &self,
        wallet_id: &str,
        limit: Option<Decimal>,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<WalletStatusResult>, WalletError> {
        self.coordinator
            .execute(self.tx_options(request_id), |mut ctx| async move {
                let result = self
                    .set_limit_in_tx(&mut ctx, wallet_id, limit, request_id)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn set_limit_in_tx(
        &self,
        ctx: &mut TxContext,
        wallet_id: &str,
        limit: Option<Decimal>,
        request_id: Option<&str>,
    ) -> Result<OpOutcome<WalletStatusResult>, WalletError> {
        if let Some(replay) = self.replay_in_tx(ctx, request_id).await? {
            return Ok(replay);
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(wallet_id.to_string()))?;

        wallet.daily_withdrawal_limit = limit;
        WalletRepository::persist(ctx.conn(), &wallet).await?;

        let (event_type, metadata) = match limit {
            Some(l) => (WalletEventType::DailyLimitSet, json!({ "limit": l })),
            None => (WalletEventType::DailyLimitRemoved, json!({})),
        };
        self.record_event(ctx, &wallet, event_type, None, metadata).await?;

        let result = WalletStatusResult {
            wallet_id: wallet.wallet_id.clone(),
            status: wallet.status.as_str().to_string(),
        };
        self.store_response(ctx, request_id, &result).await?;
        Ok(OpOutcome::fresh(result))
    }

    /// In-transaction idempotency re-check: catches the race where a
    /// concurrent attempt with the same request id committed between the
    /// pool-level lookup and this transaction's snapshot.
    async fn replay_in_tx<T>(
        &self,
        ctx: &mut TxContext,
        request_id: Option<&str>,
    ) -> Result<Option<OpOutcome<T>>, WalletError>
    where
        T: serde::de::DeserializeOwned,
    {
        if let Some(rid) = request_id {
            if let Some(stored) = IdempotencyRepository::get_in_tx(ctx.conn(), rid).await? {
                return Ok(Some(OpOutcome::replayed(stored.into_result()?)));
            }
        }
        Ok(None)
    }

    async fn store_response<T: Serialize>(
        &self,
        ctx: &mut TxContext,
        request_id: Option<&str>,
        result: &T,
    ) -> Result<(), WalletError> {
        if let Some(rid) = request_id {
            IdempotencyRepository::insert(ctx.conn(), rid, &StoredResponse::success(result)?)
                .await?;
        }
        Ok(())
    }

    /// Load a wallet under lock, provisioning it when unknown. A fresh
    /// provision journals WALLET_CREATED within the same transaction.
    async fn load_or_provision(
        &self,
        ctx: &mut TxContext,
        wallet_id: &str,
    ) -> Result<Wallet, WalletError> {
        if let Some(wallet) = WalletRepository::get_for_update(ctx.conn(), wallet_id).await? {
            return Ok(wallet);
        }

        let created = WalletRepository::insert_if_absent(
            ctx.conn(),
            wallet_id,
            &self.settings.default_currency,
        )
        .await?;

        let wallet = WalletRepository::get_for_update(ctx.conn(), wallet_id)
            .await?
            .ok_or_else(|| {
                WalletError::Internal(format!("wallet {} missing after provision", wallet_id))
            })?;

        if created {
            self.record_event(ctx, &wallet, WalletEventType::WalletCreated, None, json!({}))
                .await?;
        }
        Ok(wallet)
    }

    /// Journal the event and stage its outbox row; one of each per
    /// completed state change.
    async fn record_event(
        &self,
        ctx: &mut TxContext,
        wallet: &Wallet,
        event_type: WalletEventType,
        amount: Option<Decimal>,
        metadata: serde_json::Value,
    ) -> Result<(), WalletError> {
        journal_and_stage(
            ctx,
            &wallet.wallet_id,
            &wallet.currency,
            event_type,
            amount,
            metadata,
        )
        .await
    }

    async fn write_balance_cache(&self, wallet_id: &str, balance: Decimal) {
        let key = cache::balance_key(wallet_id);
        if let Err(e) = self
            .cache
            .set(&key, &balance.to_string(), self.settings.balance_cache_ttl)
            .await
        {
            tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache write failed");
        }
    }

    pub(crate) async fn invalidate_balance_cache(&self, wallet_id: &str) {
        let key = cache::balance_key(wallet_id);
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache invalidation failed");
        }
    }
}

fn request_metadata(request_id: Option<&str>) -> serde_json::Value {
    match request_id {
        Some(rid) => json!({ "requestId": rid }),
        None => json!({}),
    }
}

/// Append a journal row and stage the matching outbox row in the caller's
/// transaction. Every completed state change goes through here, which is
/// what keeps the event/outbox pairing invariant.
pub(crate) async fn journal_and_stage(
    ctx: &mut TxContext,
    wallet_id: &str,
    currency: &str,
    event_type: WalletEventType,
    amount: Option<Decimal>,
    metadata: serde_json::Value,
) -> Result<(), WalletError> {
    let event = NewWalletEvent {
        wallet_id: wallet_id.to_string(),
        event_type,
        currency: currency.to_string(),
        amount,
        metadata: metadata.clone(),
    };
    EventJournal::append(ctx.conn(), &event).await?;

    let message = EventMessage {
        event_type: event_type.as_str().to_string(),
        wallet_id: wallet_id.to_string(),
        amount,
        metadata,
        timestamp: Utc::now(),
    };
    ctx.publish_event(NewOutboxEvent::from_message(event_type, &message));
    Ok(())
}

// === Pure state transitions ===
//
// The rule checks are separated from IO so the invariants can be exercised
// without a store.

pub(crate) fn apply_deposit(wallet: &mut Wallet, amount: Decimal) {
    wallet.balance = money::quantize(wallet.balance + amount);
}

pub(crate) fn apply_withdrawal(
    wallet: &mut Wallet,
    amount: Decimal,
    today: NaiveDate,
) -> Result<(), WalletError> {
    if wallet.status != WalletStatus::Active {
        return Err(WalletError::WalletNotActive);
    }

    // First withdrawal of a new UTC day resets the running total.
    if wallet.last_withdrawal_date.map_or(true, |d| d < today) {
        wallet.daily_withdrawal_total = money::zero();
    }

    if let Some(limit) = wallet.daily_withdrawal_limit {
        if wallet.daily_withdrawal_total + amount > limit {
            return Err(WalletError::WithdrawalLimitExceeded);
        }
    }

    if wallet.balance < amount {
        return Err(WalletError::InsufficientFunds);
    }

    wallet.balance = money::quantize(wallet.balance - amount);
    wallet.daily_withdrawal_total = money::quantize(wallet.daily_withdrawal_total + amount);
    wallet.last_withdrawal_date = Some(today);
    Ok(())
}

pub(crate) fn apply_freeze(wallet: &mut Wallet) -> Result<Option<WalletEventType>, WalletError> {
    match wallet.status {
        WalletStatus::Closed => Err(WalletError::WalletClosed),
        WalletStatus::Frozen => Ok(None),
        WalletStatus::Active => {
            wallet.status = WalletStatus::Frozen;
            Ok(Some(WalletEventType::WalletFrozen))
        }
    }
}

pub(crate) fn apply_unfreeze(wallet: &mut Wallet) -> Result<Option<WalletEventType>, WalletError> {
    match wallet.status {
        WalletStatus::Closed => Err(WalletError::WalletClosed),
        WalletStatus::Active => Ok(None),
        WalletStatus::Frozen => {
            wallet.status = WalletStatus::Active;
            Ok(Some(WalletEventType::WalletUnfrozen))
        }
    }
}

pub(crate) fn apply_close(wallet: &mut Wallet) -> Result<Option<WalletEventType>, WalletError> {
    match wallet.status {
        WalletStatus::Closed => Ok(None),
        _ if !wallet.balance.is_zero() => Err(WalletError::NonZeroBalance),
        _ => {
            wallet.status = WalletStatus::Closed;
            Ok(Some(WalletEventType::WalletClosed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn wallet(balance: &str) -> Wallet {
        Wallet {
            wallet_id: "w1".to_string(),
            balance: dec(balance),
            currency: "USD".to_string(),
            status: WalletStatus::Active,
            daily_withdrawal_limit: None,
            daily_withdrawal_total: money::zero(),
            last_withdrawal_date: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_deposit_withdraw_balance_conservation() {
        // balance = sum(deposits) - sum(successful withdrawals), never negative
        let mut w = wallet("0.00");
        let today = day("2026-01-10");
        let mut deposited = money::zero();
        let mut withdrawn = money::zero();

        let ops: [(&str, &str); 7] = [
            ("deposit", "100.00"),
            ("withdraw", "30.00"),
            ("withdraw", "80.00"), // fails: insufficient
            ("deposit", "9.99"),
            ("withdraw", "79.99"),
            ("withdraw", "0.01"), // fails
            ("deposit", "0.01"),
        ];

        for (op, amt) in ops {
            let amount = dec(amt);
            match op {
                "deposit" => {
                    apply_deposit(&mut w, amount);
                    deposited += amount;
                }
                _ => {
                    if apply_withdrawal(&mut w, amount, today).is_ok() {
                        withdrawn += amount;
                    }
                }
            }
            assert!(w.balance >= Decimal::ZERO);
            assert_eq!(w.balance, deposited - withdrawn);
        }
    }

    #[test]
    fn test_withdrawal_requires_active() {
        let mut w = wallet("100.00");
        w.status = WalletStatus::Frozen;
        assert!(matches!(
            apply_withdrawal(&mut w, dec("10"), day("2026-01-10")),
            Err(WalletError::WalletNotActive)
        ));
        assert_eq!(w.balance, dec("100.00"));
    }

    #[test]
    fn test_withdrawal_insufficient_funds() {
        let mut w = wallet("50.00");
        assert!(matches!(
            apply_withdrawal(&mut w, dec("50.01"), day("2026-01-10")),
            Err(WalletError::InsufficientFunds)
        ));
        assert!(apply_withdrawal(&mut w, dec("50.00"), day("2026-01-10")).is_ok());
        assert_eq!(w.balance, dec("0.00"));
    }

    #[test]
    fn test_daily_limit_enforced_within_day() {
        let mut w = wallet("1000.00");
        w.daily_withdrawal_limit = Some(dec("100.00"));
        let today = day("2026-01-10");

        assert!(apply_withdrawal(&mut w, dec("60.00"), today).is_ok());
        assert!(apply_withdrawal(&mut w, dec("40.00"), today).is_ok());
        assert!(matches!(
            apply_withdrawal(&mut w, dec("0.01"), today),
            Err(WalletError::WithdrawalLimitExceeded)
        ));
        assert_eq!(w.daily_withdrawal_total, dec("100.00"));
    }

    #[test]
    fn test_daily_limit_resets_on_new_day() {
        let mut w = wallet("1000.00");
        w.daily_withdrawal_limit = Some(dec("100.00"));

        assert!(apply_withdrawal(&mut w, dec("100.00"), day("2026-01-10")).is_ok());
        assert!(matches!(
            apply_withdrawal(&mut w, dec("1.00"), day("2026-01-10")),
            Err(WalletError::WithdrawalLimitExceeded)
        ));

        // next calendar day: the total resets before the limit check
        assert!(apply_withdrawal(&mut w, dec("100.00"), day("2026-01-11")).is_ok());
        assert_eq!(w.daily_withdrawal_total, dec("100.00"));
        assert_eq!(w.last_withdrawal_date, Some(day("2026-01-11")));
    }

    #[test]
    fn test_limit_check_precedes_balance_check() {
        let mut w = wallet("10.00");
        w.daily_withdrawal_limit = Some(dec("5.00"));
        // exceeds both the limit and the balance: limit error wins
        assert!(matches!(
            apply_withdrawal(&mut w, dec("20.00"), day("2026-01-10")),
            Err(WalletError::WithdrawalLimitExceeded)
        ));
    }

    #[test]
    fn test_freeze_transitions() {
        let mut w = wallet("0.00");
        assert_eq!(
            apply_freeze(&mut w).unwrap(),
            Some(WalletEventType::WalletFrozen)
        );
        assert_eq!(w.status, WalletStatus::Frozen);

        // freezing a frozen wallet is a no-op
        assert_eq!(apply_freeze(&mut w).unwrap(), None);

        w.status = WalletStatus::Closed;
        assert!(matches!(apply_freeze(&mut w), Err(WalletError::WalletClosed)));
    }

    #[test]
    fn test_unfreeze_transitions() {
        let mut w = wallet("0.00");
        w.status = WalletStatus::Frozen;
        assert_eq!(
            apply_unfreeze(&mut w).unwrap(),
            Some(WalletEventType::WalletUnfrozen)
        );
        assert_eq!(w.status, WalletStatus::Active);

        // unfreeze from ACTIVE is a no-op
        assert_eq!(apply_unfreeze(&mut w).unwrap(), None);
    }

    #[test]
    fn test_close_requires_zero_balance() {
        let mut w = wallet("0.01");
        assert!(matches!(apply_close(&mut w), Err(WalletError::NonZeroBalance)));

        w.balance = money::zero();
        assert_eq!(
            apply_close(&mut w).unwrap(),
            Some(WalletEventType::WalletClosed)
        );
        assert_eq!(w.status, WalletStatus::Closed);

        // closing a closed wallet is a no-op
        assert_eq!(apply_close(&mut w).unwrap(), None);
    }
}

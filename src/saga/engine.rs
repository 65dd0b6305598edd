//! Transfer saga engine
//!
//! Orchestrates two-leg transfers through the persisted state machine.
//! Each leg runs in its own coordinator transaction under the shared retry
//! policy; the saga never holds both wallet locks at once. A failure after
//! the debit triggers compensation; a compensation failure strands the saga
//! in DEBITED for the recovery worker.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use super::model::{SagaLeg, SagaRepository, TransferSaga};
use super::state::SagaState;
use crate::bus::EventMessage;
use crate::cache::{self, CacheStore};
use crate::coordinator::{TxContext, TxCoordinator, TxOptions};
use crate::error::WalletError;
use crate::money;
use crate::outbox::NewOutboxEvent;
use crate::retry::{with_retries, RetryPolicy};
use crate::wallet::engine::{apply_deposit, apply_withdrawal, journal_and_stage};
use crate::wallet::model::{WalletEventType, WalletStatus};
use crate::wallet::repository::{IdempotencyRepository, StoredResponse, WalletRepository};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub saga_id: Uuid,
    pub state: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub amount: Decimal,
}

fn result_of(saga: &TransferSaga, state: SagaState) -> TransferResult {
    TransferResult {
        saga_id: saga.id,
        state: state.as_str().to_string(),
        from_wallet_id: saga.from_wallet_id.clone(),
        to_wallet_id: saga.to_wallet_id.clone(),
        amount: saga.amount,
    }
}

pub struct TransferSagaEngine {
    coordinator: Arc<TxCoordinator>,
    pool: PgPool,
    cache: Arc<dyn CacheStore>,
    retry: RetryPolicy,
}

impl TransferSagaEngine {
    pub fn new(
        coordinator: Arc<TxCoordinator>,
        pool: PgPool,
        cache: Arc<dyn CacheStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            coordinator,
            pool,
            cache,
            retry,
        }
    }

    /// Execute a transfer between two wallets.
    ///
    /// On success the saga is COMPLETED. On failure the caller sees the
    /// error and the saga is COMPENSATED or FAILED in the store (or left
    /// DEBITED when compensation itself failed, for recovery to finish).
    pub async fn execute_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        match self.execute_inner(from, to, amount, request_id).await {
            Ok(result) => Ok(result),
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

    async fn execute_inner(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        if from == to {
            return Err(WalletError::SameWallet);
        }
        let amount = money::validate_amount(amount)?;

        if let Some(rid) = request_id {
            if let Some(stored) = IdempotencyRepository::get(&self.pool, rid).await? {
                return stored.into_result();
            }
            // A saga without a stored response means a previous attempt was
            // interrupted mid-flight: resume it instead of starting another.
            if let Some(saga) = SagaRepository::get_by_request_id(&self.pool, rid).await? {
                tracing::info!(saga_id = %saga.id, request_id = %rid, "Resuming interrupted transfer");
                return self.drive(saga, request_id).await;
            }
        }

        let saga = with_retries(&self.retry, || {
            self.create_once(from, to, amount, request_id)
        })
        .await?;

        self.drive(saga, request_id).await
    }

    /// Advance a saga from its current state to a terminal outcome.
    async fn drive(
        &self,
        saga: TransferSaga,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        match saga.state {
            SagaState::Pending => self.run_from_pending(saga, request_id).await,
            SagaState::Debited => self.run_from_debited(saga, request_id).await,
            SagaState::Completed => Ok(result_of(&saga, SagaState::Completed)),
            SagaState::Compensated | SagaState::Failed => Err(stored_failure(&saga)),
        }
    }

    async fn run_from_pending(
        &self,
        saga: TransferSaga,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        match with_retries(&self.retry, || self.debit_once(&saga)).await {
            Ok(()) => self.run_from_debited(saga, request_id).await,
            Err(e) if e.is_business() => {
                self.fail_pending(&saga, &e).await?;
                self.invalidate_caches(&saga).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_from_debited(
        &self,
        saga: TransferSaga,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        match with_retries(&self.retry, || self.credit_once(&saga)).await {
            Ok(()) => {
                let result =
                    with_retries(&self.retry, || self.complete_once(&saga, request_id)).await?;
                self.invalidate_caches(&saga).await;
                Ok(result)
            }
            Err(e) => {
                let reason = e.to_string();
                if let Err(comp_err) = self.compensate(&saga, &reason, e.kind()).await {
                    tracing::error!(
                        saga_id = %saga.id,
                        error = %comp_err,
                        "Compensation failed; saga left DEBITED for recovery"
                    );
                }
                self.invalidate_caches(&saga).await;
                Err(e)
            }
        }
    }

    /// Re-drive a saga stranded in DEBITED. Called by the recovery worker.
    pub async fn recover_saga(&self, id: Uuid) -> Result<(), WalletError> {
        let saga = SagaRepository::get(&self.pool, id)
            .await?
            .ok_or(WalletError::SagaNotFound(id))?;

        if saga.state != SagaState::Debited {
            tracing::debug!(saga_id = %id, state = %saga.state, "Saga no longer DEBITED; skipping");
            return Ok(());
        }

        match with_retries(&self.retry, || self.credit_once(&saga)).await {
            Ok(()) => {
                with_retries(&self.retry, || self.complete_once(&saga, None)).await?;
                self.invalidate_caches(&saga).await;
                tracing::info!(saga_id = %id, "Recovered saga to COMPLETED");
                Ok(())
            }
            Err(e) => {
                let reason = format!("Recovery failed: {}", e);
                self.compensate(&saga, &reason, e.kind()).await?;
                self.invalidate_caches(&saga).await;
                tracing::warn!(saga_id = %id, reason = %reason, "Recovered saga by compensation");
                Ok(())
            }
        }
    }

    // === Individual transactions ===

    /// Create the saga in PENDING and journal TRANSFER_INITIATED. Reads
    /// both wallets without locks; provisioning races are absorbed by the
    /// upsert and the retry policy.
    async fn create_once(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<TransferSaga, WalletError> {
        let opts = match request_id {
            Some(rid) => TxOptions::with_lock(cache::request_lock_key(rid)),
            None => TxOptions::default(),
        };
        self.coordinator
            .execute(opts, |mut ctx| async move {
                let result = self
                    .create_in_tx(&mut ctx, from, to, amount, request_id)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn create_in_tx(
        &self,
        ctx: &mut TxContext,
        from: &str,
        to: &str,
        amount: Decimal,
        request_id: Option<&str>,
    ) -> Result<TransferSaga, WalletError> {
        // A concurrent attempt with the same request id may have inserted
        // the saga between the pool-level lookup and this transaction;
        // reuse it instead of re-colliding on the unique request_id.
        if let Some(rid) = request_id {
            if let Some(existing) =
                SagaRepository::get_by_request_id_in_tx(ctx.conn(), rid).await?
            {
                return Ok(existing);
            }
        }

        let source = WalletRepository::get_in_tx(ctx.conn(), from)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(from.to_string()))?;

        // Destination inherits the source currency when it has to be
        // provisioned.
        let dest = WalletRepository::get_in_tx(ctx.conn(), to).await?;
        match &dest {
            Some(d) if d.currency != source.currency => {
                return Err(WalletError::CurrencyMismatch {
                    from: source.currency.clone(),
                    to: d.currency.clone(),
                });
            }
            Some(_) => {}
            None => {
                let created =
                    WalletRepository::insert_if_absent(ctx.conn(), to, &source.currency).await?;
                if created {
                    journal_and_stage(
                        ctx,
                        to,
                        &source.currency,
                        WalletEventType::WalletCreated,
                        None,
                        json!({}),
                    )
                    .await?;
                }
            }
        }

        let saga = TransferSaga {
            id: Uuid::new_v4(),
            request_id: request_id.map(str::to_string),
            from_wallet_id: from.to_string(),
            to_wallet_id: to.to_string(),
            amount,
            currency: source.currency.clone(),
            state: SagaState::Pending,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        SagaRepository::insert(ctx.conn(), &saga).await?;

        journal_and_stage(
            ctx,
            from,
            &source.currency,
            WalletEventType::TransferInitiated,
            Some(amount),
            json!({ "sagaId": saga.id, "toWalletId": to }),
        )
        .await?;

        Ok(saga)
    }

    /// Debit leg: lock the source, apply withdraw semantics, PENDING -> DEBITED.
    async fn debit_once(&self, saga: &TransferSaga) -> Result<(), WalletError> {
        self.coordinator
            .execute(TxOptions::default(), |mut ctx| async move {
                let result = self.debit_in_tx(&mut ctx, saga).await;
                (ctx, result)
            })
            .await
    }

    async fn debit_in_tx(
        &self,
        ctx: &mut TxContext,
        saga: &TransferSaga,
    ) -> Result<(), WalletError> {
        let current = SagaRepository::get_in_tx(ctx.conn(), saga.id)
            .await?
            .ok_or(WalletError::SagaNotFound(saga.id))?;
        if current.state != SagaState::Pending {
            // Another worker already advanced it.
            return Ok(());
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), &saga.from_wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(saga.from_wallet_id.clone()))?;

        apply_withdrawal(&mut wallet, saga.amount, Utc::now().date_naive())?;
        WalletRepository::persist(ctx.conn(), &wallet).await?;

        let applied = SagaRepository::transition(
            ctx.conn(),
            saga.id,
            SagaState::Pending,
            SagaState::Debited,
            None,
        )
        .await?;
        if !applied {
            // Lost the CAS despite holding the wallet lock: a concurrent
            // executor debited first. Abort this transaction so the debit
            // is not applied twice.
            return Err(WalletError::ConcurrentRequest);
        }

        journal_and_stage(
            ctx,
            &saga.from_wallet_id,
            &saga.currency,
            WalletEventType::FundsWithdrawn,
            Some(saga.amount),
            json!({ "sagaId": saga.id, "transferTo": saga.to_wallet_id }),
        )
        .await?;

        Ok(())
    }

    /// Credit leg: lock the destination, apply the credit exactly once.
    ///
    /// The leg marker in `saga_legs` is inserted in the same transaction as
    /// the balance change, so a credit that committed but lost its later
    /// status update is detected here instead of being re-applied.
    async fn credit_once(&self, saga: &TransferSaga) -> Result<(), WalletError> {
        self.coordinator
            .execute(TxOptions::default(), |mut ctx| async move {
                let result = self.credit_in_tx(&mut ctx, saga).await;
                (ctx, result)
            })
            .await
    }

    async fn credit_in_tx(
        &self,
        ctx: &mut TxContext,
        saga: &TransferSaga,
    ) -> Result<(), WalletError> {
        let current = SagaRepository::get_in_tx(ctx.conn(), saga.id)
            .await?
            .ok_or(WalletError::SagaNotFound(saga.id))?;
        if current.state != SagaState::Debited {
            return Ok(());
        }

        if !SagaRepository::record_leg(ctx.conn(), saga.id, SagaLeg::Credit).await? {
            // Credit already applied by a previous attempt.
            return Ok(());
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), &saga.to_wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(saga.to_wallet_id.clone()))?;

        if wallet.status != WalletStatus::Active {
            return Err(WalletError::WalletNotActive);
        }

        apply_deposit(&mut wallet, saga.amount);
        WalletRepository::persist(ctx.conn(), &wallet).await?;

        journal_and_stage(
            ctx,
            &saga.to_wallet_id,
            &saga.currency,
            WalletEventType::FundsDeposited,
            Some(saga.amount),
            json!({ "sagaId": saga.id, "transferFrom": saga.from_wallet_id }),
        )
        .await?;

        Ok(())
    }

    /// DEBITED -> COMPLETED, journaling TRANSFER_COMPLETED and storing the
    /// idempotent response.
    async fn complete_once(
        &self,
        saga: &TransferSaga,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        self.coordinator
            .execute(TxOptions::default(), |mut ctx| async move {
                let result = self.complete_in_tx(&mut ctx, saga, request_id).await;
                (ctx, result)
            })
            .await
    }

    async fn complete_in_tx(
        &self,
        ctx: &mut TxContext,
        saga: &TransferSaga,
        request_id: Option<&str>,
    ) -> Result<TransferResult, WalletError> {
        let applied = SagaRepository::transition(
            ctx.conn(),
            saga.id,
            SagaState::Debited,
            SagaState::Completed,
            None,
        )
        .await?;

        if applied {
            journal_and_stage(
                ctx,
                &saga.from_wallet_id,
                &saga.currency,
                WalletEventType::TransferCompleted,
                Some(saga.amount),
                json!({ "sagaId": saga.id, "toWalletId": saga.to_wallet_id }),
            )
            .await?;
        } else {
            let current = SagaRepository::get_in_tx(ctx.conn(), saga.id)
                .await?
                .ok_or(WalletError::SagaNotFound(saga.id))?;
            if current.state != SagaState::Completed {
                // Compensation or failure won the race.
                return Err(stored_failure(&current));
            }
        }

        let result = result_of(saga, SagaState::Completed);
        if let Some(rid) = request_id {
            IdempotencyRepository::insert_if_absent(
                ctx.conn(),
                rid,
                &StoredResponse::success(&result)?,
            )
            .await?;
        }
        Ok(result)
    }

    /// PENDING -> FAILED after a debit-leg business failure.
    async fn fail_pending(&self, saga: &TransferSaga, cause: &WalletError) -> Result<(), WalletError> {
        let reason = cause.to_string();
        let error_type = cause.kind();
        with_retries(&self.retry, || {
            self.fail_pending_once(saga, &reason, error_type)
        })
        .await
    }

    async fn fail_pending_once(
        &self,
        saga: &TransferSaga,
        reason: &str,
        error_type: &str,
    ) -> Result<(), WalletError> {
        self.coordinator
            .execute(TxOptions::default(), |mut ctx| async move {
                let result = self
                    .fail_pending_in_tx(&mut ctx, saga, reason, error_type)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn fail_pending_in_tx(
        &self,
        ctx: &mut TxContext,
        saga: &TransferSaga,
        reason: &str,
        error_type: &str,
    ) -> Result<(), WalletError> {
        let meta = json!({ "reason": reason, "errorType": error_type });
        let applied = SagaRepository::transition(
            ctx.conn(),
            saga.id,
            SagaState::Pending,
            SagaState::Failed,
            Some(&meta),
        )
        .await?;
        if applied {
            journal_and_stage(
                ctx,
                &saga.from_wallet_id,
                &saga.currency,
                WalletEventType::TransferFailed,
                Some(saga.amount),
                json!({ "sagaId": saga.id, "reason": reason }),
            )
            .await?;
        }
        Ok(())
    }

    /// Refund the source and unwind the saga after a failed credit leg.
    ///
    /// The refund is privileged: it applies even when the source is FROZEN.
    /// A CLOSED source cannot be refunded; the saga terminates FAILED.
    async fn compensate(
        &self,
        saga: &TransferSaga,
        reason: &str,
        error_type: &str,
    ) -> Result<(), WalletError> {
        with_retries(&self.retry, || {
            self.compensate_once(saga, reason, error_type)
        })
        .await
    }

    async fn compensate_once(
        &self,
        saga: &TransferSaga,
        reason: &str,
        error_type: &str,
    ) -> Result<(), WalletError> {
        self.coordinator
            .execute(TxOptions::default(), |mut ctx| async move {
                let result = self
                    .compensate_in_tx(&mut ctx, saga, reason, error_type)
                    .await;
                (ctx, result)
            })
            .await
    }

    async fn compensate_in_tx(
        &self,
        ctx: &mut TxContext,
        saga: &TransferSaga,
        reason: &str,
        error_type: &str,
    ) -> Result<(), WalletError> {
        let current = SagaRepository::get_in_tx(ctx.conn(), saga.id)
            .await?
            .ok_or(WalletError::SagaNotFound(saga.id))?;
        if current.state != SagaState::Debited {
            return Ok(());
        }

        let mut wallet = WalletRepository::get_for_update(ctx.conn(), &saga.from_wallet_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(saga.from_wallet_id.clone()))?;

        if wallet.status == WalletStatus::Closed {
            let meta = json!({
                "reason": reason,
                "errorType": error_type,
                "compensation": "skipped: source wallet closed",
            });
            SagaRepository::transition(
                ctx.conn(),
                saga.id,
                SagaState::Debited,
                SagaState::Compensated,
                Some(&meta),
            )
            .await?;
            SagaRepository::transition(
                ctx.conn(),
                saga.id,
                SagaState::Compensated,
                SagaState::Failed,
                None,
            )
            .await?;
            stage_transfer_failed(ctx, saga, reason);
            return Ok(());
        }

        if SagaRepository::record_leg(ctx.conn(), saga.id, SagaLeg::Compensate).await? {
            apply_deposit(&mut wallet, saga.amount);
            WalletRepository::persist(ctx.conn(), &wallet).await?;
            journal_and_stage(
                ctx,
                &saga.from_wallet_id,
                &saga.currency,
                WalletEventType::TransferCompensated,
                Some(saga.amount),
                json!({ "sagaId": saga.id, "reason": reason }),
            )
            .await?;
        }

        let meta = json!({ "reason": reason, "errorType": error_type });
        SagaRepository::transition(
            ctx.conn(),
            saga.id,
            SagaState::Debited,
            SagaState::Compensated,
            Some(&meta),
        )
        .await?;

        stage_transfer_failed(ctx, saga, reason);
        Ok(())
    }

    async fn invalidate_caches(&self, saga: &TransferSaga) {
        for wallet_id in [&saga.from_wallet_id, &saga.to_wallet_id] {
            let key = cache::balance_key(wallet_id);
            if let Err(e) = self.cache.delete(&key).await {
                tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache invalidation failed");
            }
        }
    }
}

/// Stage the TRANSFER_FAILED notification for downstream consumers. This is
/// an outbox-only emission; the journal records the compensation itself.
fn stage_transfer_failed(ctx: &mut TxContext, saga: &TransferSaga, reason: &str) {
    let message = EventMessage {
        event_type: WalletEventType::TransferFailed.as_str().to_string(),
        wallet_id: saga.from_wallet_id.clone(),
        amount: Some(saga.amount),
        metadata: json!({ "sagaId": saga.id, "reason": reason }),
        timestamp: Utc::now(),
    };
    ctx.publish_event(NewOutboxEvent::from_message(
        WalletEventType::TransferFailed,
        &message,
    ));
}

/// Error surfaced when a saga is found already unwound.
fn stored_failure(saga: &TransferSaga) -> WalletError {
    let kind = saga
        .metadata
        .get("errorType")
        .and_then(|v| v.as_str())
        .unwrap_or("Validation");
    let reason = saga
        .metadata
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("transfer failed");
    WalletError::from_stored(kind, reason)
}

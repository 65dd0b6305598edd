//! walletd - financial wallet service
//!
//! Per-account balances with an append-only event journal, exactly-once
//! application of client requests, saga-coordinated cross-wallet transfers,
//! and at-least-once downstream event delivery through a transactional
//! outbox.
//!
//! # Modules
//!
//! - [`config`] - YAML configuration with env overrides
//! - [`db`] - PostgreSQL pool and migrations
//! - [`error`] - Shared error taxonomy and retry classification
//! - [`money`] - Fixed-point (scale 2) money handling
//! - [`cache`] - Cache/lock service port (Redis or in-process)
//! - [`bus`] - Event bus port (AMQP or in-process)
//! - [`coordinator`] - Store transaction + outbox buffer + request lock
//! - [`retry`] - Shared backoff policy
//! - [`wallet`] - Single-wallet engine with idempotency and row locking
//! - [`saga`] - Two-leg transfer saga with compensation and recovery
//! - [`outbox`] - Transactional outbox and relay worker
//! - [`fraud`] - At-least-once fraud detection consumer
//! - [`gateway`] - Axum HTTP shell

pub mod bus;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fraud;
pub mod gateway;
pub mod logging;
pub mod money;
pub mod outbox;
pub mod retry;
pub mod saga;
pub mod wallet;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use coordinator::TxCoordinator;
pub use db::Database;
pub use error::WalletError;
pub use saga::{SagaState, TransferSagaEngine};
pub use wallet::{WalletEngine, WalletEventType, WalletStatus};

//! Wallet engine: models, data access, single-wallet operations

pub mod engine;
pub mod model;
pub mod repository;

pub use engine::{BalanceResult, EngineSettings, WalletEngine, WalletStatusResult};
pub use model::{Wallet, WalletEvent, WalletEventType, WalletStatus};

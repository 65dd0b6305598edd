use std::sync::Arc;

use crate::db::Database;
use crate::saga::TransferSagaEngine;
use crate::wallet::WalletEngine;

/// Shared gateway state
pub struct AppState {
    pub engine: Arc<WalletEngine>,
    pub saga: Arc<TransferSagaEngine>,
    pub db: Arc<Database>,
}

impl AppState {
    pub fn new(
        engine: Arc<WalletEngine>,
        saga: Arc<TransferSagaEngine>,
        db: Arc<Database>,
    ) -> Self {
        Self { engine, saga, db }
    }
}

//! Transfer saga: persisted state machine, two-leg execution, compensation,
//! and crash recovery

pub mod engine;
pub mod model;
pub mod recovery;
pub mod state;

pub use engine::{TransferResult, TransferSagaEngine};
pub use model::{SagaLeg, SagaRepository, TransferSaga};
pub use recovery::{RecoveryConfig, SagaRecoveryWorker};
pub use state::SagaState;

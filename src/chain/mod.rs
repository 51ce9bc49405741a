pub mod evm;

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::batch::models::Batch;
use crate::error::AppResult;

/// Result of waiting for a transaction confirmation.
///
/// Pending is not failure: the transaction may still confirm later, so
/// the caller must end its tick without resubmitting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed,
    Failed,
    Pending,
}

/// External ledger operations the settlement executor depends on.
///
/// Submissions return a transaction id immediately; confirmation is a
/// separate bounded wait. All amounts are U256 - nothing on this
/// boundary may truncate. Errors are transient from the executor's
/// perspective and never advance batch state.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address the executor signs with.
    fn executor_identity(&self) -> String;

    /// Settlement contract the batch funds are transferred into.
    fn settlement_address(&self) -> String;

    async fn balance_of(&self, owner: &str) -> AppResult<U256>;

    /// Current sequence number of the executor identity. Read once per
    /// settlement and reserved for both transactions before either is
    /// sent.
    async fn account_nonce(&self) -> AppResult<u64>;

    /// Token transfer with an explicitly assigned nonce.
    async fn transfer(&self, to: &str, amount: U256, nonce: u64) -> AppResult<String>;

    /// Batch-settlement call; items and content hash must match what
    /// was hashed at aggregation time or the contract rejects the call.
    async fn submit_settlement(&self, batch: &Batch, nonce: u64) -> AppResult<String>;

    async fn await_confirmation(&self, tx_id: &str) -> AppResult<TxOutcome>;
}

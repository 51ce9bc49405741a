pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::batch::models::{Batch, NewPayment, Payment};
use crate::error::AppResult;

/// Outcome of an idempotent payment submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
}

/// Outcome of an idempotent batch completion. The first recorded
/// settlement tx id wins; later calls observe AlreadyDone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    AlreadyDone,
    NotFound,
}

/// Durable storage for payments and batches.
///
/// Every status transition is a single conditional operation, never a
/// read-then-write pair, so the store stays correct if more than one
/// executor instance ever runs against it.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Insert a READY payment; duplicate ids are silently ignored.
    async fn insert_payment(&self, payment: NewPayment) -> AppResult<SubmitOutcome>;

    /// All READY payments, oldest first.
    async fn ready_payments(&self) -> AppResult<Vec<Payment>>;

    /// Insert a batch and flip exactly the consumed payments to
    /// BATCHED as one atomic unit. Fails without side effects if any
    /// of the payments was concurrently consumed.
    async fn create_batch(&self, batch: &Batch, payment_ids: &[String]) -> AppResult<()>;

    /// Claim the oldest READY batch (READY -> PROCESSING). At most one
    /// concurrent caller wins; the rest see None, which means "no work
    /// available", not an error.
    async fn claim_next_batch(&self) -> AppResult<Option<Batch>>;

    /// Oldest PROCESSING batch, if any - the resume path after a crash
    /// or a confirmation timeout.
    async fn in_flight_batch(&self) -> AppResult<Option<Batch>>;

    async fn get_batch(&self, batch_id: &str) -> AppResult<Option<Batch>>;

    /// Persist the reserved ledger nonces for the two settlement
    /// transactions. Written before either transaction is sent.
    async fn record_checkpoint(
        &self,
        batch_id: &str,
        transfer_nonce: u64,
        submit_nonce: u64,
    ) -> AppResult<()>;

    /// Drop the checkpoint and transfer tx id after a reverted
    /// transfer so the next tick retries from scratch.
    async fn clear_checkpoint(&self, batch_id: &str) -> AppResult<()>;

    async fn record_transfer_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()>;

    async fn record_settlement_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()>;

    /// PROCESSING (or HELD, for operator completion) -> DONE with the
    /// settlement tx id. Idempotent.
    async fn complete_batch(&self, batch_id: &str, settlement_tx_id: &str)
        -> AppResult<CompleteOutcome>;

    /// Park a batch for manual review; automatic settlement stops.
    async fn hold_batch(&self, batch_id: &str, reason: &str) -> AppResult<()>;
}

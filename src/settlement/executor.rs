use std::sync::Arc;

use tracing::{error, info, warn};

use crate::batch::aggregator::BatchAggregator;
use crate::batch::models::{Batch, Payment};
use crate::chain::{LedgerClient, TxOutcome};
use crate::error::AppResult;
use crate::store::PayoutStore;

/// What one executor tick did. Primarily for logs and tests; every
/// variant except Settled leaves the batch to a later tick or an
/// operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No ledger client configured; the executor is disabled.
    Disabled,
    /// Another tick is still in flight.
    Busy,
    /// No pending batch and no READY payments.
    Idle,
    /// Executor balance below the batch total; retried next tick with
    /// no state change.
    InsufficientBalance { batch_id: String },
    /// A transaction is submitted but not yet confirmed.
    AwaitingConfirmation { batch_id: String },
    /// The transfer reverted; checkpoint cleared, retried from scratch.
    TransferFailed { batch_id: String },
    /// Parked for manual review.
    Held { batch_id: String },
    Settled {
        batch_id: String,
        settlement_tx_id: String,
    },
}

/// Drives one batch at a time through the two-transaction settlement:
/// token transfer into the payout contract, then the submitBatch call.
///
/// Crash tolerance rests on the durable checkpoint: both nonces are
/// persisted before the first send, and each tx id immediately after
/// its submission. On resume the checkpoint - not a fresh read of "is
/// there work" - decides what is safe to (re)send. Resending with a
/// reserved nonce can never double-transfer: the chain accepts at most
/// one transaction per nonce.
pub struct SettlementExecutor {
    store: Arc<dyn PayoutStore>,
    ledger: Option<Arc<dyn LedgerClient>>,
    aggregator: Arc<BatchAggregator>,
    guard: tokio::sync::Mutex<()>,
}

impl SettlementExecutor {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        ledger: Option<Arc<dyn LedgerClient>>,
        aggregator: Arc<BatchAggregator>,
    ) -> Self {
        Self {
            store,
            ledger,
            aggregator,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn tick(&self) -> AppResult<TickOutcome> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(TickOutcome::Disabled);
        };

        // Mutual exclusion across ticks: a settlement round-trip that
        // outlives the scheduling interval must not overlap the next
        // invocation.
        let Ok(_running) = self.guard.try_lock() else {
            warn!("settlement tick still in flight, skipping");
            return Ok(TickOutcome::Busy);
        };

        let Some(batch) =
            acquire_pending_batch(self.store.as_ref(), self.aggregator.as_ref()).await?
        else {
            return Ok(TickOutcome::Idle);
        };

        self.settle(ledger.as_ref(), batch).await
    }

    async fn settle(&self, ledger: &dyn LedgerClient, mut batch: Batch) -> AppResult<TickOutcome> {
        if let Err(violation) = batch.verify_integrity() {
            error!(
                batch_id = %batch.batch_id,
                %violation,
                "batch failed integrity check, holding for manual review"
            );
            self.store
                .hold_batch(&batch.batch_id, &violation.to_string())
                .await?;
            return Ok(TickOutcome::Held {
                batch_id: batch.batch_id,
            });
        }

        // Resume: the settlement call is already out, only its
        // confirmation is owed.
        if let Some(tx_id) = batch.settlement_tx_id.clone() {
            return self.finish_settlement(ledger, &batch, &tx_id).await;
        }

        let (transfer_nonce, submit_nonce) = match (batch.transfer_nonce, batch.submit_nonce) {
            (Some(t), Some(s)) => (t, s),
            _ => {
                let balance = ledger.balance_of(&ledger.executor_identity()).await?;
                if balance < batch.total_amount {
                    warn!(
                        batch_id = %batch.batch_id,
                        %balance,
                        total = %batch.total_amount,
                        "insufficient token balance, retrying next tick"
                    );
                    return Ok(TickOutcome::InsufficientBalance {
                        batch_id: batch.batch_id,
                    });
                }

                // Reserve both sequence numbers and persist them before
                // anything is sent.
                let nonce = ledger.account_nonce().await?;
                self.store
                    .record_checkpoint(&batch.batch_id, nonce, nonce + 1)
                    .await?;
                batch.transfer_nonce = Some(nonce);
                batch.submit_nonce = Some(nonce + 1);
                (nonce, nonce + 1)
            }
        };

        if let Some(tx_id) = batch.transfer_tx_id.clone() {
            match ledger.await_confirmation(&tx_id).await? {
                TxOutcome::Confirmed => {}
                TxOutcome::Pending => {
                    info!(batch_id = %batch.batch_id, tx = %tx_id, "transfer still pending");
                    return Ok(TickOutcome::AwaitingConfirmation {
                        batch_id: batch.batch_id,
                    });
                }
                TxOutcome::Failed => return self.transfer_reverted(&batch, &tx_id).await,
            }
        } else {
            let chain_nonce = ledger.account_nonce().await?;
            if chain_nonce > transfer_nonce {
                // A transaction with the reserved nonce already mined:
                // the transfer went out before the crash. Its id was
                // lost, but nothing downstream needs it.
                info!(
                    batch_id = %batch.batch_id,
                    transfer_nonce,
                    "transfer already mined, resuming at submission"
                );
            } else {
                let tx_id = ledger
                    .transfer(&ledger.settlement_address(), batch.total_amount, transfer_nonce)
                    .await?;
                self.store.record_transfer_tx(&batch.batch_id, &tx_id).await?;
                info!(
                    batch_id = %batch.batch_id,
                    tx = %tx_id,
                    total = %batch.total_amount,
                    "transferred batch total to payout contract"
                );

                match ledger.await_confirmation(&tx_id).await? {
                    TxOutcome::Confirmed => {}
                    TxOutcome::Pending => {
                        return Ok(TickOutcome::AwaitingConfirmation {
                            batch_id: batch.batch_id,
                        })
                    }
                    TxOutcome::Failed => return self.transfer_reverted(&batch, &tx_id).await,
                }
            }
        }

        // Submission phase. If the chain already moved past the
        // reserved submit nonce, the settlement call mined but its id
        // was never persisted - that needs an operator, not a resend.
        let chain_nonce = ledger.account_nonce().await?;
        if chain_nonce > submit_nonce {
            error!(
                batch_id = %batch.batch_id,
                submit_nonce,
                "batch appears settled on chain but the settlement tx id was lost; holding"
            );
            self.store
                .hold_batch(&batch.batch_id, "settled on chain, settlement tx id unrecorded")
                .await?;
            return Ok(TickOutcome::Held {
                batch_id: batch.batch_id,
            });
        }

        let tx_id = ledger.submit_settlement(&batch, submit_nonce).await?;
        self.store
            .record_settlement_tx(&batch.batch_id, &tx_id)
            .await?;
        info!(batch_id = %batch.batch_id, tx = %tx_id, "submitted batch settlement");

        self.finish_settlement(ledger, &batch, &tx_id).await
    }

    async fn finish_settlement(
        &self,
        ledger: &dyn LedgerClient,
        batch: &Batch,
        tx_id: &str,
    ) -> AppResult<TickOutcome> {
        match ledger.await_confirmation(tx_id).await? {
            TxOutcome::Confirmed => {
                self.store.complete_batch(&batch.batch_id, tx_id).await?;
                info!(batch_id = %batch.batch_id, tx = %tx_id, "batch settled");
                Ok(TickOutcome::Settled {
                    batch_id: batch.batch_id.clone(),
                    settlement_tx_id: tx_id.to_string(),
                })
            }
            TxOutcome::Pending => {
                info!(batch_id = %batch.batch_id, tx = %tx_id, "settlement still pending");
                Ok(TickOutcome::AwaitingConfirmation {
                    batch_id: batch.batch_id.clone(),
                })
            }
            TxOutcome::Failed => {
                // The contract rejects duplicate batch ids, so a revert
                // here can mean a submission race as well as a real
                // rejection - either way an operator has to look.
                error!(
                    batch_id = %batch.batch_id,
                    tx = %tx_id,
                    "settlement call reverted, holding for manual review"
                );
                self.store
                    .hold_batch(&batch.batch_id, "settlement transaction reverted")
                    .await?;
                Ok(TickOutcome::Held {
                    batch_id: batch.batch_id.clone(),
                })
            }
        }
    }

    async fn transfer_reverted(&self, batch: &Batch, tx_id: &str) -> AppResult<TickOutcome> {
        // A reverted transfer consumed its nonce but moved no funds;
        // drop the checkpoint so the next tick reserves fresh nonces.
        warn!(
            batch_id = %batch.batch_id,
            tx = %tx_id,
            "transfer reverted, clearing checkpoint for a fresh attempt"
        );
        self.store.clear_checkpoint(&batch.batch_id).await?;
        Ok(TickOutcome::TransferFailed {
            batch_id: batch.batch_id.clone(),
        })
    }
}

/// One pending batch, in priority order: resume the in-flight one,
/// else claim a READY one, else aggregate a new one from READY
/// payments. Aggregation takes only payments matching the currency of
/// the oldest READY payment; other currencies wait for their own batch.
pub async fn acquire_pending_batch(
    store: &dyn PayoutStore,
    aggregator: &BatchAggregator,
) -> AppResult<Option<Batch>> {
    if let Some(batch) = store.in_flight_batch().await? {
        return Ok(Some(batch));
    }
    if let Some(batch) = store.claim_next_batch().await? {
        return Ok(Some(batch));
    }

    let ready = store.ready_payments().await?;
    let Some(first) = ready.first() else {
        return Ok(None);
    };
    let currency = first.currency.clone();
    let snapshot: Vec<Payment> = ready
        .into_iter()
        .filter(|p| p.currency == currency)
        .collect();

    let Some(batch) = aggregator.aggregate(&snapshot)? else {
        return Ok(None);
    };

    let payment_ids: Vec<String> = snapshot.iter().map(|p| p.id.clone()).collect();
    store.create_batch(&batch, &payment_ids).await?;
    info!(
        batch_id = %batch.batch_id,
        payments = payment_ids.len(),
        total = %batch.total_amount,
        currency = %batch.currency,
        "aggregated new payout batch"
    );

    Ok(Some(batch))
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{CompleteOutcome, PayoutStore, SubmitOutcome};
use crate::batch::models::{Batch, BatchStatus, NewPayment, Payment, PaymentStatus};
use crate::error::{AppResult, BatchError};

/// In-memory store, non-durable. Backs local development without a
/// database and every executor test. All trait methods take the write
/// lock for the full transition, which gives the same atomicity the
/// Postgres store gets from conditional updates.
pub struct MemoryStore {
    payments: RwLock<HashMap<String, Payment>>,
    batches: RwLock<Vec<Batch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            payments: RwLock::new(HashMap::new()),
            batches: RwLock::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub async fn seed_batch(&self, batch: Batch) {
        self.batches.write().await.push(batch);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_with_status(batches: &[Batch], status: BatchStatus) -> Option<usize> {
    batches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.status == status)
        .min_by(|(_, a), (_, b)| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        })
        .map(|(idx, _)| idx)
}

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn insert_payment(&self, payment: NewPayment) -> AppResult<SubmitOutcome> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Ok(SubmitOutcome::Duplicate);
        }
        payments.insert(
            payment.id.clone(),
            Payment {
                id: payment.id,
                amount_minor: payment.amount_minor,
                currency: payment.currency,
                status: PaymentStatus::Ready,
                raw: payment.raw,
                created_at: Utc::now(),
            },
        );
        Ok(SubmitOutcome::Accepted)
    }

    async fn ready_payments(&self) -> AppResult<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut ready: Vec<Payment> = payments
            .values()
            .filter(|p| p.status == PaymentStatus::Ready)
            .cloned()
            .collect();
        ready.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(ready)
    }

    async fn create_batch(&self, batch: &Batch, payment_ids: &[String]) -> AppResult<()> {
        let mut payments = self.payments.write().await;
        let mut batches = self.batches.write().await;

        let all_ready = payment_ids.iter().all(|id| {
            payments
                .get(id)
                .map(|p| p.status == PaymentStatus::Ready)
                .unwrap_or(false)
        });
        if !all_ready {
            return Err(BatchError::PaymentsConflict.into());
        }

        for id in payment_ids {
            if let Some(p) = payments.get_mut(id) {
                p.status = PaymentStatus::Batched;
            }
        }
        batches.push(batch.clone());
        Ok(())
    }

    async fn claim_next_batch(&self) -> AppResult<Option<Batch>> {
        let mut batches = self.batches.write().await;
        let Some(idx) = oldest_with_status(&batches, BatchStatus::Ready) else {
            return Ok(None);
        };
        batches[idx].status = BatchStatus::Processing;
        Ok(Some(batches[idx].clone()))
    }

    async fn in_flight_batch(&self) -> AppResult<Option<Batch>> {
        let batches = self.batches.read().await;
        Ok(oldest_with_status(&batches, BatchStatus::Processing).map(|idx| batches[idx].clone()))
    }

    async fn get_batch(&self, batch_id: &str) -> AppResult<Option<Batch>> {
        let batches = self.batches.read().await;
        Ok(batches.iter().find(|b| b.batch_id == batch_id).cloned())
    }

    async fn record_checkpoint(
        &self,
        batch_id: &str,
        transfer_nonce: u64,
        submit_nonce: u64,
    ) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if let Some(batch) = batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id && b.status == BatchStatus::Processing)
        {
            batch.transfer_nonce = Some(transfer_nonce);
            batch.submit_nonce = Some(submit_nonce);
        }
        Ok(())
    }

    async fn clear_checkpoint(&self, batch_id: &str) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if let Some(batch) = batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id && b.status == BatchStatus::Processing)
        {
            batch.transfer_nonce = None;
            batch.submit_nonce = None;
            batch.transfer_tx_id = None;
        }
        Ok(())
    }

    async fn record_transfer_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if let Some(batch) = batches.iter_mut().find(|b| b.batch_id == batch_id) {
            batch.transfer_tx_id = Some(tx_id.to_string());
        }
        Ok(())
    }

    async fn record_settlement_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if let Some(batch) = batches.iter_mut().find(|b| b.batch_id == batch_id) {
            batch.settlement_tx_id = Some(tx_id.to_string());
        }
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: &str,
        settlement_tx_id: &str,
    ) -> AppResult<CompleteOutcome> {
        let mut batches = self.batches.write().await;
        let Some(batch) = batches.iter_mut().find(|b| b.batch_id == batch_id) else {
            return Ok(CompleteOutcome::NotFound);
        };
        if batch.status == BatchStatus::Done {
            return Ok(CompleteOutcome::AlreadyDone);
        }
        batch.status = BatchStatus::Done;
        batch.settlement_tx_id = Some(settlement_tx_id.to_string());
        batch.held_reason = None;
        Ok(CompleteOutcome::Completed)
    }

    async fn hold_batch(&self, batch_id: &str, reason: &str) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if let Some(batch) = batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id && b.status == BatchStatus::Processing)
        {
            batch.status = BatchStatus::Held;
            batch.held_reason = Some(reason.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::hash::canonical_items_hash;
    use crate::batch::models::BatchItem;
    use alloy::primitives::U256;
    use serde_json::json;
    use std::sync::Arc;

    fn new_payment(id: &str, cents: i64, currency: &str) -> NewPayment {
        NewPayment {
            id: id.to_string(),
            amount_minor: cents,
            currency: currency.to_string(),
            raw: json!({}),
        }
    }

    fn ready_batch(batch_id: &str) -> Batch {
        let items = vec![BatchItem {
            payee: "0x1111111111111111111111111111111111111111".to_string(),
            amount: U256::from(100u64),
        }];
        Batch {
            batch_id: batch_id.to_string(),
            total_amount: U256::from(100u64),
            currency: "USD".to_string(),
            token_decimals: 6,
            content_hash: canonical_items_hash(&items),
            items,
            status: BatchStatus::Ready,
            transfer_nonce: None,
            submit_nonce: None,
            transfer_tx_id: None,
            settlement_tx_id: None,
            held_reason: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_payment_ids_are_ignored() {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert_payment(new_payment("p1", 100, "USD")).await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            store.insert_payment(new_payment("p1", 999, "USD")).await.unwrap(),
            SubmitOutcome::Duplicate
        );
        // the original row is untouched
        let ready = store.ready_payments().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].amount_minor, 100);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        store.seed_batch(ready_batch("b1")).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next_batch().await.unwrap()
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                won += 1;
            }
        }
        assert_eq!(won, 1);

        let claimed = store.get_batch("b1").await.unwrap().unwrap();
        assert_eq!(claimed.status, BatchStatus::Processing);
    }

    #[tokio::test]
    async fn test_completion_is_idempotent_first_id_wins() {
        let store = MemoryStore::new();
        let mut batch = ready_batch("b1");
        batch.status = BatchStatus::Processing;
        store.seed_batch(batch).await;

        assert_eq!(
            store.complete_batch("b1", "0xtx1").await.unwrap(),
            CompleteOutcome::Completed
        );
        assert_eq!(
            store.complete_batch("b1", "0xtx2").await.unwrap(),
            CompleteOutcome::AlreadyDone
        );

        let done = store.get_batch("b1").await.unwrap().unwrap();
        assert_eq!(done.status, BatchStatus::Done);
        assert_eq!(done.settlement_tx_id.as_deref(), Some("0xtx1"));

        assert_eq!(
            store.complete_batch("missing", "0xtx3").await.unwrap(),
            CompleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_create_batch_flips_payments_atomically() {
        let store = MemoryStore::new();
        store.insert_payment(new_payment("p1", 100, "USD")).await.unwrap();
        store.insert_payment(new_payment("p2", 200, "USD")).await.unwrap();

        let mut batch = ready_batch("b1");
        batch.status = BatchStatus::Processing;
        let ids = vec!["p1".to_string(), "p2".to_string()];
        store.create_batch(&batch, &ids).await.unwrap();

        assert!(store.ready_payments().await.unwrap().is_empty());

        // the payments are consumed; a second batch over them must fail
        let batch2 = ready_batch("b2");
        assert!(store.create_batch(&batch2, &ids).await.is_err());
        assert!(store.get_batch("b2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_batch_leaves_the_processing_lane() {
        let store = MemoryStore::new();
        let mut batch = ready_batch("b1");
        batch.status = BatchStatus::Processing;
        store.seed_batch(batch).await;

        store.hold_batch("b1", "integrity").await.unwrap();
        assert!(store.in_flight_batch().await.unwrap().is_none());

        let held = store.get_batch("b1").await.unwrap().unwrap();
        assert_eq!(held.status, BatchStatus::Held);
        assert_eq!(held.held_reason.as_deref(), Some("integrity"));

        // operator completion path
        assert_eq!(
            store.complete_batch("b1", "0xmanual").await.unwrap(),
            CompleteOutcome::Completed
        );
    }
}

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use super::{CompleteOutcome, PayoutStore, SubmitOutcome};
use crate::batch::models::{Batch, BatchStatus, NewPayment, Payment, PaymentStatus};
use crate::error::{AppError, AppResult, BatchError};

const BATCH_COLUMNS: &str = "batch_id, total_amount, currency, token_decimals, items, \
     content_hash, status, transfer_nonce, submit_nonce, transfer_tx_id, settlement_tx_id, \
     held_reason, created_at";

/// Postgres-backed store - the source of truth in production.
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        info!("📊 Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration error: {:?}", e)))?;

        info!("✓ Database initialized");
        Ok(Self { pool })
    }
}

fn payment_from_row(row: &PgRow) -> AppResult<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        amount_minor: row.try_get("amount_minor")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::parse(&status)?,
        raw: row
            .try_get::<Option<serde_json::Value>, _>("raw")?
            .unwrap_or(serde_json::Value::Null),
        created_at: row.try_get("created_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> AppResult<Batch> {
    let total_amount: String = row.try_get("total_amount")?;
    let content_hash: String = row.try_get("content_hash")?;
    let status: String = row.try_get("status")?;
    let items: serde_json::Value = row.try_get("items")?;
    let token_decimals: i32 = row.try_get("token_decimals")?;

    Ok(Batch {
        batch_id: row.try_get("batch_id")?,
        total_amount: U256::from_str(&total_amount)
            .map_err(|e| AppError::Internal(format!("stored total not a decimal: {}", e)))?,
        currency: row.try_get("currency")?,
        token_decimals: token_decimals as u32,
        items: serde_json::from_value(items)
            .map_err(|e| AppError::Internal(format!("stored items not decodable: {}", e)))?,
        content_hash: B256::from_str(&content_hash)
            .map_err(|e| AppError::Internal(format!("stored hash not 32 bytes: {}", e)))?,
        status: BatchStatus::parse(&status)?,
        transfer_nonce: row
            .try_get::<Option<i64>, _>("transfer_nonce")?
            .map(|n| n as u64),
        submit_nonce: row
            .try_get::<Option<i64>, _>("submit_nonce")?
            .map(|n| n as u64),
        transfer_tx_id: row.try_get("transfer_tx_id")?,
        settlement_tx_id: row.try_get("settlement_tx_id")?,
        held_reason: row.try_get("held_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PayoutStore for PgPayoutStore {
    async fn insert_payment(&self, payment: NewPayment) -> AppResult<SubmitOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, amount_minor, currency, status, raw)
            VALUES ($1, $2, $3, 'READY', $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&payment.id)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(&payment.raw)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(if inserted == 1 {
            SubmitOutcome::Accepted
        } else {
            SubmitOutcome::Duplicate
        })
    }

    async fn ready_payments(&self) -> AppResult<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, amount_minor, currency, status, raw, created_at
            FROM payments
            WHERE status = 'READY'
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn create_batch(&self, batch: &Batch, payment_ids: &[String]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO batches (
                batch_id, total_amount, currency, token_decimals,
                items, content_hash, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&batch.batch_id)
        .bind(batch.total_amount.to_string())
        .bind(&batch.currency)
        .bind(batch.token_decimals as i32)
        .bind(serde_json::to_value(&batch.items).map_err(|e| {
            AppError::Internal(format!("items not serializable: {}", e))
        })?)
        .bind(batch.content_hash.to_string())
        .bind(batch.status.as_str())
        .execute(&mut *tx)
        .await?;

        let flipped = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'BATCHED'
            WHERE id = ANY($1) AND status = 'READY'
            "#,
        )
        .bind(payment_ids.to_vec())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if flipped != payment_ids.len() as u64 {
            tx.rollback().await?;
            return Err(BatchError::PaymentsConflict.into());
        }

        tx.commit().await?;
        Ok(())
    }

    async fn claim_next_batch(&self) -> AppResult<Option<Batch>> {
        // Conditional single-statement claim; SKIP LOCKED keeps
        // concurrent claimants from blocking on each other.
        let row = sqlx::query(&format!(
            r#"
            UPDATE batches SET status = 'PROCESSING'
            WHERE batch_id = (
                SELECT batch_id FROM batches
                WHERE status = 'READY'
                ORDER BY created_at, batch_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ) AND status = 'READY'
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn in_flight_batch(&self) -> AppResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM batches
            WHERE status = 'PROCESSING'
            ORDER BY created_at, batch_id
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn get_batch(&self, batch_id: &str) -> AppResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = $1"
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn record_checkpoint(
        &self,
        batch_id: &str,
        transfer_nonce: u64,
        submit_nonce: u64,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE batches
            SET transfer_nonce = $2, submit_nonce = $3
            WHERE batch_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(batch_id)
        .bind(transfer_nonce as i64)
        .bind(submit_nonce as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_checkpoint(&self, batch_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE batches
            SET transfer_nonce = NULL, submit_nonce = NULL, transfer_tx_id = NULL
            WHERE batch_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_transfer_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE batches SET transfer_tx_id = $2 WHERE batch_id = $1")
            .bind(batch_id)
            .bind(tx_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_settlement_tx(&self, batch_id: &str, tx_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE batches SET settlement_tx_id = $2 WHERE batch_id = $1")
            .bind(batch_id)
            .bind(tx_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: &str,
        settlement_tx_id: &str,
    ) -> AppResult<CompleteOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE batches
            SET status = 'DONE', settlement_tx_id = $2, held_reason = NULL
            WHERE batch_id = $1 AND status <> 'DONE'
            "#,
        )
        .bind(batch_id)
        .bind(settlement_tx_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(CompleteOutcome::Completed);
        }

        let exists = sqlx::query("SELECT 1 FROM batches WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        Ok(if exists {
            CompleteOutcome::AlreadyDone
        } else {
            CompleteOutcome::NotFound
        })
    }

    async fn hold_batch(&self, batch_id: &str, reason: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE batches
            SET status = 'HELD', held_reason = $2
            WHERE batch_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(batch_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::hash::canonical_items_hash;
use crate::error::{AppResult, BatchError};

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Ready,
    Batched,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::Batched => "BATCHED",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "READY" => Ok(PaymentStatus::Ready),
            "BATCHED" => Ok(PaymentStatus::Batched),
            other => Err(crate::error::AppError::Internal(format!(
                "unknown payment status: {}",
                other
            ))),
        }
    }
}

/// Batch status
///
/// READY -> PROCESSING is a claim, PROCESSING -> DONE is a completion.
/// HELD parks a batch that needs an operator before settlement can
/// continue (integrity violation or a lost settlement tx id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Ready,
    Processing,
    Done,
    Held,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Ready => "READY",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Done => "DONE",
            BatchStatus::Held => "HELD",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "READY" => Ok(BatchStatus::Ready),
            "PROCESSING" => Ok(BatchStatus::Processing),
            "DONE" => Ok(BatchStatus::Done),
            "HELD" => Ok(BatchStatus::Held),
            other => Err(crate::error::AppError::Internal(format!(
                "unknown batch status: {}",
                other
            ))),
        }
    }
}

/// Incoming payment as accepted from the ingestion boundary.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub raw: serde_json::Value,
}

/// Payment entity - immutable once BATCHED, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One payee's slice of a batch. Amounts are settlement-token units,
/// serialized as decimal strings everywhere they cross a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub payee: String,
    #[serde(with = "u256_dec")]
    pub amount: U256,
}

/// Configured disbursement split, shares in basis points.
#[derive(Debug, Clone)]
pub struct PayeeSplit {
    pub address: String,
    pub share_bps: u32,
}

/// Batch entity - owns a snapshot of the payments that funded it.
///
/// transfer_nonce/submit_nonce are the durable settlement checkpoint:
/// they are persisted before either ledger transaction is sent, so a
/// crash mid-settlement can be resumed without risking a double
/// transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    #[serde(with = "u256_dec")]
    pub total_amount: U256,
    pub currency: String,
    pub token_decimals: u32,
    pub items: Vec<BatchItem>,
    pub content_hash: B256,
    pub status: BatchStatus,
    pub transfer_nonce: Option<u64>,
    pub submit_nonce: Option<u64>,
    pub transfer_tx_id: Option<String>,
    pub settlement_tx_id: Option<String>,
    pub held_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Re-derive the batch's invariants from its items. A failure here
    /// means the stored row no longer matches what was hashed at
    /// aggregation time; settlement must not proceed.
    pub fn verify_integrity(&self) -> Result<(), BatchError> {
        let sum: U256 = self
            .items
            .iter()
            .fold(U256::ZERO, |acc, item| acc + item.amount);
        if sum != self.total_amount {
            return Err(BatchError::IntegrityViolation {
                batch_id: self.batch_id.clone(),
                reason: format!("item sum {} != total {}", sum, self.total_amount),
            });
        }

        let recomputed = canonical_items_hash(&self.items);
        if recomputed != self.content_hash {
            return Err(BatchError::IntegrityViolation {
                batch_id: self.batch_id.clone(),
                reason: format!(
                    "content hash mismatch: stored {} recomputed {}",
                    self.content_hash, recomputed
                ),
            });
        }

        Ok(())
    }
}

/// Serialize U256 amounts as decimal strings. JSON numbers and
/// floating-point round-trips would silently lose precision.
pub mod u256_dec {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<U256>().map_err(de::Error::custom)
    }
}

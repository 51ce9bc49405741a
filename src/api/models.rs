use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::models::{Batch, BatchItem, BatchStatus};

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct PaymentAcceptedResponse {
    pub id: String,
    pub outcome: String,
}

/// Persisted batch representation exposed to collaborators. Amounts
/// are decimal strings end to end.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_id: String,
    pub total_amount: String,
    pub currency: String,
    pub token_decimals: u32,
    pub items: Vec<BatchItem>,
    pub batch_hash: String,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Batch> for BatchResponse {
    fn from(batch: Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            total_amount: batch.total_amount.to_string(),
            currency: batch.currency,
            token_decimals: batch.token_decimals,
            items: batch.items,
            batch_hash: batch.content_hash.to_string(),
            status: batch.status,
            settlement_tx_id: batch.settlement_tx_id,
            created_at: batch.created_at,
        }
    }
}

/// markSettled request, as posted by the settlement collaborator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkProcessedRequest {
    pub batch_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
pub struct MarkProcessedResponse {
    pub ok: bool,
}

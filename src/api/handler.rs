use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::info;
use uuid::Uuid;

use crate::api::models::{
    BatchResponse, MarkProcessedRequest, MarkProcessedResponse, PaymentAcceptedResponse,
};
use crate::batch::aggregator::BatchAggregator;
use crate::batch::models::NewPayment;
use crate::config::WebhookSettings;
use crate::error::{AppError, AppResult};
use crate::settlement::executor::acquire_pending_batch;
use crate::store::{CompleteOutcome, PayoutStore, SubmitOutcome};

type HmacSha256 = Hmac<Sha256>;

const BPS_DENOMINATOR: i64 = 10_000;

/// Shared application state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PayoutStore>,
    pub aggregator: Arc<BatchAggregator>,
    pub webhook: WebhookSettings,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// Shopify orders-paid webhook. The body is consumed raw so the HMAC
/// is computed over exactly the bytes that were signed.
pub async fn orders_paid_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    if !state.webhook.dev_mode {
        verify_webhook_hmac(&headers, &body, &state.webhook.secret)?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("malformed webhook payload: {}", e)))?;

    let (id, outcome) = ingest_order(&state, payload).await?;
    Ok(Json(PaymentAcceptedResponse {
        id,
        outcome: match outcome {
            SubmitOutcome::Accepted => "accepted".to_string(),
            SubmitOutcome::Duplicate => "duplicate".to_string(),
        },
    }))
}

/// Insert a validated order payload as a READY payment. Split out of
/// the axum handler so the ingestion rules are testable directly.
pub async fn ingest_order(state: &AppState, payload: Value) -> AppResult<(String, SubmitOutcome)> {
    let currency = payload
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("USD")
        .to_string();

    let total_price = payload
        .get("total_price")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidInput("total_price missing".to_string()))?;
    let gross_minor = price_to_minor_units(total_price)?;

    // platform fee comes off before the split
    let net_minor = gross_minor * (BPS_DENOMINATOR - state.webhook.fees_bps as i64) / BPS_DENOMINATOR;

    let id = payload
        .get("id")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .or_else(|| {
            payload
                .get("admin_graphql_api_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state
        .store
        .insert_payment(NewPayment {
            id: id.clone(),
            amount_minor: net_minor,
            currency,
            raw: payload,
        })
        .await?;

    if outcome == SubmitOutcome::Accepted {
        info!(payment_id = %id, amount_minor = net_minor, "payment accepted");
    }
    Ok((id, outcome))
}

/// Current pending batch - claims it (or aggregates a fresh one) as a
/// side effect. Returns an empty object when there is nothing to do.
pub async fn latest_batch(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let batch = acquire_pending_batch(state.store.as_ref(), state.aggregator.as_ref()).await?;
    Ok(match batch {
        Some(batch) => Json(serde_json::to_value(BatchResponse::from(batch)).map_err(
            |e| AppError::Internal(format!("batch not serializable: {}", e)),
        )?),
        None => Json(json!({})),
    })
}

/// markSettled: record the settlement tx id and flip the batch to
/// DONE. Idempotent - repeat calls keep the first recorded id.
pub async fn mark_processed(
    State(state): State<AppState>,
    Json(request): Json<MarkProcessedRequest>,
) -> AppResult<impl IntoResponse> {
    match state
        .store
        .complete_batch(&request.batch_id, &request.tx_hash)
        .await?
    {
        CompleteOutcome::Completed | CompleteOutcome::AlreadyDone => {
            Ok(Json(MarkProcessedResponse { ok: true }))
        }
        CompleteOutcome::NotFound => Err(AppError::NotFound(request.batch_id)),
    }
}

pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let batch = state
        .store
        .get_batch(&batch_id)
        .await?
        .ok_or(AppError::NotFound(batch_id))?;
    Ok(Json(BatchResponse::from(batch)))
}

/// Constant-time HMAC-SHA256 check against the signature header.
fn verify_webhook_hmac(headers: &HeaderMap, body: &[u8], secret: &str) -> AppResult<()> {
    let header = headers
        .get("x-shopify-hmac-sha256")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let expected = BASE64.decode(header).map_err(|_| AppError::Unauthorized)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Unauthorized)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| AppError::Unauthorized)
}

/// Parse a decimal price string ("12.34") into minor units without
/// going through floating point. Rounds half-up past two decimals.
fn price_to_minor_units(price: &str) -> AppResult<i64> {
    let price = price.trim();
    let bad = || AppError::InvalidInput(format!("bad price: {}", price));

    let (whole, fraction) = match price.split_once('.') {
        Some((w, f)) => (w, f),
        None => (price, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(bad());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) && !whole.is_empty() {
        return Err(bad());
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }

    let whole_minor: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse::<i64>().map_err(|_| bad())?
    };

    let mut digits = fraction.chars().map(|c| c as i64 - '0' as i64);
    let cents = digits.next().unwrap_or(0) * 10 + digits.next().unwrap_or(0);
    let round_up = digits.next().map(|d| d >= 5).unwrap_or(false);

    Ok(whole_minor * 100 + cents + i64::from(round_up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::models::PayeeSplit;
    use crate::store::memory::MemoryStore;

    fn state(dev_mode: bool, fees_bps: u32) -> AppState {
        let splits = vec![
            PayeeSplit {
                address: "0x1111111111111111111111111111111111111111".to_string(),
                share_bps: 6000,
            },
            PayeeSplit {
                address: "0x2222222222222222222222222222222222222222".to_string(),
                share_bps: 4000,
            },
        ];
        AppState {
            store: Arc::new(MemoryStore::new()),
            aggregator: Arc::new(BatchAggregator::new(6, splits).unwrap()),
            webhook: WebhookSettings {
                secret: "devsecret".to_string(),
                dev_mode,
                fees_bps,
            },
        }
    }

    #[test]
    fn test_price_parsing_is_integer_only() {
        assert_eq!(price_to_minor_units("12.34").unwrap(), 1234);
        assert_eq!(price_to_minor_units("12").unwrap(), 1200);
        assert_eq!(price_to_minor_units("0.5").unwrap(), 50);
        assert_eq!(price_to_minor_units(".50").unwrap(), 50);
        assert_eq!(price_to_minor_units("1.999").unwrap(), 200);
        assert_eq!(price_to_minor_units("1.994").unwrap(), 199);
        assert_eq!(price_to_minor_units("0").unwrap(), 0);

        assert!(price_to_minor_units("").is_err());
        assert!(price_to_minor_units("-5").is_err());
        assert!(price_to_minor_units("12.3x").is_err());
        assert!(price_to_minor_units("abc").is_err());
    }

    #[tokio::test]
    async fn test_ingest_applies_fee_and_dedupes() {
        let state = state(true, 250); // 2.5% fee

        let payload = json!({
            "id": 820982911946154508u64,
            "currency": "USD",
            "total_price": "100.00"
        });

        let (id, outcome) = ingest_order(&state, payload.clone()).await.unwrap();
        assert_eq!(id, "820982911946154508");
        assert_eq!(outcome, SubmitOutcome::Accepted);

        // 10000 cents minus 250 bps -> 9750
        let ready = state.store.ready_payments().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].amount_minor, 9750);

        let (_, outcome) = ingest_order(&state, payload).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Duplicate);
        assert_eq!(state.store.ready_payments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_missing_total() {
        let state = state(true, 0);
        let result = ingest_order(&state, json!({ "id": "x" })).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_webhook_hmac_verification() {
        let secret = "devsecret";
        let body = br#"{"id":1,"total_price":"10.00"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-shopify-hmac-sha256", signature.parse().unwrap());
        assert!(verify_webhook_hmac(&headers, body, secret).is_ok());

        // tampered body fails
        assert!(verify_webhook_hmac(&headers, b"{}", secret).is_err());

        // missing header fails
        assert!(verify_webhook_hmac(&HeaderMap::new(), body, secret).is_err());
    }
}

use alloy::primitives::{Address, U256};
use chrono::{SecondsFormat, Utc};
use rand::{distr::Alphanumeric, Rng};

use crate::batch::hash::canonical_items_hash;
use crate::batch::models::{Batch, BatchItem, BatchStatus, PayeeSplit, Payment};
use crate::error::{AppResult, BatchError};

const BPS_DENOMINATOR: u32 = 10_000;

/// Pure aggregation of READY payments into a disbursement batch.
///
/// All arithmetic is exact integer arithmetic on U256; the configured
/// split is validated once at construction so aggregation itself can
/// only fail on bad input (mixed currencies).
pub struct BatchAggregator {
    token_decimals: u32,
    payees: Vec<PayeeSplit>,
}

impl BatchAggregator {
    pub fn new(token_decimals: u32, payees: Vec<PayeeSplit>) -> AppResult<Self> {
        if payees.is_empty() {
            return Err(BatchError::NoPayees.into());
        }
        // minor units are cents; 10^decimals / 100 is only exact from
        // two decimals up.
        if token_decimals < 2 {
            return Err(BatchError::UnsupportedDecimals(token_decimals).into());
        }
        let share_sum: u32 = payees.iter().map(|p| p.share_bps).sum();
        if share_sum != BPS_DENOMINATOR {
            return Err(BatchError::InvalidShares(share_sum).into());
        }
        for payee in &payees {
            if payee.address.parse::<Address>().is_err() {
                return Err(BatchError::InvalidPayee(payee.address.clone()).into());
            }
        }

        Ok(Self {
            token_decimals,
            payees,
        })
    }

    /// Aggregate a snapshot of READY payments into one batch.
    ///
    /// Empty input is a no-op, not an error. Input must be a single
    /// currency; callers segregate first (see the executor) and a mixed
    /// snapshot reaching this point is rejected rather than guessed at.
    pub fn aggregate(&self, payments: &[Payment]) -> AppResult<Option<Batch>> {
        let Some(first) = payments.first() else {
            return Ok(None);
        };

        let currency = first.currency.clone();
        if let Some(other) = payments.iter().find(|p| p.currency != currency) {
            return Err(BatchError::MixedCurrency {
                first: currency,
                other: other.currency.clone(),
            }
            .into());
        }

        let total_minor: U256 = payments
            .iter()
            .fold(U256::ZERO, |acc, p| acc + U256::from(p.amount_minor as u64));

        // cents -> token units, exact: minor * 10^decimals / 100
        let factor = U256::from(10u64).pow(U256::from(self.token_decimals));
        let total_tokens = total_minor * factor / U256::from(100u64);

        let mut items: Vec<BatchItem> = self
            .payees
            .iter()
            .map(|payee| BatchItem {
                payee: payee.address.clone(),
                amount: total_tokens * U256::from(payee.share_bps) / U256::from(BPS_DENOMINATOR),
            })
            .collect();

        // The floor split loses a remainder bounded by items.len() - 1
        // units; the whole remainder goes to the first configured payee.
        let split_sum: U256 = items.iter().fold(U256::ZERO, |acc, i| acc + i.amount);
        let dust = total_tokens - split_sum;
        if dust > U256::ZERO {
            items[0].amount += dust;
        }

        let batch = Batch {
            batch_id: new_batch_id(),
            total_amount: total_tokens,
            currency: first.currency.clone(),
            token_decimals: self.token_decimals,
            content_hash: canonical_items_hash(&items),
            items,
            status: BatchStatus::Processing,
            transfer_nonce: None,
            submit_nonce: None,
            transfer_tx_id: None,
            settlement_tx_id: None,
            held_reason: None,
            created_at: Utc::now(),
        };

        Ok(Some(batch))
    }
}

/// Unique, creation-order-sortable batch id: millisecond RFC3339
/// timestamp plus a short random suffix.
fn new_batch_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!(
        "{}#{}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYEE_A: &str = "0x1111111111111111111111111111111111111111";
    const PAYEE_B: &str = "0x2222222222222222222222222222222222222222";
    const PAYEE_C: &str = "0x3333333333333333333333333333333333333333";

    fn splits(shares: &[u32]) -> Vec<PayeeSplit> {
        [PAYEE_A, PAYEE_B, PAYEE_C]
            .iter()
            .zip(shares.iter())
            .map(|(address, share_bps)| PayeeSplit {
                address: address.to_string(),
                share_bps: *share_bps,
            })
            .collect()
    }

    fn payment(id: &str, cents: i64, currency: &str) -> Payment {
        Payment {
            id: id.to_string(),
            amount_minor: cents,
            currency: currency.to_string(),
            status: crate::batch::models::PaymentStatus::Ready,
            raw: json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_input_is_a_noop() {
        let agg = BatchAggregator::new(6, splits(&[6000, 4000])).unwrap();
        assert!(agg.aggregate(&[]).unwrap().is_none());
    }

    #[test]
    fn test_conversion_and_two_way_split() {
        // 1234 cents at 6 decimals -> 12,340,000 token units
        let agg = BatchAggregator::new(6, splits(&[6000, 4000])).unwrap();
        let batch = agg
            .aggregate(&[payment("p1", 1234, "USD")])
            .unwrap()
            .unwrap();

        assert_eq!(batch.total_amount, U256::from(12_340_000u64));
        assert_eq!(batch.currency, "USD");
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].amount, U256::from(7_404_000u64));
        assert_eq!(batch.items[1].amount, U256::from(4_936_000u64));

        let sum: U256 = batch.items.iter().fold(U256::ZERO, |a, i| a + i.amount);
        assert_eq!(sum, batch.total_amount);
        assert_eq!(batch.status, BatchStatus::Processing);
        assert!(batch.verify_integrity().is_ok());
    }

    #[test]
    fn test_dust_goes_to_first_payee() {
        // 7 cents at 2 decimals -> 7 token units across [3333, 3334, 3333]:
        // floor split [2, 2, 2], dust 1, final [3, 2, 2].
        let agg = BatchAggregator::new(2, splits(&[3333, 3334, 3333])).unwrap();
        let batch = agg.aggregate(&[payment("p1", 7, "USD")]).unwrap().unwrap();

        let amounts: Vec<U256> = batch.items.iter().map(|i| i.amount).collect();
        assert_eq!(
            amounts,
            vec![U256::from(3u64), U256::from(2u64), U256::from(2u64)]
        );
        assert_eq!(batch.total_amount, U256::from(7u64));
    }

    #[test]
    fn test_conservation_over_a_range_of_totals() {
        let agg = BatchAggregator::new(2, splits(&[1, 4999, 5000])).unwrap();
        for cents in 0..500i64 {
            let batch = agg
                .aggregate(&[payment("p", cents, "USD")])
                .unwrap()
                .unwrap();
            let sum: U256 = batch.items.iter().fold(U256::ZERO, |a, i| a + i.amount);
            assert_eq!(sum, batch.total_amount, "leaked funds at {} cents", cents);
        }
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let agg = BatchAggregator::new(6, splits(&[6000, 4000])).unwrap();
        let a = payment("a", 100, "USD");
        let b = payment("b", 250, "USD");

        let batch_ab = agg.aggregate(&[a.clone(), b.clone()]).unwrap().unwrap();
        let batch_ba = agg.aggregate(&[b, a]).unwrap().unwrap();

        assert_eq!(batch_ab.content_hash, batch_ba.content_hash);
        assert_eq!(batch_ab.total_amount, batch_ba.total_amount);
        // ids stay unique even for identical content
        assert_ne!(batch_ab.batch_id, batch_ba.batch_id);
    }

    #[test]
    fn test_mixed_currency_is_rejected() {
        let agg = BatchAggregator::new(6, splits(&[6000, 4000])).unwrap();
        let result = agg.aggregate(&[payment("a", 100, "USD"), payment("b", 100, "EUR")]);
        assert!(matches!(
            result,
            Err(crate::error::AppError::Batch(BatchError::MixedCurrency { .. }))
        ));
    }

    #[test]
    fn test_zero_total_is_a_valid_batch() {
        let agg = BatchAggregator::new(6, splits(&[6000, 4000])).unwrap();
        let batch = agg.aggregate(&[payment("p", 0, "USD")]).unwrap().unwrap();
        assert_eq!(batch.total_amount, U256::ZERO);
        assert!(batch.verify_integrity().is_ok());
    }

    #[test]
    fn test_shares_must_sum_to_ten_thousand() {
        let result = BatchAggregator::new(6, splits(&[6000, 4001]));
        assert!(matches!(
            result,
            Err(crate::error::AppError::Batch(BatchError::InvalidShares(10001)))
        ));
    }

    #[test]
    fn test_split_config_is_validated() {
        assert!(BatchAggregator::new(6, vec![]).is_err());
        assert!(BatchAggregator::new(1, splits(&[6000, 4000])).is_err());
        assert!(BatchAggregator::new(
            6,
            vec![PayeeSplit {
                address: "not-an-address".to_string(),
                share_bps: 10_000,
            }]
        )
        .is_err());
    }
}

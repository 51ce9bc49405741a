use alloy::primitives::{keccak256, B256};
use serde::Serialize;

use crate::batch::models::BatchItem;

/// Canonical form of one item for hashing: payee lower-cased, amount
/// as a decimal string, field order fixed.
#[derive(Serialize)]
struct CanonicalItem {
    payee: String,
    amount: String,
}

/// JSON the content hash is computed over. Two batches with the same
/// logical items always canonicalize to the same bytes regardless of
/// how the items were constructed.
pub fn canonical_items_json(items: &[BatchItem]) -> String {
    let canon: Vec<CanonicalItem> = items
        .iter()
        .map(|item| CanonicalItem {
            payee: item.payee.to_lowercase(),
            amount: item.amount.to_string(),
        })
        .collect();
    // Serialization of these two plain string fields cannot fail.
    serde_json::to_string(&canon).unwrap_or_default()
}

/// Content hash over the canonicalized items.
pub fn canonical_items_hash(items: &[BatchItem]) -> B256 {
    keccak256(canonical_items_json(items).as_bytes())
}

/// bytes32 identifier the settlement contract keys a batch on.
pub fn batch_ref(batch_id: &str) -> B256 {
    keccak256(batch_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn item(payee: &str, amount: u64) -> BatchItem {
        BatchItem {
            payee: payee.to_string(),
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_canonical_json_shape() {
        let items = vec![item("0xABC", 5), item("0xdef", 12_340_000)];
        assert_eq!(
            canonical_items_json(&items),
            r#"[{"payee":"0xabc","amount":"5"},{"payee":"0xdef","amount":"12340000"}]"#
        );
    }

    #[test]
    fn test_hash_is_case_insensitive_on_payees() {
        let upper = vec![item("0xABC", 5)];
        let lower = vec![item("0xabc", 5)];
        assert_eq!(canonical_items_hash(&upper), canonical_items_hash(&lower));
    }

    #[test]
    fn test_hash_depends_on_amounts_and_order() {
        let base = vec![item("0xabc", 5), item("0xdef", 6)];
        let other_amount = vec![item("0xabc", 5), item("0xdef", 7)];
        let reordered = vec![item("0xdef", 6), item("0xabc", 5)];

        assert_ne!(canonical_items_hash(&base), canonical_items_hash(&other_amount));
        assert_ne!(canonical_items_hash(&base), canonical_items_hash(&reordered));
    }

    #[test]
    fn test_batch_ref_is_stable() {
        let a = batch_ref("2024-01-01T00:00:00.000Z#abc123");
        let b = batch_ref("2024-01-01T00:00:00.000Z#abc123");
        let c = batch_ref("2024-01-01T00:00:00.000Z#abc124");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

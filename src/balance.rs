//! Balances and purchase history.
//!
//! Native balance comes from the Horizon account record, the TUR balance from
//! a read-only `balance` call. Purchase history is reconstructed from the
//! account's operations: any transaction with an outbound native payment is
//! a purchase, and it counts as discounted when the amount matches a known
//! discounted price or the transaction also invoked a contract. This is a
//! heuristic; prices outside the catalog are misclassified.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::catalog::discount_price_table;
use crate::config::HISTORY_PAGE_LIMIT;
use crate::error::FlowError;
use crate::execution::{ContractCall, TxPipeline};
use crate::ledger::{OperationRecord, ScValue};
use crate::types::{parse_amount, Balances, PurchaseKind, PurchaseRecord, Stroops};

/// Group operations by transaction, keeping first-seen (newest-first) order
fn group_by_transaction(operations: &[OperationRecord]) -> Vec<(&str, Vec<&OperationRecord>)> {
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut groups: Vec<(&str, Vec<&OperationRecord>)> = Vec::new();

    for op in operations {
        let hash = op.transaction_hash.as_str();
        match index.get(hash) {
            Some(&i) => groups[i].1.push(op),
            None => {
                index.insert(hash, groups.len());
                groups.push((hash, vec![op]));
            }
        }
    }
    groups
}

/// Classify purchases made by `address` from its operation history.
///
/// `discount_prices` maps a discounted native price to its TUR cost.
pub fn classify_purchases(
    address: &str,
    operations: &[OperationRecord],
    discount_prices: &FxHashMap<Stroops, Stroops>,
) -> Vec<PurchaseRecord> {
    let mut purchases = Vec::new();

    for (hash, ops) in group_by_transaction(operations) {
        let payment = ops.iter().find(|op| {
            op.kind == "payment"
                && op.from.as_deref() == Some(address)
                && op.asset_type.as_deref() == Some("native")
        });
        let Some(payment) = payment else {
            continue;
        };

        let Some(amount) = payment.amount.as_deref().and_then(parse_amount) else {
            warn!("[BALANCE] Skipping payment {} with unreadable amount {:?}", payment.id, payment.amount);
            continue;
        };

        let known_discount = discount_prices.get(&amount).copied();
        let invoked_contract = ops.iter().any(|op| op.kind == "invoke_host_function");
        let kind = if known_discount.is_some() || invoked_contract {
            PurchaseKind::Discounted
        } else {
            PurchaseKind::NativeOnly
        };

        purchases.push(PurchaseRecord {
            id: payment.id.clone(),
            created_at: payment.created_at.clone(),
            amount,
            token_amount: known_discount.unwrap_or(0),
            seller: payment.to.clone().unwrap_or_default(),
            tx_hash: hash.to_string(),
            kind,
        });
    }
    purchases
}

/// Balance and history queries
pub struct BalanceService {
    pipeline: Arc<TxPipeline>,
    token_contract: String,
    max_pages: u32,
}

impl BalanceService {
    pub fn new(pipeline: Arc<TxPipeline>, token_contract: &str, max_pages: u32) -> Self {
        Self {
            pipeline,
            token_contract: token_contract.to_string(),
            max_pages: max_pages.max(1),
        }
    }

    /// Native balance in stroops; an account without a native line holds 0
    pub async fn native_balance(&self, address: &str) -> Result<Stroops, FlowError> {
        let account = self
            .pipeline
            .ledger()
            .load_account(address)
            .await
            .map_err(|e| FlowError::AccountFetch {
                address: address.to_string(),
                message: format!("{:#}", e),
            })?;

        match account.native_balance() {
            Some(balance) => parse_amount(balance)
                .ok_or_else(|| FlowError::Decode(format!("native balance '{}' is not a decimal", balance))),
            None => Ok(0),
        }
    }

    /// TUR balance in base units; 0 while the token contract is not configured
    pub async fn token_balance(&self, address: &str) -> Result<Stroops, FlowError> {
        if self.token_contract.is_empty() {
            warn!("[BALANCE] TUR token contract not configured");
            return Ok(0);
        }

        let call = ContractCall::new(&self.token_contract, "balance", vec![ScValue::address(address)]);
        match self.pipeline.read(address, &call).await? {
            ScValue::Void => Ok(0),
            value => value
                .as_i128()
                .ok_or_else(|| FlowError::Decode(format!("balance returned {:?}", value))),
        }
    }

    /// Both balances, queried concurrently
    pub async fn balances(&self, address: &str) -> Result<Balances, FlowError> {
        let (native, token) = tokio::join!(self.native_balance(address), self.token_balance(address));
        let balances = Balances {
            native: native?,
            token: token?,
        };
        debug!("[BALANCE] {}: {}", address, balances);
        Ok(balances)
    }

    /// Purchases reconstructed from up to `max_pages` pages of history
    pub async fn purchase_history(&self, address: &str) -> Result<Vec<PurchaseRecord>, FlowError> {
        let ledger = self.pipeline.ledger();
        let mut operations = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..self.max_pages {
            let batch = ledger
                .account_operations(address, cursor.as_deref(), HISTORY_PAGE_LIMIT)
                .await
                .map_err(|e| FlowError::AccountFetch {
                    address: address.to_string(),
                    message: format!("{:#}", e),
                })?;

            debug!("[BALANCE] History page {}: {} operations", page + 1, batch.records.len());
            operations.extend(batch.records);

            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let purchases = classify_purchases(address, &operations, discount_price_table());
        info!(
            "[BALANCE] {} purchases found in {} operations",
            purchases.len(),
            operations.len()
        );
        Ok(purchases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::whole;

    const BUYER: &str = "GBUYER";

    fn op(id: &str, tx: &str, kind: &str) -> OperationRecord {
        OperationRecord {
            id: id.to_string(),
            paging_token: id.to_string(),
            transaction_hash: tx.to_string(),
            kind: kind.to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            from: None,
            to: None,
            asset_type: None,
            amount: None,
        }
    }

    fn payment(id: &str, tx: &str, from: &str, amount: &str) -> OperationRecord {
        OperationRecord {
            from: Some(from.to_string()),
            to: Some("GSELLER".to_string()),
            asset_type: Some("native".to_string()),
            amount: Some(amount.to_string()),
            ..op(id, tx, "payment")
        }
    }

    #[test]
    fn test_classification() {
        let ops = vec![
            // Discounted price from the catalog
            payment("6", "t4", BUYER, "30.0000000"),
            // Unknown price but paired with a contract call
            payment("5", "t3", BUYER, "17.0000000"),
            op("4", "t3", "invoke_host_function"),
            // Plain full-price payment
            payment("3", "t2", BUYER, "50.0000000"),
            // Incoming payment is not a purchase
            payment("2", "t1", "GSOMEONE", "30.0000000"),
            op("1", "t0", "create_account"),
        ];

        let purchases = classify_purchases(BUYER, &ops, discount_price_table());
        assert_eq!(purchases.len(), 3);

        assert_eq!(purchases[0].tx_hash, "t4");
        assert_eq!(purchases[0].kind, PurchaseKind::Discounted);
        assert_eq!(purchases[0].token_amount, whole(5000));

        assert_eq!(purchases[1].tx_hash, "t3");
        assert_eq!(purchases[1].kind, PurchaseKind::Discounted);
        assert_eq!(purchases[1].token_amount, 0);

        assert_eq!(purchases[2].kind, PurchaseKind::NativeOnly);
        assert_eq!(purchases[2].amount, whole(50));
        assert_eq!(purchases[2].seller, "GSELLER");
    }

    #[test]
    fn test_non_native_and_malformed_payments_are_skipped() {
        let mut credit = payment("2", "t1", BUYER, "30.0000000");
        credit.asset_type = Some("credit_alphanum4".to_string());
        let garbage = payment("1", "t0", BUYER, "lots");

        assert!(classify_purchases(BUYER, &[credit, garbage], discount_price_table()).is_empty());
    }

    #[test]
    fn test_grouping_keeps_newest_first() {
        let ops = vec![op("3", "b", "payment"), op("2", "a", "payment"), op("1", "b", "invoke_host_function")];
        let groups = group_by_transaction(&ops);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }
}

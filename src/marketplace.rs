//! Marketplace purchases: full price in XLM, or discounted with TUR.
//!
//! A discounted purchase is a chain of independent submissions (optional
//! approve, contract call, payment, burn). Steps run sequentially; the first
//! failure stops the chain and is reported together with the hashes of the
//! steps already submitted. Nothing is rolled back.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::catalog;
use crate::config::AppConfig;
use crate::error::{FlowError, PurchaseStep, TxOutcome};
use crate::execution::{ContractCall, StepLabel, SubmittedTx, TxPipeline};
use crate::ledger::ScValue;
use crate::types::{format_stroops, Balances, Product, PurchaseMode, Stroops};
use crate::wallet::{Signer, WalletSession};

const FULL_FLOW: &str = "purchase_full";
const DISCOUNT_FLOW: &str = "purchase_discount";

fn label(mode: PurchaseMode, step: PurchaseStep) -> StepLabel {
    let flow = match mode {
        PurchaseMode::Full => FULL_FLOW,
        PurchaseMode::Discounted => DISCOUNT_FLOW,
    };
    StepLabel::new(flow, step.as_str())
}

/// Client-side pre-check against cached balances
pub fn ensure_affordable(product: &Product, mode: PurchaseMode, balances: &Balances) -> Result<(), FlowError> {
    let native = mode.native_amount(product);
    if balances.native < native {
        return Err(FlowError::InsufficientBalance {
            asset: "XLM",
            required: native,
            available: balances.native,
        });
    }

    let tokens = mode.token_amount(product);
    if balances.token < tokens {
        return Err(FlowError::InsufficientBalance {
            asset: "TUR",
            required: tokens,
            available: balances.token,
        });
    }
    Ok(())
}

/// Sequential steps of one purchase, tracking what already went through
struct StepChain {
    mode: PurchaseMode,
    completed: Vec<String>,
}

impl StepChain {
    fn new(mode: PurchaseMode) -> Self {
        Self {
            mode,
            completed: Vec::with_capacity(4),
        }
    }

    fn record(&mut self, step: PurchaseStep, result: Result<SubmittedTx, FlowError>) -> Result<(), FlowError> {
        match result {
            Ok(tx) => {
                info!("[MARKET] {} ✅ {}", label(self.mode, step).step, tx.hash);
                self.completed.push(tx.hash);
                Ok(())
            }
            Err(source) => Err(self.fail(step, source)),
        }
    }

    fn fail(&self, step: PurchaseStep, source: FlowError) -> FlowError {
        FlowError::StepFailed {
            step,
            completed: self.completed.clone(),
            source: Box::new(source),
        }
    }
}

/// Purchase orchestrator
pub struct MarketplaceService {
    pipeline: Arc<TxPipeline>,
    config: AppConfig,
}

impl MarketplaceService {
    pub fn new(pipeline: Arc<TxPipeline>, config: &AppConfig) -> Self {
        Self {
            pipeline,
            config: config.clone(),
        }
    }

    fn marketplace(&self) -> Result<&str, FlowError> {
        match self.config.contracts.marketplace.as_str() {
            "" => Err(FlowError::NotConfigured("Marketplace")),
            id => Ok(id),
        }
    }

    fn token(&self) -> Result<&str, FlowError> {
        match self.config.contracts.token.as_str() {
            "" => Err(FlowError::NotConfigured("TUR token")),
            id => Ok(id),
        }
    }

    /// TUR the marketplace may burn on behalf of `owner`
    pub async fn allowance(&self, owner: &str) -> Result<Stroops, FlowError> {
        let call = ContractCall::new(
            self.token()?,
            "allowance",
            vec![ScValue::address(owner), ScValue::address(self.marketplace()?)],
        );
        match self.pipeline.read(owner, &call).await? {
            ScValue::Void => Ok(0),
            value => value
                .as_i128()
                .ok_or_else(|| FlowError::Decode(format!("allowance returned {:?}", value))),
        }
    }

    /// Let the marketplace burn up to `amount` TUR; always polled to a terminal status
    pub async fn approve(&self, signer: &Signer<'_>, amount: Stroops, mode: PurchaseMode) -> Result<SubmittedTx, FlowError> {
        let call = ContractCall::new(
            self.token()?,
            "approve",
            vec![
                ScValue::address(signer.address()),
                ScValue::address(self.marketplace()?),
                ScValue::i128(amount),
            ],
        );
        info!("[MARKET] Approving {} TUR for the marketplace", format_stroops(amount));
        self.pipeline
            .invoke_confirmed(signer, &call, label(mode, PurchaseStep::Approve))
            .await
    }

    /// Buy `product_id`, returning the hashes of every submitted step
    pub async fn try_purchase(
        &self,
        session: &WalletSession,
        product_id: u32,
        mode: PurchaseMode,
        balances: &Balances,
    ) -> Result<Vec<String>, FlowError> {
        let product = catalog::product(product_id).ok_or(FlowError::UnknownProduct(product_id))?;
        let signer = session.signer()?;
        let marketplace = self.marketplace()?;
        if mode == PurchaseMode::Discounted {
            self.token()?;
        }
        ensure_affordable(product, mode, balances)?;

        let seller = self.config.seller_address(product);
        let buyer = signer.address();
        let native = mode.native_amount(product);
        let tokens = mode.token_amount(product);
        info!(
            "[MARKET] {} buying '{}' from {} for {} XLM + {} TUR",
            buyer,
            product.name,
            product.seller_name,
            format_stroops(native),
            format_stroops(tokens)
        );

        let mut chain = StepChain::new(mode);

        let call = match mode {
            PurchaseMode::Full => ContractCall::new(
                marketplace,
                "purchase_with_xlm",
                vec![ScValue::address(buyer), ScValue::address(seller), ScValue::i128(native)],
            ),
            PurchaseMode::Discounted => {
                let allowance = self
                    .allowance(buyer)
                    .await
                    .map_err(|e| chain.fail(PurchaseStep::Approve, e))?;
                if allowance < tokens {
                    info!(
                        "[MARKET] Allowance {} TUR below {} TUR, approving first",
                        format_stroops(allowance),
                        format_stroops(tokens)
                    );
                    let approved = self.approve(&signer, tokens, mode).await;
                    chain.record(PurchaseStep::Approve, approved)?;
                }
                ContractCall::new(
                    marketplace,
                    "purchase_with_discount",
                    vec![
                        ScValue::address(buyer),
                        ScValue::address(seller),
                        ScValue::i128(native),
                        ScValue::i128(tokens),
                    ],
                )
            }
        };

        let called = self
            .pipeline
            .invoke(&signer, &call, label(mode, PurchaseStep::ContractCall))
            .await;
        chain.record(PurchaseStep::ContractCall, called)?;

        let paid = self
            .pipeline
            .pay(&signer, seller, native, label(mode, PurchaseStep::Payment))
            .await;
        chain.record(PurchaseStep::Payment, paid)?;

        if mode == PurchaseMode::Discounted {
            let burn = ContractCall::new(
                self.token()?,
                "burn",
                vec![ScValue::address(buyer), ScValue::i128(tokens)],
            );
            let burned = self
                .pipeline
                .invoke(&signer, &burn, label(mode, PurchaseStep::Burn))
                .await;
            chain.record(PurchaseStep::Burn, burned)?;
        }

        Ok(chain.completed)
    }

    /// Boundary form of [`try_purchase`](Self::try_purchase); never fails
    pub async fn purchase(
        &self,
        session: &WalletSession,
        product_id: u32,
        mode: PurchaseMode,
        balances: &Balances,
    ) -> TxOutcome {
        match self.try_purchase(session, product_id, mode, balances).await {
            Ok(hashes) => {
                info!("[MARKET] 🎉 Purchase of product {} completed ({} submissions)", product_id, hashes.len());
                TxOutcome::ok(hashes)
            }
            Err(e) => {
                if e.is_local() {
                    warn!("[MARKET] Purchase refused: {}", e);
                } else {
                    error!("[MARKET] ❌ Purchase failed: {}", e);
                    if let FlowError::StepFailed { completed, .. } = &e {
                        if !completed.is_empty() {
                            warn!("[MARKET] ⚠️ Earlier steps already submitted: {:?}", completed);
                        }
                    }
                }
                TxOutcome::failed(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::whole;

    #[test]
    fn test_affordability() {
        let tour = catalog::product(1).unwrap();
        let rich = Balances { native: whole(100), token: whole(10_000) };
        assert!(ensure_affordable(tour, PurchaseMode::Full, &rich).is_ok());
        assert!(ensure_affordable(tour, PurchaseMode::Discounted, &rich).is_ok());

        let no_tokens = Balances { native: whole(100), token: whole(10) };
        assert!(ensure_affordable(tour, PurchaseMode::Full, &no_tokens).is_ok());
        match ensure_affordable(tour, PurchaseMode::Discounted, &no_tokens) {
            Err(FlowError::InsufficientBalance { asset, required, available }) => {
                assert_eq!(asset, "TUR");
                assert_eq!(required, whole(5000));
                assert_eq!(available, whole(10));
            }
            other => panic!("unexpected {:?}", other),
        }

        // 30 XLM covers the discounted price but not the full one
        let thirty = Balances { native: whole(30), token: whole(5000) };
        assert!(ensure_affordable(tour, PurchaseMode::Discounted, &thirty).is_ok());
        assert!(matches!(
            ensure_affordable(tour, PurchaseMode::Full, &thirty),
            Err(FlowError::InsufficientBalance { asset: "XLM", .. })
        ));
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(label(PurchaseMode::Full, PurchaseStep::Payment), StepLabel::new("purchase_full", "payment"));
        assert_eq!(
            label(PurchaseMode::Discounted, PurchaseStep::Burn),
            StepLabel::new("purchase_discount", "burn")
        );
    }

    #[test]
    fn test_chain_reports_completed_steps() {
        use crate::storage::SubmissionStatus;
        let mut chain = StepChain::new(PurchaseMode::Discounted);
        let ok = |hash: &str| Ok(SubmittedTx { hash: hash.to_string(), status: SubmissionStatus::Success });
        chain.record(PurchaseStep::ContractCall, ok("h1")).unwrap();
        chain.record(PurchaseStep::Payment, ok("h2")).unwrap();

        let err = chain
            .record(PurchaseStep::Burn, Err(FlowError::Simulation("HostError".into())))
            .unwrap_err();
        let outcome = TxOutcome::failed(&err);
        assert_eq!(outcome.failed_step, Some(PurchaseStep::Burn));
        assert_eq!(outcome.tx_hashes, vec!["h1".to_string(), "h2".to_string()]);
    }
}

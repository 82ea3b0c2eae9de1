//! Transaction pipeline shared by every ledger-writing flow.
//!
//! Each submission runs the same protocol: fetch the source account, build
//! an envelope, simulate it (contract calls only), have the wallet sign it,
//! submit, then confirm according to a [`ConfirmationPolicy`]. Every step
//! maps its failure into the [`FlowError`] taxonomy so orchestrators never
//! see raw transport errors.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::FlowError;
use crate::ledger::{
    assemble, Account, LedgerRpc, Operation, ScValue, SendStatus, SimulationResult,
    TransactionBuilder, TransactionEnvelope, TransactionStatus,
};
use crate::storage::{StorageChannel, SubmissionRecord, SubmissionStatus};
use crate::types::Stroops;
use crate::wallet::Signer;

// =============================================================================
// POLICIES & REQUESTS
// =============================================================================

/// How a submitted transaction is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// Query the ledger until a terminal status, at most `attempts` times
    Poll { attempts: u32, interval: Duration },
    /// Wait a fixed delay and report success without confirmation
    Delay(Duration),
}

/// Contract invocation request
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub contract: String,
    pub function: &'static str,
    pub args: Vec<ScValue>,
}

impl ContractCall {
    pub fn new(contract: &str, function: &'static str, args: Vec<ScValue>) -> Self {
        Self {
            contract: contract.to_string(),
            function,
            args,
        }
    }

    fn operation(&self) -> Operation {
        Operation::invoke(&self.contract, self.function, self.args.clone())
    }
}

/// Journal label of a submission: which flow, which step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLabel {
    pub flow: &'static str,
    pub step: &'static str,
}

impl StepLabel {
    pub const fn new(flow: &'static str, step: &'static str) -> Self {
        Self { flow, step }
    }
}

/// A submission accepted by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub hash: String,
    /// `Success` when confirmed, `Assumed` when only the delay elapsed
    pub status: SubmissionStatus,
}

impl SubmittedTx {
    pub fn is_confirmed(&self) -> bool {
        self.status == SubmissionStatus::Success
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Drives the fetch → build → simulate → sign → submit → confirm protocol
pub struct TxPipeline {
    ledger: Arc<dyn LedgerRpc>,
    network_passphrase: String,
    base_fee: u32,
    timeout: Duration,
    confirmation: ConfirmationPolicy,
    polling: ConfirmationPolicy,
    journal: Option<StorageChannel>,
}

impl TxPipeline {
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: &AppConfig) -> Self {
        Self {
            ledger,
            network_passphrase: config.network_passphrase().to_string(),
            base_fee: crate::config::BASE_FEE,
            timeout: Duration::from_secs(crate::config::TX_TIMEOUT_SECS),
            confirmation: config.confirmation_policy(),
            polling: config.polling_policy(),
            journal: None,
        }
    }

    /// Record every submission in the local journal
    pub fn with_journal(mut self, journal: StorageChannel) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Override the confirmation policies (ordinary, always-polled)
    pub fn with_policies(mut self, confirmation: ConfirmationPolicy, polling: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self.polling = polling;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerRpc> {
        &self.ledger
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    /// Invoke a contract, confirming with the configured policy
    pub async fn invoke(
        &self,
        signer: &Signer<'_>,
        call: &ContractCall,
        label: StepLabel,
    ) -> Result<SubmittedTx, FlowError> {
        self.invoke_with(signer, call, label, self.confirmation).await
    }

    /// Invoke a contract and always poll to a terminal status
    pub async fn invoke_confirmed(
        &self,
        signer: &Signer<'_>,
        call: &ContractCall,
        label: StepLabel,
    ) -> Result<SubmittedTx, FlowError> {
        self.invoke_with(signer, call, label, self.polling).await
    }

    async fn invoke_with(
        &self,
        signer: &Signer<'_>,
        call: &ContractCall,
        label: StepLabel,
        policy: ConfirmationPolicy,
    ) -> Result<SubmittedTx, FlowError> {
        let source = signer.address();
        info!("[LEDGER] {}.{} → {} for {}", label.flow, label.step, call.function, source);

        let account = self.fetch_account(source).await?;
        let envelope = self.build(&account, call.operation())?;
        let simulation = self.simulate(&envelope).await?;
        let prepared = assemble(&envelope, &simulation);
        let signed = signer.sign(&prepared).await?;
        let hash = self.submit(&signed, source, label).await?;
        self.confirm(&hash, policy).await
    }

    /// Native payment; classic operations skip simulation
    pub async fn pay(
        &self,
        signer: &Signer<'_>,
        destination: &str,
        amount: Stroops,
        label: StepLabel,
    ) -> Result<SubmittedTx, FlowError> {
        let source = signer.address();
        info!(
            "[LEDGER] {}.{} → payment {} to {}",
            label.flow,
            label.step,
            crate::types::format_stroops(amount),
            destination
        );

        let account = self.fetch_account(source).await?;
        let envelope = self.build(&account, Operation::native_payment(destination, amount))?;
        let signed = signer.sign(&envelope).await?;
        let hash = self.submit(&signed, source, label).await?;
        self.confirm(&hash, self.confirmation).await
    }

    /// Read-only call: simulate and return the contract's return value
    pub async fn read(&self, source: &str, call: &ContractCall) -> Result<ScValue, FlowError> {
        debug!("[LEDGER] read {} as {}", call.function, source);
        let account = self.fetch_account(source).await?;
        let envelope = self.build(&account, call.operation())?;
        let simulation = self.simulate(&envelope).await?;
        Ok(simulation.retval.unwrap_or(ScValue::Void))
    }

    /// Wait for `hash` according to `policy`, journaling the outcome
    pub async fn confirm(&self, hash: &str, policy: ConfirmationPolicy) -> Result<SubmittedTx, FlowError> {
        match policy {
            ConfirmationPolicy::Delay(delay) => {
                tokio::time::sleep(delay).await;
                warn!("[LEDGER] {} reported successful without confirmation", hash);
                self.journal_status(hash, SubmissionStatus::Assumed, None);
                Ok(SubmittedTx {
                    hash: hash.to_string(),
                    status: SubmissionStatus::Assumed,
                })
            }
            ConfirmationPolicy::Poll { attempts, interval } => {
                let attempts = attempts.max(1);
                for attempt in 1..=attempts {
                    match self.ledger.get_transaction(hash).await {
                        Ok(tx) => match tx.status {
                            TransactionStatus::Success => {
                                info!("[LEDGER] ✅ {} confirmed (attempt {})", hash, attempt);
                                self.journal_status(hash, SubmissionStatus::Success, None);
                                return Ok(SubmittedTx {
                                    hash: hash.to_string(),
                                    status: SubmissionStatus::Success,
                                });
                            }
                            TransactionStatus::Failed => {
                                warn!("[LEDGER] ❌ {} failed on ledger", hash);
                                self.journal_status(hash, SubmissionStatus::Failed, Some("FAILED".to_string()));
                                return Err(FlowError::TransactionFailed { hash: hash.to_string() });
                            }
                            TransactionStatus::NotFound => {
                                debug!("[LEDGER] {} not found yet ({}/{})", hash, attempt, attempts);
                            }
                        },
                        // Transient; the next attempt may succeed
                        Err(e) => warn!("[LEDGER] Status query for {} failed: {:#}", hash, e),
                    }
                    if attempt < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }

                warn!("[LEDGER] ⏱️ {} not confirmed after {} attempts", hash, attempts);
                self.journal_status(hash, SubmissionStatus::Timeout, None);
                Err(FlowError::ConfirmationTimeout {
                    hash: hash.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Query each unsettled journal entry once and record terminal statuses.
    ///
    /// Returns the hashes that reached a terminal status with that status.
    pub async fn reconcile(&self, unsettled: &[SubmissionRecord]) -> Vec<(String, TransactionStatus)> {
        let mut settled = Vec::new();
        for record in unsettled {
            let Some(hash) = record.tx_hash.as_deref() else {
                continue;
            };
            match self.ledger.get_transaction(hash).await {
                Ok(tx) => {
                    let status = match tx.status {
                        TransactionStatus::Success => SubmissionStatus::Success,
                        TransactionStatus::Failed => SubmissionStatus::Failed,
                        TransactionStatus::NotFound => {
                            debug!("[LEDGER] {} still unknown", hash);
                            continue;
                        }
                    };
                    info!("[LEDGER] Reconciled {} ({}.{}) → {}", hash, record.flow, record.step, tx.status);
                    self.journal_status(hash, status, None);
                    settled.push((hash.to_string(), tx.status));
                }
                Err(e) => warn!("[LEDGER] Reconcile query for {} failed: {:#}", hash, e),
            }
        }
        settled
    }

    // === Steps ===

    async fn fetch_account(&self, address: &str) -> Result<Account, FlowError> {
        self.ledger
            .get_account(address)
            .await
            .map_err(|e| FlowError::AccountFetch {
                address: address.to_string(),
                message: format!("{:#}", e),
            })
    }

    fn build(&self, account: &Account, op: Operation) -> Result<TransactionEnvelope, FlowError> {
        TransactionBuilder::new(account, &self.network_passphrase)
            .fee(self.base_fee)
            .timeout(self.timeout)
            .operation(op)
            .build()
            .map_err(|e| FlowError::Submission(format!("Failed to build transaction: {:#}", e)))
    }

    async fn simulate(&self, envelope: &TransactionEnvelope) -> Result<SimulationResult, FlowError> {
        let simulation = self
            .ledger
            .simulate_transaction(envelope)
            .await
            .map_err(|e| FlowError::Simulation(format!("{:#}", e)))?;

        match simulation.error {
            Some(message) => {
                warn!("[LEDGER] Simulation rejected: {}", message);
                Err(FlowError::Simulation(message))
            }
            None => Ok(simulation),
        }
    }

    async fn submit(
        &self,
        signed: &TransactionEnvelope,
        source: &str,
        label: StepLabel,
    ) -> Result<String, FlowError> {
        let result = match self.ledger.send_transaction(signed).await {
            Ok(r) => r,
            Err(e) => {
                let message = format!("{:#}", e);
                self.journal_submission(source, label, None, SubmissionStatus::Failed, Some(message.clone()));
                return Err(FlowError::Submission(message));
            }
        };

        match result.status {
            SendStatus::Pending | SendStatus::Duplicate => {
                info!("[LEDGER] 📤 {}.{} submitted: {}", label.flow, label.step, result.hash);
                self.journal_submission(source, label, Some(&result.hash), SubmissionStatus::Pending, None);
                Ok(result.hash)
            }
            SendStatus::TryAgainLater => {
                let message = "Ledger is busy, try again later".to_string();
                self.journal_submission(source, label, Some(&result.hash), SubmissionStatus::Failed, Some(message.clone()));
                Err(FlowError::Submission(message))
            }
            SendStatus::Error => {
                let message = result
                    .error_result
                    .unwrap_or_else(|| "Transaction rejected".to_string());
                self.journal_submission(source, label, Some(&result.hash), SubmissionStatus::Failed, Some(message.clone()));
                Err(FlowError::Submission(message))
            }
        }
    }

    // === Journal ===

    fn journal_submission(
        &self,
        address: &str,
        label: StepLabel,
        hash: Option<&str>,
        status: SubmissionStatus,
        error: Option<String>,
    ) {
        if let Some(journal) = &self.journal {
            journal.record_submission(SubmissionRecord {
                timestamp_secs: chrono::Utc::now().timestamp(),
                address: address.to_string(),
                flow: label.flow.to_string(),
                step: label.step.to_string(),
                tx_hash: hash.map(str::to_string),
                status,
                error,
            });
        }
    }

    fn journal_status(&self, hash: &str, status: SubmissionStatus, error: Option<String>) {
        if let Some(journal) = &self.journal {
            journal.update_status(hash, status, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountRecord, OperationsPage, SendResult, TransactionInfo};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Ledger that answers `getTransaction` from a script and fails everything else
    struct ScriptedStatus {
        statuses: Mutex<Vec<TransactionStatus>>,
        queries: AtomicU32,
        retval: Option<ScValue>,
    }

    impl ScriptedStatus {
        fn new(statuses: Vec<TransactionStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                queries: AtomicU32::new(0),
                retval: None,
            }
        }
    }

    #[async_trait]
    impl LedgerRpc for ScriptedStatus {
        async fn get_account(&self, address: &str) -> Result<Account> {
            Ok(Account { id: address.to_string(), sequence: 1 })
        }

        async fn simulate_transaction(&self, _envelope: &TransactionEnvelope) -> Result<SimulationResult> {
            Ok(SimulationResult { retval: self.retval.clone(), ..Default::default() })
        }

        async fn send_transaction(&self, _envelope: &TransactionEnvelope) -> Result<SendResult> {
            anyhow::bail!("not scripted")
        }

        async fn get_transaction(&self, _hash: &str) -> Result<TransactionInfo> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 { statuses.remove(0) } else { statuses[0] };
            Ok(TransactionInfo { status, ledger: None, return_value: None })
        }

        async fn load_account(&self, _address: &str) -> Result<AccountRecord> {
            anyhow::bail!("not scripted")
        }

        async fn account_operations(&self, _address: &str, _cursor: Option<&str>, _limit: u32) -> Result<OperationsPage> {
            anyhow::bail!("not scripted")
        }
    }

    fn pipeline(ledger: Arc<ScriptedStatus>) -> TxPipeline {
        TxPipeline::new(ledger, &AppConfig::default())
    }

    fn poll(attempts: u32) -> ConfirmationPolicy {
        ConfirmationPolicy::Poll { attempts, interval: Duration::from_millis(1000) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_success() {
        use TransactionStatus::*;
        let ledger = Arc::new(ScriptedStatus::new(vec![NotFound, NotFound, Success]));
        let tx = pipeline(ledger.clone()).confirm("h1", poll(5)).await.unwrap();
        assert!(tx.is_confirmed());
        assert_eq!(ledger.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reports_failure() {
        let ledger = Arc::new(ScriptedStatus::new(vec![TransactionStatus::Failed]));
        let err = pipeline(ledger).confirm("h1", poll(5)).await.unwrap_err();
        assert!(matches!(err, FlowError::TransactionFailed { ref hash } if hash == "h1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_after_bounded_attempts() {
        let ledger = Arc::new(ScriptedStatus::new(vec![TransactionStatus::NotFound]));
        let err = pipeline(ledger.clone()).confirm("h1", poll(4)).await.unwrap_err();
        assert!(matches!(err, FlowError::ConfirmationTimeout { attempts: 4, .. }));
        assert_eq!(ledger.queries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_policy_never_queries() {
        let ledger = Arc::new(ScriptedStatus::new(vec![TransactionStatus::NotFound]));
        let tx = pipeline(ledger.clone())
            .confirm("h1", ConfirmationPolicy::Delay(Duration::from_secs(3)))
            .await
            .unwrap();
        assert_eq!(tx.status, SubmissionStatus::Assumed);
        assert!(!tx.is_confirmed());
        assert_eq!(ledger.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_defaults_to_void() {
        let ledger = Arc::new(ScriptedStatus::new(vec![TransactionStatus::NotFound]));
        let call = ContractCall::new("CTOKEN", "balance", vec![ScValue::address("GA")]);
        assert_eq!(pipeline(ledger).read("GA", &call).await.unwrap(), ScValue::Void);
    }

    #[tokio::test]
    async fn test_reconcile_skips_unknown() {
        use TransactionStatus::*;
        let ledger = Arc::new(ScriptedStatus::new(vec![Success, NotFound]));
        let record = |hash: Option<&str>| SubmissionRecord {
            timestamp_secs: 0,
            address: "GA".into(),
            flow: "purchase_discount".into(),
            step: "burn".into(),
            tx_hash: hash.map(str::to_string),
            status: SubmissionStatus::Pending,
            error: None,
        };
        let settled = pipeline(ledger)
            .reconcile(&[record(Some("h1")), record(None), record(Some("h2"))])
            .await;
        assert_eq!(settled, vec![("h1".to_string(), Success)]);
    }
}

//! Error taxonomy for orchestrated flows and the uniform outcome type.

use serde::Serialize;
use thiserror::Error;

use crate::types::{format_stroops, Stroops};

fn amount(v: &Stroops) -> String {
    format_stroops(*v)
}

/// Step of a compound purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStep {
    Approve,
    ContractCall,
    Payment,
    Burn,
}

impl PurchaseStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStep::Approve => "approve",
            PurchaseStep::ContractCall => "contract_call",
            PurchaseStep::Payment => "payment",
            PurchaseStep::Burn => "burn",
        }
    }
}

impl std::fmt::Display for PurchaseStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Too far from place {place_id}: {distance_m:.0} m away, must be within {radius_m:.0} m")]
    OutOfRange {
        place_id: u32,
        distance_m: f64,
        radius_m: f64,
    },

    #[error("Failed to fetch account {address}: {message}")]
    AccountFetch { address: String, message: String },

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Transaction {hash} failed on ledger")]
    TransactionFailed { hash: String },

    #[error("Transaction {hash} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { hash: String, attempts: u32 },

    #[error("Insufficient {asset} balance: need {}, have {}", amount(.required), amount(.available))]
    InsufficientBalance {
        asset: &'static str,
        required: Stroops,
        available: Stroops,
    },

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("{0} contract not configured")]
    NotConfigured(&'static str),

    #[error("Unknown place {0}")]
    UnknownPlace(u32),

    #[error("Unknown product {0}")]
    UnknownProduct(u32),

    #[error("Check-in already in progress for place {0}")]
    CheckinInFlight(u32),

    #[error("Already checked in at place {0}")]
    AlreadyCheckedIn(u32),

    #[error("Unexpected contract response: {0}")]
    Decode(String),

    #[error("Purchase step '{step}' failed: {source}")]
    StepFailed {
        step: PurchaseStep,
        /// Hashes of steps that were already submitted before the failure
        completed: Vec<String>,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Innermost error, looking through `StepFailed`
    pub fn root(&self) -> &FlowError {
        match self {
            FlowError::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the flow stopped before anything was submitted
    pub fn is_local(&self) -> bool {
        matches!(
            self.root(),
            FlowError::LocationUnavailable(_)
                | FlowError::OutOfRange { .. }
                | FlowError::InsufficientBalance { .. }
                | FlowError::WalletNotConnected
                | FlowError::NotConfigured(_)
                | FlowError::UnknownPlace(_)
                | FlowError::UnknownProduct(_)
                | FlowError::CheckinInFlight(_)
                | FlowError::AlreadyCheckedIn(_)
        )
    }
}

/// Uniform result handed back across the orchestrator boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TxOutcome {
    pub success: bool,
    /// Submission ids, in submission order
    pub tx_hashes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<PurchaseStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TxOutcome {
    pub fn ok(tx_hashes: Vec<String>) -> Self {
        Self {
            success: true,
            tx_hashes,
            failed_step: None,
            error: None,
        }
    }

    pub fn failed(err: &FlowError) -> Self {
        let (failed_step, tx_hashes) = match err {
            FlowError::StepFailed { step, completed, .. } => (Some(*step), completed.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            success: false,
            tx_hashes,
            failed_step,
            error: Some(err.to_string()),
        }
    }
}

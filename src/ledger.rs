//! Transaction envelope model and the remote ledger interface.
//!
//! The envelope is built here, carried opaquely through simulation, signing
//! and submission, and only ever inspected by the builder and `assemble`.
//! Wire types mirror the shapes returned by Soroban RPC and Horizon.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::{format_stroops, Stroops};

// === Contract values ===

/// 128-bit integer split into high/low halves, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Int128Parts {
    pub hi: i64,
    pub lo: u64,
}

impl From<i128> for Int128Parts {
    fn from(v: i128) -> Self {
        Self {
            hi: (v >> 64) as i64,
            lo: v as u64,
        }
    }
}

impl From<Int128Parts> for i128 {
    fn from(p: Int128Parts) -> Self {
        ((p.hi as i128) << 64) | p.lo as i128
    }
}

/// Key/value pair inside an `ScValue::Map`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScMapEntry {
    pub key: ScValue,
    pub val: ScValue,
}

/// Typed contract argument / return value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScValue {
    Void,
    Bool(bool),
    U32(u32),
    I64(i64),
    U64(u64),
    I128(Int128Parts),
    String(String),
    Symbol(String),
    Address(String),
    Vec(Vec<ScValue>),
    Map(Vec<ScMapEntry>),
}

impl ScValue {
    pub fn address(a: impl Into<String>) -> Self {
        ScValue::Address(a.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        ScValue::String(s.into())
    }

    pub fn i128(v: i128) -> Self {
        ScValue::I128(v.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ScValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ScValue::U64(v) => Some(*v),
            ScValue::U32(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            ScValue::I128(p) => Some((*p).into()),
            ScValue::I64(v) => Some(*v as i128),
            ScValue::U64(v) => Some(*v as i128),
            ScValue::U32(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// String-like payload (string, symbol or address)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScValue::String(s) | ScValue::Symbol(s) | ScValue::Address(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vec(&self) -> Option<&[ScValue]> {
        match self {
            ScValue::Vec(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a struct field in a symbol-keyed map
    pub fn field(&self, name: &str) -> Option<&ScValue> {
        match self {
            ScValue::Map(entries) => entries
                .iter()
                .find(|e| e.key.as_str() == Some(name))
                .map(|e| &e.val),
            _ => None,
        }
    }
}

// === Operations & envelope ===

/// Asset moved by a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    Native,
}

/// Single operation carried by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    InvokeContract {
        contract: String,
        function: String,
        args: Vec<ScValue>,
    },
    Payment {
        destination: String,
        asset: Asset,
        /// Decimal amount in whole units ("50", "12.5")
        amount: String,
    },
}

impl Operation {
    pub fn invoke(contract: &str, function: &str, args: Vec<ScValue>) -> Self {
        Operation::InvokeContract {
            contract: contract.to_string(),
            function: function.to_string(),
            args,
        }
    }

    pub fn native_payment(destination: &str, amount: Stroops) -> Self {
        Operation::Payment {
            destination: destination.to_string(),
            asset: Asset::Native,
            amount: format_stroops(amount),
        }
    }
}

/// Validity window in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

/// Resource footprint and authorization attached after simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SorobanData {
    pub transaction_data: String,
    #[serde(default)]
    pub auth: Vec<String>,
    pub resource_fee: u64,
}

/// Signature attached by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub hint: String,
    pub signature: String,
}

/// Serialized, signable representation of a pending transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub source: String,
    pub sequence: i64,
    pub fee: u64,
    pub network_passphrase: String,
    pub time_bounds: TimeBounds,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soroban_data: Option<SorobanData>,
    #[serde(default)]
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    /// Encode to the base64 wire form handed to wallets and the RPC node
    pub fn encode(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).context("Failed to serialize envelope")?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Envelope is not valid base64")?;
        serde_json::from_slice(&bytes).context("Envelope payload is malformed")
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }
}

/// Builder for unsigned envelopes
pub struct TransactionBuilder {
    source: String,
    sequence: i64,
    network_passphrase: String,
    fee: u64,
    timeout: Duration,
    operations: Vec<Operation>,
}

impl TransactionBuilder {
    pub fn new(account: &Account, network_passphrase: &str) -> Self {
        Self {
            source: account.id.clone(),
            sequence: account.sequence.saturating_add(1),
            network_passphrase: network_passphrase.to_string(),
            fee: crate::config::BASE_FEE as u64,
            timeout: Duration::from_secs(crate::config::TX_TIMEOUT_SECS),
            operations: Vec::with_capacity(1),
        }
    }

    pub fn fee(mut self, fee: u32) -> Self {
        self.fee = fee as u64;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn build(self) -> Result<TransactionEnvelope> {
        anyhow::ensure!(!self.operations.is_empty(), "Transaction has no operations");
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(TransactionEnvelope {
            source: self.source,
            sequence: self.sequence,
            fee: self.fee * self.operations.len() as u64,
            network_passphrase: self.network_passphrase,
            time_bounds: TimeBounds {
                min_time: 0,
                max_time: now + self.timeout.as_secs(),
            },
            operations: self.operations,
            soroban_data: None,
            signatures: Vec::new(),
        })
    }
}

// === RPC wire types ===

mod string_i64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
        }
        match Raw::deserialize(d)? {
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

/// Account state needed to build a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(with = "string_i64")]
    pub sequence: i64,
}

/// Dry-run result of a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retval: Option<ScValue>,
    #[serde(default)]
    pub transaction_data: Option<String>,
    #[serde(default)]
    pub auth: Vec<String>,
    #[serde(default)]
    pub min_resource_fee: u64,
    #[serde(default)]
    pub latest_ledger: u32,
}

/// Attach simulation results (resource fee, footprint, auth) to an envelope.
pub fn assemble(envelope: &TransactionEnvelope, sim: &SimulationResult) -> TransactionEnvelope {
    let mut prepared = envelope.clone();
    if let Some(data) = &sim.transaction_data {
        prepared.fee = envelope.fee + sim.min_resource_fee;
        prepared.soroban_data = Some(SorobanData {
            transaction_data: data.clone(),
            auth: sim.auth.clone(),
            resource_fee: sim.min_resource_fee,
        });
    }
    prepared
}

/// Immediate response of `sendTransaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Pending,
    Duplicate,
    TryAgainLater,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub hash: String,
    pub status: SendStatus,
    #[serde(default)]
    pub error_result: Option<String>,
}

/// Status reported by `getTransaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Failed,
    NotFound,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Success => write!(f, "SUCCESS"),
            TransactionStatus::Failed => write!(f, "FAILED"),
            TransactionStatus::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub status: TransactionStatus,
    #[serde(default)]
    pub ledger: Option<u32>,
    #[serde(default)]
    pub return_value: Option<ScValue>,
}

// === Horizon wire types ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLine {
    pub asset_type: String,
    pub balance: String,
}

/// Account as returned by Horizon `GET /accounts/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(with = "string_i64")]
    pub sequence: i64,
    #[serde(default)]
    pub balances: Vec<BalanceLine>,
}

impl AccountRecord {
    pub fn native_balance(&self) -> Option<&str> {
        self.balances
            .iter()
            .find(|b| b.asset_type == "native")
            .map(|b| b.balance.as_str())
    }
}

/// Historical operation as returned by Horizon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub paging_token: String,
    pub transaction_hash: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

/// One page of operations, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationsPage {
    pub records: Vec<OperationRecord>,
    /// Cursor for the next (older) page, `None` when exhausted
    pub next_cursor: Option<String>,
}

// === Ledger interface ===

/// Remote ledger capabilities consumed by the client
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Source account and sequence for transaction building
    async fn get_account(&self, address: &str) -> Result<Account>;

    async fn simulate_transaction(&self, envelope: &TransactionEnvelope) -> Result<SimulationResult>;

    async fn send_transaction(&self, envelope: &TransactionEnvelope) -> Result<SendResult>;

    async fn get_transaction(&self, hash: &str) -> Result<TransactionInfo>;

    /// Legacy balance endpoint (Horizon account)
    async fn load_account(&self, address: &str) -> Result<AccountRecord>;

    /// Operations touching `address`, newest first
    async fn account_operations(
        &self,
        address: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<OperationsPage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: "GBUYER".to_string(),
            sequence: 41,
        }
    }

    #[test]
    fn test_i128_parts() {
        for v in [0i128, 1, -1, 50_000_000_000, i128::MAX, i128::MIN, -(1i128 << 70)] {
            let parts = Int128Parts::from(v);
            assert_eq!(i128::from(parts), v);
        }
        assert_eq!(Int128Parts::from(5i128), Int128Parts { hi: 0, lo: 5 });
        assert_eq!(Int128Parts::from(-1i128), Int128Parts { hi: -1, lo: u64::MAX });
    }

    #[test]
    fn test_builder_sequence_fee_and_window() {
        let env = TransactionBuilder::new(&account(), crate::config::TESTNET_PASSPHRASE)
            .operation(Operation::invoke("CCONTRACT", "balance", vec![ScValue::address("GBUYER")]))
            .build()
            .unwrap();

        assert_eq!(env.sequence, 42);
        assert_eq!(env.fee, 100);
        assert_eq!(env.source, "GBUYER");
        assert!(env.time_bounds.max_time > 0);
        assert!(env.soroban_data.is_none());
        assert!(!env.is_signed());
    }

    #[test]
    fn test_builder_rejects_empty() {
        assert!(TransactionBuilder::new(&account(), "net").build().is_err());
    }

    #[test]
    fn test_envelope_encoding() {
        let env = TransactionBuilder::new(&account(), "net")
            .operation(Operation::native_payment("GSELLER", 125_000_000))
            .build()
            .unwrap();
        let encoded = env.encode().unwrap();
        assert_eq!(TransactionEnvelope::decode(&encoded).unwrap(), env);
        assert!(TransactionEnvelope::decode("not base64!").is_err());
    }

    #[test]
    fn test_payment_amount_is_decimal_string() {
        match Operation::native_payment("GSELLER", 125_000_000) {
            Operation::Payment { amount, .. } => assert_eq!(amount, "12.5"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assemble_adds_resource_fee() {
        let env = TransactionBuilder::new(&account(), "net")
            .operation(Operation::invoke("C", "mint", vec![]))
            .build()
            .unwrap();
        let sim = SimulationResult {
            transaction_data: Some("AAAA".to_string()),
            auth: vec!["auth-entry".to_string()],
            min_resource_fee: 5_000,
            ..Default::default()
        };
        let prepared = assemble(&env, &sim);
        assert_eq!(prepared.fee, 5_100);
        let data = prepared.soroban_data.expect("soroban data");
        assert_eq!(data.auth, vec!["auth-entry".to_string()]);
        assert_eq!(data.resource_fee, 5_000);
    }

    #[test]
    fn test_scvalue_wire_shape() {
        let v: ScValue = serde_json::from_str(r#"{"type":"i128","value":{"hi":0,"lo":10000000000}}"#).unwrap();
        assert_eq!(v.as_i128(), Some(10_000_000_000));

        let b: ScValue = serde_json::from_str(r#"{"type":"bool","value":true}"#).unwrap();
        assert_eq!(b.as_bool(), Some(true));
    }

    #[test]
    fn test_struct_field_lookup() {
        let v = ScValue::Map(vec![
            ScMapEntry { key: ScValue::Symbol("place_id".into()), val: ScValue::U32(2) },
            ScMapEntry { key: ScValue::Symbol("owner".into()), val: ScValue::address("GOWNER") },
        ]);
        assert_eq!(v.field("place_id").and_then(ScValue::as_u32), Some(2));
        assert_eq!(v.field("owner").and_then(ScValue::as_str), Some("GOWNER"));
        assert!(v.field("missing").is_none());
    }

    #[test]
    fn test_horizon_account_parsing() {
        let json = r#"{
            "id": "GBUYER",
            "sequence": "123456789",
            "balances": [
                {"asset_type": "credit_alphanum4", "balance": "5.0000000"},
                {"asset_type": "native", "balance": "9999.5000000"}
            ]
        }"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.sequence, 123_456_789);
        assert_eq!(record.native_balance(), Some("9999.5000000"));
    }

    #[test]
    fn test_send_status_wire_names() {
        let r: SendResult = serde_json::from_str(r#"{"hash":"abc","status":"TRY_AGAIN_LATER"}"#).unwrap();
        assert_eq!(r.status, SendStatus::TryAgainLater);
        let t: TransactionInfo = serde_json::from_str(r#"{"status":"NOT_FOUND"}"#).unwrap();
        assert_eq!(t.status, TransactionStatus::NotFound);
    }
}

//! Wallet session: connection lifecycle, persisted state and signing.
//!
//! The session is an explicit object with a clear lifecycle (`create`,
//! `restore`, `connect`, `disconnect`, `logout`) handed by reference to the
//! services that need an address or a signature. Persisted state under
//! `walletConnected` / `walletAddress` always mirrors the in-memory state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{HTTP_TIMEOUT_SECS, SESSION_ADDRESS_KEY, SESSION_CONNECTED_KEY};
use crate::error::FlowError;
use crate::ledger::TransactionEnvelope;
use crate::storage::KeyValueStore;

/// Wallet chosen by the user in the selection dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOption {
    pub id: String,
    pub name: String,
}

/// Network context for a signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    pub address: String,
    pub network_passphrase: String,
}

/// External wallet capabilities: selection, address lookup, signing
#[async_trait]
pub trait WalletKit: Send + Sync {
    async fn select_wallet(&self) -> Result<WalletOption>;

    async fn get_address(&self, wallet: &WalletOption) -> Result<String>;

    /// Sign a base64 envelope, returning the signed base64 envelope
    async fn sign_transaction(&self, envelope: &str, opts: &SignOptions) -> Result<String>;
}

// =============================================================================
// HTTP WALLET BRIDGE
// =============================================================================

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    xdr: &'a str,
    #[serde(flatten)]
    opts: &'a SignOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_tx_xdr: String,
}

/// Wallet kit backed by a local signer bridge over HTTP
pub struct HttpWalletBridge {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWalletBridge {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build wallet bridge client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Wallet bridge unreachable at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Wallet bridge returned {}: {}", status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Malformed wallet bridge response from {}", path))
    }
}

#[async_trait]
impl WalletKit for HttpWalletBridge {
    async fn select_wallet(&self) -> Result<WalletOption> {
        self.post("/wallets/select", &serde_json::json!({})).await
    }

    async fn get_address(&self, wallet: &WalletOption) -> Result<String> {
        let response: AddressResponse = self
            .post(&format!("/wallets/{}/address", wallet.id), &serde_json::json!({}))
            .await?;
        Ok(response.address)
    }

    async fn sign_transaction(&self, envelope: &str, opts: &SignOptions) -> Result<String> {
        let response: SignResponse = self
            .post("/sign", &SignRequest { xdr: envelope, opts })
            .await?;
        Ok(response.signed_tx_xdr)
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Connection state of the user's wallet
pub struct WalletSession {
    kit: Arc<dyn WalletKit>,
    store: Box<dyn KeyValueStore>,
    address: Option<String>,
    connected: bool,
    loading: bool,
    network_passphrase: String,
}

impl WalletSession {
    /// Fresh, disconnected session
    pub fn create(kit: Arc<dyn WalletKit>, store: Box<dyn KeyValueStore>, network_passphrase: &str) -> Self {
        Self {
            kit,
            store,
            address: None,
            connected: false,
            loading: false,
            network_passphrase: network_passphrase.to_string(),
        }
    }

    /// Session restored from persisted state, without prompting the wallet.
    ///
    /// The persisted address is trusted as-is; it is not re-verified.
    pub fn restore(kit: Arc<dyn WalletKit>, store: Box<dyn KeyValueStore>, network_passphrase: &str) -> Self {
        let mut session = Self::create(kit, store, network_passphrase);

        let was_connected = session.store.get(SESSION_CONNECTED_KEY);
        let saved_address = session.store.get(SESSION_ADDRESS_KEY);
        match (was_connected, saved_address) {
            (Ok(Some(flag)), Ok(Some(address))) if flag == "true" && !address.is_empty() => {
                info!("[WALLET] Restored session for {}", address);
                session.address = Some(address);
                session.connected = true;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("[WALLET] Could not read persisted session: {:#}", e);
            }
            _ => {}
        }
        session
    }

    /// Select a wallet, fetch its address and persist the connection.
    ///
    /// If the wallet fails, the previous state is kept untouched. If persisting
    /// fails, both storage and memory end up disconnected.
    pub async fn connect(&mut self) -> Result<String> {
        self.loading = true;
        let selected = self.select_address().await;
        self.loading = false;

        let address = match selected {
            Ok(address) => address,
            Err(e) => {
                warn!("[WALLET] Connect failed: {:#}", e);
                return Err(e);
            }
        };

        if let Err(e) = self.persist(&address) {
            warn!("[WALLET] Could not persist session: {:#}", e);
            // Storage may hold a half-written pair; memory must match it
            let _ = self.clear_persisted();
            self.address = None;
            self.connected = false;
            return Err(e);
        }

        info!("[WALLET] Connected {}", address);
        self.address = Some(address.clone());
        self.connected = true;
        Ok(address)
    }

    async fn select_address(&self) -> Result<String> {
        let wallet = self.kit.select_wallet().await.context("Wallet selection failed")?;
        info!("[WALLET] Selected {} ({})", wallet.name, wallet.id);

        let address = self
            .kit
            .get_address(&wallet)
            .await
            .context("Error getting address from wallet")?;
        anyhow::ensure!(!address.is_empty(), "Wallet returned an empty address");
        Ok(address)
    }

    fn persist(&self, address: &str) -> Result<()> {
        self.store
            .set(SESSION_CONNECTED_KEY, "true")
            .context("Failed to persist session")?;
        self.store
            .set(SESSION_ADDRESS_KEY, address)
            .context("Failed to persist session")?;
        Ok(())
    }

    fn clear_persisted(&self) -> Result<()> {
        self.store.remove(SESSION_CONNECTED_KEY)?;
        self.store.remove(SESSION_ADDRESS_KEY)?;
        Ok(())
    }

    /// Clear in-memory and persisted state; idempotent
    pub fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            info!("[WALLET] Disconnected {}", self.address.as_deref().unwrap_or_default());
        }
        self.address = None;
        self.connected = false;
        self.clear_persisted().context("Failed to clear persisted session")
    }

    /// Destroy the session, clearing persisted state
    pub fn logout(mut self) -> Result<()> {
        self.disconnect()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    /// Address of a connected session, or `WalletNotConnected`
    pub fn require_address(&self) -> Result<&str, FlowError> {
        match (&self.address, self.connected) {
            (Some(address), true) => Ok(address),
            _ => Err(FlowError::WalletNotConnected),
        }
    }

    /// Signing handle for the connected address
    pub fn signer(&self) -> Result<Signer<'_>, FlowError> {
        let address = self.require_address()?;
        Ok(Signer {
            kit: self.kit.as_ref(),
            address,
            network_passphrase: &self.network_passphrase,
        })
    }
}

/// Opaque signing capability borrowed from a connected session
pub struct Signer<'a> {
    kit: &'a dyn WalletKit,
    address: &'a str,
    network_passphrase: &'a str,
}

impl Signer<'_> {
    pub fn address(&self) -> &str {
        self.address
    }

    /// Ask the wallet to sign; cancellation or wallet failure is a `Signing` error
    pub async fn sign(&self, envelope: &TransactionEnvelope) -> Result<TransactionEnvelope, FlowError> {
        let encoded = envelope
            .encode()
            .map_err(|e| FlowError::Signing(format!("{:#}", e)))?;
        let opts = SignOptions {
            address: self.address.to_string(),
            network_passphrase: self.network_passphrase.to_string(),
        };

        let signed = self
            .kit
            .sign_transaction(&encoded, &opts)
            .await
            .map_err(|e| FlowError::Signing(format!("{:#}", e)))?;

        TransactionEnvelope::decode(&signed)
            .map_err(|e| FlowError::Signing(format!("Wallet returned an invalid envelope: {:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Account, DecoratedSignature, Operation, TransactionBuilder};
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeKit {
        address: Option<&'static str>,
    }

    #[async_trait]
    impl WalletKit for FakeKit {
        async fn select_wallet(&self) -> Result<WalletOption> {
            Ok(WalletOption { id: "freighter".into(), name: "Freighter".into() })
        }

        async fn get_address(&self, _wallet: &WalletOption) -> Result<String> {
            self.address
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("user rejected"))
        }

        async fn sign_transaction(&self, envelope: &str, opts: &SignOptions) -> Result<String> {
            let mut env = TransactionEnvelope::decode(envelope)?;
            env.signatures.push(DecoratedSignature {
                hint: opts.address.clone(),
                signature: "sig".into(),
            });
            env.encode()
        }
    }

    /// Store that accepts reads and rejects writes
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("disk full")
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn kit(address: Option<&'static str>) -> Arc<dyn WalletKit> {
        Arc::new(FakeKit { address })
    }

    #[tokio::test]
    async fn test_connect_persists_and_restores() {
        let store = Arc::new(MemoryStore::new());
        let mut session = WalletSession::create(kit(Some("GABC")), Box::new(store.clone()), "net");
        assert!(!session.is_connected());

        session.connect().await.unwrap();
        assert!(session.is_connected());
        assert!(!session.is_loading());
        assert_eq!(store.get(SESSION_CONNECTED_KEY).unwrap().as_deref(), Some("true"));

        let restored = WalletSession::restore(kit(None), Box::new(store.clone()), "net");
        assert!(restored.is_connected());
        assert_eq!(restored.address(), Some("GABC"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut session = WalletSession::create(kit(Some("GABC")), Box::new(store.clone()), "net");
        session.connect().await.unwrap();

        session.disconnect().unwrap();
        session.disconnect().unwrap();
        assert!(store.is_empty());
        assert_eq!(session.address(), None);

        let restored = WalletSession::restore(kit(None), Box::new(store), "net");
        assert!(!restored.is_connected());
        assert_eq!(restored.address(), None);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let store = Arc::new(MemoryStore::new());
        let mut session = WalletSession::create(kit(None), Box::new(store.clone()), "net");
        assert!(session.connect().await.is_err());
        assert!(!session.is_connected());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_persist_stays_disconnected() {
        let mut session = WalletSession::create(kit(Some("GABC")), Box::new(ReadOnlyStore), "net");
        assert!(session.connect().await.is_err());
        assert!(!session.is_connected());
        assert_eq!(session.address(), None);
    }

    /// Store whose writes can be switched off mid-test
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        fail_writes: Arc<AtomicBool>,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_failed_reconnect_clears_memory_and_storage() {
        let inner = Arc::new(MemoryStore::new());
        let fail_writes = Arc::new(AtomicBool::new(false));
        let store = FlakyStore { inner: inner.clone(), fail_writes: fail_writes.clone() };
        let mut session = WalletSession::create(kit(Some("GABC")), Box::new(store), "net");
        session.connect().await.unwrap();

        fail_writes.store(true, Ordering::SeqCst);
        assert!(session.connect().await.is_err());

        assert!(!session.is_connected());
        assert_eq!(session.address(), None);
        assert!(inner.is_empty());
        let restored = WalletSession::restore(kit(None), Box::new(inner), "net");
        assert_eq!(restored.is_connected(), session.is_connected());
    }

    #[test]
    fn test_restore_requires_flag_and_address() {
        let store = Arc::new(MemoryStore::new());
        store.set(SESSION_ADDRESS_KEY, "GABC").unwrap();
        let session = WalletSession::restore(kit(None), Box::new(store.clone()), "net");
        assert!(!session.is_connected());

        store.set(SESSION_CONNECTED_KEY, "false").unwrap();
        let session = WalletSession::restore(kit(None), Box::new(store), "net");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_signer_requires_connection() {
        let session = WalletSession::create(kit(Some("GABC")), Box::new(MemoryStore::new()), "net");
        assert!(matches!(session.signer(), Err(FlowError::WalletNotConnected)));
    }

    #[tokio::test]
    async fn test_signer_returns_signed_envelope() {
        let mut session = WalletSession::create(kit(Some("GABC")), Box::new(MemoryStore::new()), "net");
        session.connect().await.unwrap();

        let account = Account { id: "GABC".into(), sequence: 7 };
        let env = TransactionBuilder::new(&account, "net")
            .operation(Operation::native_payment("GSELLER", 10))
            .build()
            .unwrap();

        let signer = session.signer().unwrap();
        let signed = signer.sign(&env).await.unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.signatures[0].hint, "GABC");
        assert_eq!(signed.sequence, env.sequence);
    }
}

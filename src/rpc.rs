//! HTTP ledger client: Soroban JSON-RPC plus Horizon REST.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AppConfig, HTTP_TIMEOUT_SECS};
use crate::ledger::{
    Account, AccountRecord, LedgerRpc, OperationRecord, OperationsPage, SendResult, SimulationResult,
    TransactionEnvelope, TransactionInfo,
};

/// Client-side limiter shared by every request
type LedgerRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if let Some(err) = self.error {
            anyhow::bail!("{} failed ({}): {}", method, err.code, err.message);
        }
        self.result
            .with_context(|| format!("{} returned neither result nor error", method))
    }
}

#[derive(Debug, Deserialize)]
struct HalEmbedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HalPage<T> {
    #[serde(rename = "_embedded")]
    embedded: HalEmbedded<T>,
}

/// Newest-first page; a full page means older records may follow
fn operations_page(records: Vec<OperationRecord>, limit: u32) -> OperationsPage {
    let next_cursor = if records.len() as u32 >= limit {
        records.last().map(|r| r.paging_token.clone())
    } else {
        None
    };
    OperationsPage { records, next_cursor }
}

/// Ledger client over HTTP
pub struct HttpLedger {
    http: reqwest::Client,
    rpc_url: String,
    horizon_url: String,
    limiter: Arc<LedgerRateLimiter>,
    next_id: AtomicU64,
}

impl HttpLedger {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let per_second = NonZeroU32::new(config.rpc_rate_limit_per_sec).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            rpc_url: config.rpc_url.trim_end_matches('/').to_string(),
            horizon_url: config.horizon_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> Result<T> {
        self.limiter.until_ready().await;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("[LEDGER] rpc {} #{}", method, request.id);

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", method, self.rpc_url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned HTTP {}", method, response.status());
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Malformed {} response", method))?;
        body.into_result(method)
    }

    async fn horizon_get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.limiter.until_ready().await;

        let url = format!("{}{}", self.horizon_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Horizon request to {} failed", url))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("Horizon resource not found: {}", path);
        }
        if !response.status().is_success() {
            anyhow::bail!("Horizon returned status: {}", response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Malformed Horizon response from {}", path))
    }
}

#[async_trait]
impl LedgerRpc for HttpLedger {
    async fn get_account(&self, address: &str) -> Result<Account> {
        self.call("getAccount", serde_json::json!({ "address": address })).await
    }

    async fn simulate_transaction(&self, envelope: &TransactionEnvelope) -> Result<SimulationResult> {
        let transaction = envelope.encode()?;
        self.call("simulateTransaction", serde_json::json!({ "transaction": transaction }))
            .await
    }

    async fn send_transaction(&self, envelope: &TransactionEnvelope) -> Result<SendResult> {
        let transaction = envelope.encode()?;
        self.call("sendTransaction", serde_json::json!({ "transaction": transaction }))
            .await
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionInfo> {
        self.call("getTransaction", serde_json::json!({ "hash": hash })).await
    }

    async fn load_account(&self, address: &str) -> Result<AccountRecord> {
        self.horizon_get(&format!("/accounts/{}", address), &[]).await
    }

    async fn account_operations(
        &self,
        address: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<OperationsPage> {
        let mut query = vec![("order", "desc".to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let page: HalPage<OperationRecord> = self
            .horizon_get(&format!("/accounts/{}/operations", address), &query)
            .await?;
        Ok(operations_page(page.embedded.records, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{SendStatus, TransactionStatus};

    #[test]
    fn test_request_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "getTransaction",
            params: serde_json::json!({ "hash": "abc" }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["params"]["hash"], "abc");
    }

    #[test]
    fn test_rpc_result_and_error() {
        let ok: RpcResponse<SendResult> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"hash":"h","status":"PENDING"}}"#).unwrap();
        assert_eq!(ok.into_result("sendTransaction").unwrap().status, SendStatus::Pending);

        let err: RpcResponse<TransactionInfo> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"invalid hash"}}"#,
        )
        .unwrap();
        let message = err.into_result("getTransaction").unwrap_err().to_string();
        assert!(message.contains("invalid hash"));
        assert!(message.contains("-32602"));

        // Neither field present
        let empty: RpcResponse<TransactionInfo> = serde_json::from_str(r#"{"jsonrpc":"2.0","id":3}"#).unwrap();
        assert!(empty.into_result("getTransaction").is_err());
    }

    #[test]
    fn test_transaction_info_parsing() {
        let info: RpcResponse<TransactionInfo> = serde_json::from_str(
            r#"{"result":{"status":"SUCCESS","ledger":1234,"returnValue":{"type":"bool","value":true}}}"#,
        )
        .unwrap();
        let info = info.into_result("getTransaction").unwrap();
        assert_eq!(info.status, TransactionStatus::Success);
        assert_eq!(info.ledger, Some(1234));
    }

    #[test]
    fn test_hal_operations_page() {
        let body = r#"{
            "_embedded": {"records": [
                {"id":"3","paging_token":"p3","transaction_hash":"t2","type":"payment","created_at":"2025-01-02T00:00:00Z",
                 "from":"GBUYER","to":"GSELLER","asset_type":"native","amount":"30.0000000"},
                {"id":"2","paging_token":"p2","transaction_hash":"t2","type":"invoke_host_function","created_at":"2025-01-02T00:00:00Z"}
            ]}
        }"#;
        let page: HalPage<OperationRecord> = serde_json::from_str(body).unwrap();

        let full = operations_page(page.embedded.records.clone(), 2);
        assert_eq!(full.records.len(), 2);
        assert_eq!(full.next_cursor.as_deref(), Some("p2"));
        assert_eq!(full.records[0].amount.as_deref(), Some("30.0000000"));

        let partial = operations_page(page.embedded.records, 100);
        assert!(partial.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_an_error() {
        let config = AppConfig {
            rpc_url: "http://127.0.0.1:9".to_string(),
            ..AppConfig::default()
        };
        let ledger = HttpLedger::new(&config).unwrap();
        assert!(ledger.get_transaction("abc").await.is_err());
    }
}

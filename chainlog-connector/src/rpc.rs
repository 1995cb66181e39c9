//! # Ledger RPC
//!
//! [`LedgerRpc`] is the narrow interface the connector needs from a ledger node.
//! [`JsonRpcClient`] implements it over HTTP JSON-RPC against EVM-style nodes.
//! Tests substitute their own implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RpcError;
use crate::events::{RawEvent, Topic};

/// A log query: all logs of `address` whose primary topic is one of `topics`,
/// within `[from_block, to_block]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: String,
    pub topics: Vec<Topic>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Confirmation artifact of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_height: Option<u64>,
    /// `1` for success, `0` for a reverted transaction.
    pub status: Option<u64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == Some(1) && self.block_height.is_some()
    }
}

/// A trait abstracting over the ledger node.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Current head height.
    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, RpcError>;

    /// `None` while the transaction is unknown or pending.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError>;

    /// Broadcasts a signed transaction and returns its hash.
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, RpcError>;

    /// Resolves once the transaction is mined, whatever its status.
    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<Receipt, RpcError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    block_number: String,
    log_index: String,
    transaction_hash: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

/// An HTTP JSON-RPC client for EVM-style ledgers.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: Arc<AtomicU64>,
    block_poll_interval: Duration,
}

impl JsonRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.into(),
            request_id: Arc::new(AtomicU64::new(1)),
            block_poll_interval: Duration::from_secs(1),
        })
    }

    /// Sets how often [`LedgerRpc::wait_for_transaction`] checks for a new head.
    pub fn with_block_poll_interval(mut self, interval: Duration) -> Self {
        self.block_poll_interval = interval;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self.http_client.post(&self.rpc_url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(method, status, "[RPC] HTTP error: {}", body);
            return Err(RpcError::Http { status, body });
        }

        let response: JsonRpcResponse = response.json().await?;
        if let Some(error) = response.error {
            tracing::error!(method, code = error.code, "[RPC] node error: {}", error.message);
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }

        // A null result is valid for lookups such as receipts of pending transactions.
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let quantity = result.as_str().ok_or_else(|| decode_error("eth_blockNumber", "expected a hex string"))?;
        parse_quantity(quantity).map_err(|reason| decode_error("eth_blockNumber", reason))
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, RpcError> {
        let topics: Vec<String> = query.topics.iter().map(Topic::to_string).collect();
        let filter = json!({
            "address": query.address,
            "fromBlock": format_quantity(query.from_block),
            "toBlock": format_quantity(query.to_block),
            "topics": [topics],
        });

        let result = self.call("eth_getLogs", json!([filter])).await?;
        let logs: Vec<RpcLog> =
            serde_json::from_value(result).map_err(|e| decode_error("eth_getLogs", e))?;

        live_events(logs).map_err(|reason| decode_error("eth_getLogs", reason))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let receipt: RpcReceipt = serde_json::from_value(result)
            .map_err(|e| decode_error("eth_getTransactionReceipt", e))?;
        receipt_from_rpc(receipt)
            .map(Some)
            .map_err(|reason| decode_error("eth_getTransactionReceipt", reason))
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, RpcError> {
        let encoded = format!("0x{}", hex::encode(raw_tx));
        let result = self.call("eth_sendRawTransaction", json!([encoded])).await?;
        result
            .as_str()
            .map(str::to_lowercase)
            .ok_or_else(|| decode_error("eth_sendRawTransaction", "expected a transaction hash"))
    }

    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<Receipt, RpcError> {
        let mut last_seen_head = None;
        loop {
            let head = self.block_number().await?;
            if last_seen_head != Some(head) {
                last_seen_head = Some(head);
                if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                    if receipt.block_height.is_some() {
                        return Ok(receipt);
                    }
                }
            }
            tokio::time::sleep(self.block_poll_interval).await;
        }
    }
}

fn decode_error(method: &str, reason: impl ToString) -> RpcError {
    RpcError::Decode {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

fn parse_quantity(value: &str) -> Result<u64, String> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity '{value}' is not 0x-prefixed"))?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("quantity '{value}': {e}"))
}

/// Splits log data into 32-byte words rendered as hex.
fn data_words(data: &str) -> Result<Vec<String>, String> {
    let raw = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(raw).map_err(|e| format!("log data: {e}"))?;
    Ok(bytes
        .chunks(32)
        .map(|word| format!("0x{}", hex::encode(word)))
        .collect())
}

fn raw_event_from_log(log: RpcLog) -> Result<RawEvent, String> {
    let topics = log
        .topics
        .iter()
        .map(|t| t.parse::<Topic>().map_err(|e| format!("topic '{t}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut args: Vec<String> = topics.iter().skip(1).map(Topic::to_string).collect();
    args.extend(data_words(&log.data)?);

    Ok(RawEvent {
        block_height: parse_quantity(&log.block_number)?,
        log_index: parse_quantity(&log.log_index)?,
        tx_hash: log.transaction_hash.to_lowercase(),
        topics,
        args,
    })
}

/// Converts the logs that are still part of the canonical chain. Logs flagged
/// `removed` were dropped by a reorg.
fn live_events(logs: Vec<RpcLog>) -> Result<Vec<RawEvent>, String> {
    logs.into_iter()
        .filter(|log| !log.removed)
        .map(raw_event_from_log)
        .collect()
}

fn receipt_from_rpc(receipt: RpcReceipt) -> Result<Receipt, String> {
    Ok(Receipt {
        tx_hash: receipt.transaction_hash.to_lowercase(),
        block_height: receipt.block_number.as_deref().map(parse_quantity).transpose()?,
        status: receipt.status.as_deref().map(parse_quantity).transpose()?,
    })
}

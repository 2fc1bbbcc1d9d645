//! JSON-RPC transports

use async_trait::async_trait;
use bach_txqueue::{ProviderError, ProviderResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};

/// Carries one JSON-RPC call; object safe so providers can box it
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `method` with `params`, returning the raw `result`
    async fn request_json(&self, method: &str, params: Vec<Value>) -> ProviderResult<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn request_json(&self, method: &str, params: Vec<Value>) -> ProviderResult<Value> {
        (**self).request_json(method, params).await
    }
}

/// Decode a raw `result` into `T`
pub fn deserialize_response<T: serde::de::DeserializeOwned>(value: Value) -> ProviderResult<T> {
    serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Hash returned by the mock for `eth_sendTransaction`
pub const MOCK_TX_HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

/// In-memory transport: canned answers, scripted failures and a call log
pub struct MockTransport {
    responses: Mutex<HashMap<String, Value>>,
    default_responses: HashMap<String, Value>,
    scripted_errors: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockTransport {
    /// Mock answering the common `eth_*` reads with fixed values
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            default_responses: default_responses(),
            scripted_errors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `method` with `response` until cleared
    pub fn set_response(&self, method: &str, response: Value) {
        self.responses.lock().insert(method.to_string(), response);
    }

    /// Fail the next call to `method` with `error` (errors queue up in order)
    pub fn push_error(&self, method: &str, error: ProviderError) {
        self.scripted_errors
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Clear custom responses and scripted errors
    pub fn clear_responses(&self) {
        self.responses.lock().clear();
        self.scripted_errors.lock().clear();
    }

    /// Every request seen so far, in order
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    /// Requests seen for one method
    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

/// Chain id 1 at block 256, gas price 1 gwei, 1 ETH balances, and every
/// sent transaction mined successfully in block 256
fn default_responses() -> HashMap<String, Value> {
    [
        ("eth_chainId", json!("0x1")),
        ("eth_gasPrice", json!("0x3b9aca00")),
        ("eth_blockNumber", json!("0x100")),
        ("eth_getBalance", json!("0xde0b6b3a7640000")),
        ("eth_getTransactionCount", json!("0x0")),
        ("eth_estimateGas", json!("0x5208")),
        ("eth_sendTransaction", json!(MOCK_TX_HASH)),
        (
            "eth_getTransactionReceipt",
            json!({
                "transactionHash": MOCK_TX_HASH,
                "blockNumber": "0x100",
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x3b9aca00",
                "status": "0x1",
            }),
        ),
    ]
    .into_iter()
    .map(|(method, value)| (method.to_string(), value))
    .collect()
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request_json(&self, method: &str, params: Vec<Value>) -> ProviderResult<Value> {
        self.calls.lock().push((method.to_string(), params));

        if let Some(err) = self
            .scripted_errors
            .lock()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let overridden = self.responses.lock().get(method).cloned();
        overridden
            .or_else(|| self.default_responses.get(method).cloned())
            .ok_or_else(|| ProviderError::Rpc {
                code: -32601,
                message: format!("method {} not supported by mock", method),
            })
    }
}

/// JSON-RPC 2.0 over HTTP POST
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: std::sync::atomic::AtomicU64,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Transport for the endpoint at `url`
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            request_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn request_json(&self, method: &str, params: Vec<Value>) -> ProviderResult<Value> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": method,
            "params": params,
        });
        tracing::trace!("RPC request {} -> {}", method, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        if let Some(err) = status_error(response.status()) {
            return Err(err);
        }

        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        // A missing result is a JSON null, e.g. an unmined receipt
        Ok(response.result.unwrap_or(Value::Null))
    }
}

/// Statuses whose body is not a JSON-RPC reply; both are worth retrying
#[cfg(feature = "http")]
fn status_error(status: reqwest::StatusCode) -> Option<ProviderError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderError::Transport("429 too many requests".to_string()))
    } else if status.is_server_error() {
        Some(ProviderError::Transport(format!("HTTP {}", status)))
    } else {
        None
    }
}

#[cfg(feature = "http")]
#[derive(serde::Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[cfg(feature = "http")]
#[derive(serde::Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

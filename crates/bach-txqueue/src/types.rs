//! Core queue types: identifiers, intents, records and receipts

use bytes::Bytes;
use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Account address
pub type Address = H160;

/// Queue record identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Create an identifier from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random (UUID v4) identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TxId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What the caller wants sent
///
/// Gas and nonce fields left as `None` are filled in by the executor right
/// before each dispatch attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIntent {
    /// Sending account (defaults to the provider's signer)
    #[serde(default)]
    pub from: Option<Address>,
    /// Recipient
    #[serde(default)]
    pub to: Option<Address>,
    /// Value in wei
    #[serde(default)]
    pub value: U256,
    /// Call data
    #[serde(default, with = "hex_bytes")]
    pub data: Bytes,
    /// Gas limit
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// Legacy gas price
    #[serde(default)]
    pub gas_price: Option<u128>,
    /// EIP-1559 max fee per gas
    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 max priority fee per gas
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Explicit nonce, bypasses automatic nonce management
    #[serde(default)]
    pub nonce: Option<u64>,
}

impl TxIntent {
    /// Plain value transfer to `to`
    pub fn transfer(to: Address, value: impl Into<U256>) -> Self {
        Self {
            to: Some(to),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Contract call to `to` with `data`
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Default::default()
        }
    }

    /// Set the sender
    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the value to transfer
    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = value.into();
        self
    }

    /// Set the call data
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the gas limit
    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = Some(limit);
        self
    }

    /// Set a legacy gas price
    pub fn gas_price(mut self, price: u128) -> Self {
        self.gas_price = Some(price);
        self
    }

    /// Set EIP-1559 fee caps
    pub fn fees(mut self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self
    }

    /// Pin the nonce
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// True when any EIP-1559 fee field is set
    pub fn has_fee_market_fields(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some()
    }
}

/// Record lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Waiting to be picked
    Pending,
    /// Picked by the executor, not started
    Queued,
    /// Being prepared and sent
    Executing,
    /// Sent, waiting for the receipt
    Confirming,
    /// Mined successfully
    Confirmed,
    /// Gave up
    Failed,
    /// Cancelled before dispatch
    Cancelled,
}

impl TxStatus {
    /// Pending or Queued
    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Pending | TxStatus::Queued)
    }

    /// Executing or Confirming
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TxStatus::Executing | TxStatus::Confirming)
    }

    /// Confirmed, Failed or Cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::Cancelled)
    }

    /// Whether a dependent may run once a dependency is in this status
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Cancelled)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Queued => "queued",
            TxStatus::Executing => "executing",
            TxStatus::Confirming => "confirming",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Mined transaction receipt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: H256,
    /// Block the transaction landed in
    pub block_number: u64,
    /// Gas consumed
    pub gas_used: u64,
    /// Price actually paid per gas, when the node reports it
    #[serde(default)]
    pub effective_gas_price: Option<u128>,
    /// Execution status (false = reverted)
    pub success: bool,
}

/// Options accepted alongside an intent
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnqueueOptions {
    /// Caller-chosen identifier
    pub id: Option<TxId>,
    /// Higher runs first
    pub priority: i64,
    /// Records that must be confirmed or cancelled first
    pub dependencies: Vec<TxId>,
    /// Retry ceiling, queue default when `None`
    pub max_retries: Option<u32>,
    /// Free-form caller data
    pub metadata: Option<serde_json::Value>,
}

impl EnqueueOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed identifier
    pub fn id(mut self, id: impl Into<TxId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Add one dependency
    pub fn depends_on(mut self, id: impl Into<TxId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Replace the dependency list
    pub fn dependencies(mut self, ids: impl IntoIterator<Item = TxId>) -> Self {
        self.dependencies = ids.into_iter().collect();
        self
    }

    /// Set retry ceiling
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Attach metadata
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A queued unit of work and its execution state
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TxRecord {
    /// Identifier
    pub id: TxId,
    /// What to send
    pub intent: TxIntent,
    /// Lifecycle status
    pub status: TxStatus,
    /// Scheduling priority
    pub priority: i64,
    /// Dependencies, in declaration order
    pub dependencies: Vec<TxId>,
    /// Retries consumed
    pub retry_count: u32,
    /// Retry ceiling
    pub max_retries: u32,
    /// Creation time (unix millis)
    pub created_at: u64,
    /// Last time execution started (unix millis)
    pub executed_at: Option<u64>,
    /// Confirmation time (unix millis)
    pub confirmed_at: Option<u64>,
    /// Hash of the last dispatched transaction
    pub tx_hash: Option<H256>,
    /// Receipt once confirmed
    pub receipt: Option<TxReceipt>,
    /// Terminal error
    pub error: Option<String>,
    /// Caller metadata
    pub metadata: Option<serde_json::Value>,
}

impl TxRecord {
    pub(crate) fn new(id: TxId, intent: TxIntent, options: EnqueueOptions, max_retries: u32) -> Self {
        Self {
            id,
            intent,
            status: TxStatus::Pending,
            priority: options.priority,
            dependencies: options.dependencies,
            retry_count: 0,
            max_retries,
            created_at: now_millis(),
            executed_at: None,
            confirmed_at: None,
            tx_hash: None,
            receipt: None,
            error: None,
            metadata: options.metadata,
        }
    }

    /// Milliseconds between execution start and confirmation
    pub fn confirmation_latency_ms(&self) -> Option<u64> {
        match (self.executed_at, self.confirmed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// How the transaction pays for gas
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasPricing {
    /// Type 0
    Legacy {
        /// Price per gas
        gas_price: u128,
    },
    /// Type 2, missing caps are left for the node
    DynamicFee {
        /// Max fee per gas
        max_fee_per_gas: Option<u128>,
        /// Max priority fee per gas
        max_priority_fee_per_gas: Option<u128>,
    },
}

/// Intent after nonce and gas preparation, ready for the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedTransaction {
    /// Sending account
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Value in wei
    pub value: U256,
    /// Call data
    pub data: Bytes,
    /// Nonce, `None` lets the signer pick
    pub nonce: Option<u64>,
    /// Gas limit
    pub gas_limit: u64,
    /// Fee fields
    pub pricing: GasPricing,
}

/// Current unix time in milliseconds
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Serde helper: `Bytes` as a 0x-prefixed hex string
pub mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `0x...`
    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    /// Accept `0x...` or bare hex
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

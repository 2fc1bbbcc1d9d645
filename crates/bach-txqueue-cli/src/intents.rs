//! Intent files
//!
//! A JSON array, one object per transaction:
//!
//! ```json
//! [
//!   { "id": "fund", "to": "0x22…22", "value": "0xde0b6b3a7640000", "priority": 10 },
//!   { "to": "0x33…33", "data": "0xa9059cbb", "depends_on": ["fund"] }
//! ]
//! ```

use bach_txqueue::{hex_bytes, Address, EnqueueOptions, TxId, TxIntent, U256};
use bytes::Bytes;
use serde::Deserialize;
use std::path::Path;

/// One entry of an intents file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentEntry {
    /// Caller-chosen id
    #[serde(default)]
    pub id: Option<TxId>,
    /// Sending account
    #[serde(default)]
    pub from: Option<Address>,
    /// Destination
    pub to: Address,
    /// Wei, as a hex quantity
    #[serde(default)]
    pub value: Option<U256>,
    /// Calldata
    #[serde(default, with = "hex_bytes")]
    pub data: Bytes,
    /// Gas limit
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// Legacy gas price
    #[serde(default)]
    pub gas_price: Option<u128>,
    /// Fee cap
    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,
    /// Tip
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Explicit nonce
    #[serde(default)]
    pub nonce: Option<u64>,
    /// Scheduling priority
    #[serde(default)]
    pub priority: i64,
    /// Ids that must confirm first
    #[serde(default)]
    pub depends_on: Vec<TxId>,
    /// Retry ceiling
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl IntentEntry {
    /// Split into what the queue takes
    pub fn into_parts(self) -> (TxIntent, EnqueueOptions) {
        let intent = TxIntent {
            from: self.from,
            to: Some(self.to),
            value: self.value.unwrap_or_default(),
            data: self.data,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            nonce: self.nonce,
        };

        let options = EnqueueOptions {
            id: self.id,
            priority: self.priority,
            dependencies: self.depends_on,
            max_retries: self.max_retries,
            metadata: None,
        };

        (intent, options)
    }
}

/// Parse an intents document
pub fn parse(content: &str) -> anyhow::Result<Vec<(TxIntent, EnqueueOptions)>> {
    let entries: Vec<IntentEntry> = serde_json::from_str(content)?;
    Ok(entries.into_iter().map(IntentEntry::into_parts).collect())
}

/// Read and parse an intents file
pub fn load(path: &Path) -> anyhow::Result<Vec<(TxIntent, EnqueueOptions)>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    parse(&content).map_err(|e| anyhow::anyhow!("invalid intents file {}: {}", path.display(), e))
}

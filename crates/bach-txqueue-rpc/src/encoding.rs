//! JSON-RPC quantity and request encoding

use bach_txqueue::{
    Address, GasPricing, PreparedTransaction, ProviderError, ProviderResult, TxIntent, TxReceipt,
    H256, U256,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Encode a number as a JSON-RPC quantity
pub fn quantity(n: impl Into<u128>) -> Value {
    Value::String(format!("0x{:x}", n.into()))
}

fn u256_quantity(n: U256) -> Value {
    Value::String(format!("0x{:x}", n))
}

fn data(bytes: &Bytes) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

fn address(addr: &Address) -> Value {
    Value::String(format!("{:?}", addr))
}

/// Hex-encoded hash
pub fn hash(h: &H256) -> Value {
    Value::String(format!("{:?}", h))
}

/// Parse a hex quantity into u64
pub fn parse_hex_u64(s: &str) -> ProviderResult<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| ProviderError::InvalidResponse(format!("bad quantity {}: {}", s, e)))
}

/// Parse a hex quantity into u128
pub fn parse_hex_u128(s: &str) -> ProviderResult<u128> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u128::from_str_radix(s, 16).map_err(|e| ProviderError::InvalidResponse(format!("bad quantity {}: {}", s, e)))
}

/// Parse a hex quantity into U256
pub fn parse_hex_u256(s: &str) -> ProviderResult<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    U256::from_str_radix(s, 16).map_err(|e| ProviderError::InvalidResponse(format!("bad quantity {}: {:?}", s, e)))
}

/// Parse a 32-byte hash
pub fn parse_hash(s: &str) -> ProviderResult<H256> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ProviderError::InvalidResponse(format!("bad hash length: {}", s)));
    }
    Ok(H256::from_slice(&bytes))
}

/// `eth_sendTransaction` parameter object
pub fn transaction_request(tx: &PreparedTransaction) -> Value {
    let mut obj = Map::new();
    obj.insert("from".into(), address(&tx.from));
    obj.insert("to".into(), address(&tx.to));
    obj.insert("value".into(), u256_quantity(tx.value));
    obj.insert("data".into(), data(&tx.data));
    obj.insert("gas".into(), quantity(tx.gas_limit));
    if let Some(nonce) = tx.nonce {
        obj.insert("nonce".into(), quantity(nonce));
    }

    match tx.pricing {
        GasPricing::Legacy { gas_price } => {
            obj.insert("gasPrice".into(), quantity(gas_price));
        }
        GasPricing::DynamicFee {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            obj.insert("type".into(), json!("0x2"));
            if let Some(fee) = max_fee_per_gas {
                obj.insert("maxFeePerGas".into(), quantity(fee));
            }
            if let Some(tip) = max_priority_fee_per_gas {
                obj.insert("maxPriorityFeePerGas".into(), quantity(tip));
            }
        }
    }

    Value::Object(obj)
}

/// `eth_estimateGas` parameter object
pub fn estimate_request(intent: &TxIntent, from: Address) -> Value {
    let mut obj = Map::new();
    obj.insert("from".into(), address(&intent.from.unwrap_or(from)));
    if let Some(to) = &intent.to {
        obj.insert("to".into(), address(to));
    }
    if !intent.value.is_zero() {
        obj.insert("value".into(), u256_quantity(intent.value));
    }
    if !intent.data.is_empty() {
        obj.insert("data".into(), data(&intent.data));
    }
    Value::Object(obj)
}

/// Receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    gas_used: String,
    #[serde(default)]
    effective_gas_price: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl RpcReceipt {
    /// Convert, `None` while the receipt has no block yet
    pub fn into_receipt(self) -> ProviderResult<Option<TxReceipt>> {
        let Some(block) = self.block_number else {
            return Ok(None);
        };
        Ok(Some(TxReceipt {
            tx_hash: parse_hash(&self.transaction_hash)?,
            block_number: parse_hex_u64(&block)?,
            gas_used: parse_hex_u64(&self.gas_used)?,
            effective_gas_price: self.effective_gas_price.as_deref().map(parse_hex_u128).transpose()?,
            // Pre-byzantium receipts carry no status; treat as success
            success: match self.status.as_deref() {
                Some(s) => parse_hex_u64(s)? == 1,
                None => true,
            },
        }))
    }
}

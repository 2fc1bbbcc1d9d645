//! `Provider` over JSON-RPC

use crate::encoding::{
    estimate_request, hash, parse_hash, parse_hex_u128, parse_hex_u256, parse_hex_u64, transaction_request,
    RpcReceipt,
};
use crate::transport::{deserialize_response, MockTransport, Transport};
use async_trait::async_trait;
use bach_txqueue::{
    Address, PreparedTransaction, Provider, ProviderError, ProviderResult, TxIntent, TxReceipt, H256, U256,
};
use serde_json::Value;
use std::time::Duration;

#[cfg(feature = "http")]
use crate::transport::HttpTransport;

/// Default receipt polling interval
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Node-backed provider; the node holds the signer's key (`eth_sendTransaction`)
pub struct RpcProvider {
    transport: Box<dyn Transport>,
    signer: Address,
    poll_interval: Duration,
}

impl RpcProvider {
    /// Create a provider with HTTP transport
    #[cfg(feature = "http")]
    pub fn connect(url: &str, signer: Address) -> Self {
        Self::with_transport(HttpTransport::new(url), signer)
    }

    /// Create a provider with mock transport (for testing)
    pub fn new_mock(signer: Address) -> Self {
        Self::with_transport(MockTransport::new(), signer)
    }

    /// Create a provider with a custom transport
    pub fn with_transport(transport: impl Transport + 'static, signer: Address) -> Self {
        Self {
            transport: Box::new(transport),
            signer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the receipt polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Helper method to make RPC request and deserialize
    async fn request<T: serde::de::DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> ProviderResult<T> {
        let value = self.transport.request_json(method, params).await?;
        deserialize_response(value)
    }

    /// Latest block number
    pub async fn block_number(&self) -> ProviderResult<u64> {
        let result: String = self.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&result)
    }

    /// Chain id reported by the node
    pub async fn chain_id(&self) -> ProviderResult<u64> {
        let result: String = self.request("eth_chainId", vec![]).await?;
        parse_hex_u64(&result)
    }

    async fn poll_confirmation(&self, tx_hash: &H256, confirmations: u64) -> ProviderResult<TxReceipt> {
        loop {
            if let Some(receipt) = self.get_receipt(tx_hash).await? {
                let head = self.block_number().await?;
                let depth = (head + 1).saturating_sub(receipt.block_number);
                if depth >= confirmations {
                    return Ok(receipt);
                }
                tracing::trace!("{:?} has {}/{} confirmations", tx_hash, depth, confirmations);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Provider for RpcProvider {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn send_transaction(&self, tx: &PreparedTransaction) -> ProviderResult<H256> {
        let result: String = self
            .request("eth_sendTransaction", vec![transaction_request(tx)])
            .await?;
        let tx_hash = parse_hash(&result)?;
        tracing::debug!("Sent transaction {:?} (nonce {:?})", tx_hash, tx.nonce);
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: &H256) -> ProviderResult<Option<TxReceipt>> {
        let result: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", vec![hash(tx_hash)])
            .await?;
        match result {
            Some(raw) => raw.into_receipt(),
            None => Ok(None),
        }
    }

    async fn get_transaction_count(&self, address: &Address) -> ProviderResult<u64> {
        let result: String = self
            .request(
                "eth_getTransactionCount",
                vec![Value::String(format!("{:?}", address)), Value::String("pending".to_string())],
            )
            .await?;
        parse_hex_u64(&result)
    }

    async fn estimate_gas(&self, intent: &TxIntent) -> ProviderResult<u64> {
        let result: String = self
            .request("eth_estimateGas", vec![estimate_request(intent, self.signer)])
            .await?;
        parse_hex_u64(&result)
    }

    async fn gas_price(&self) -> ProviderResult<u128> {
        let result: String = self.request("eth_gasPrice", vec![]).await?;
        parse_hex_u128(&result)
    }

    async fn get_balance(&self, address: &Address) -> ProviderResult<U256> {
        let result: String = self
            .request(
                "eth_getBalance",
                vec![Value::String(format!("{:?}", address)), Value::String("latest".to_string())],
            )
            .await?;
        parse_hex_u256(&result)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &H256,
        confirmations: u64,
        timeout: Option<Duration>,
    ) -> ProviderResult<TxReceipt> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_confirmation(tx_hash, confirmations))
                .await
                .map_err(|_| {
                    ProviderError::Timeout(format!("no receipt for {:?} after {} ms", tx_hash, limit.as_millis()))
                })?,
            None => self.poll_confirmation(tx_hash, confirmations).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MOCK_TX_HASH;
    use bach_txqueue::GasPricing;

    fn signer() -> Address {
        Address::repeat_byte(0x11)
    }

    #[tokio::test]
    async fn test_provider_mock_reads() {
        let provider = RpcProvider::new_mock(signer());
        assert_eq!(provider.gas_price().await.unwrap(), 1_000_000_000);
        assert_eq!(provider.block_number().await.unwrap(), 256);
        assert_eq!(provider.chain_id().await.unwrap(), 1);
        assert_eq!(provider.get_transaction_count(&signer()).await.unwrap(), 0);
        assert_eq!(
            provider.get_balance(&signer()).await.unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
        assert_eq!(provider.estimate_gas(&TxIntent::default()).await.unwrap(), 21000);
    }

    #[tokio::test]
    async fn test_provider_send_and_confirm() {
        let provider = RpcProvider::new_mock(signer());
        let tx = PreparedTransaction {
            from: signer(),
            to: Address::repeat_byte(0x22),
            value: U256::from(1u64),
            data: Default::default(),
            nonce: Some(0),
            gas_limit: 21000,
            pricing: GasPricing::Legacy { gas_price: 1 },
        };

        let tx_hash = provider.send_transaction(&tx).await.unwrap();
        assert_eq!(tx_hash, parse_hash(MOCK_TX_HASH).unwrap());

        let receipt = provider.wait_for_confirmation(&tx_hash, 1, None).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, 256);
        assert_eq!(receipt.effective_gas_price, Some(1_000_000_000));
    }

    #[tokio::test]
    async fn test_provider_missing_receipt() {
        let transport = MockTransport::new();
        transport.set_response("eth_getTransactionReceipt", Value::Null);
        let provider = RpcProvider::with_transport(transport, signer());

        let tx_hash = H256::repeat_byte(0xab);
        assert!(provider.get_receipt(&tx_hash).await.unwrap().is_none());
    }
}

//! Per-account nonce tracking for automatic nonce management

use crate::error::ProviderResult;
use crate::provider::Provider;
use crate::types::Address;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Next nonce to use, per account
///
/// The lock is held across the chain read so two reservations for the same
/// account can never hand out the same value.
#[derive(Debug, Default)]
pub struct NonceLedger {
    next: Mutex<HashMap<Address, u64>>,
}

impl NonceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next nonce for `address`
    ///
    /// Uses the larger of the chain's pending count and the tracked value,
    /// then advances the tracked value past it.
    pub async fn reserve(&self, provider: &dyn Provider, address: Address) -> ProviderResult<u64> {
        let mut next = self.next.lock().await;
        let chain = provider.get_transaction_count(&address).await?;
        let nonce = next.get(&address).copied().map_or(chain, |tracked| tracked.max(chain));
        next.insert(address, nonce + 1);
        tracing::trace!("Reserved nonce {} for {:?}", nonce, address);
        Ok(nonce)
    }

    /// Forget the tracked value, next reservation re-reads the chain
    pub async fn invalidate(&self, address: &Address) {
        if self.next.lock().await.remove(address).is_some() {
            tracing::debug!("Invalidated nonce for {:?}", address);
        }
    }

    /// Tracked next nonce, if any
    pub async fn peek(&self, address: &Address) -> Option<u64> {
        self.next.lock().await.get(address).copied()
    }

    /// Forget every account
    pub async fn clear(&self) {
        self.next.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_advances() {
        let signer = Address::repeat_byte(0x01);
        let provider = MockProvider::new(signer);
        provider.set_nonce(signer, 5);
        let ledger = NonceLedger::new();

        assert_eq!(ledger.reserve(&provider, signer).await.unwrap(), 5);
        assert_eq!(ledger.reserve(&provider, signer).await.unwrap(), 6);
        assert_eq!(ledger.peek(&signer).await, Some(7));
    }

    #[tokio::test]
    async fn test_chain_ahead_wins() {
        let signer = Address::repeat_byte(0x01);
        let provider = MockProvider::new(signer);
        let ledger = NonceLedger::new();

        assert_eq!(ledger.reserve(&provider, signer).await.unwrap(), 0);
        provider.set_nonce(signer, 10);
        assert_eq!(ledger.reserve(&provider, signer).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_invalidate_rereads_chain() {
        let signer = Address::repeat_byte(0x01);
        let provider = MockProvider::new(signer);
        let ledger = NonceLedger::new();

        ledger.reserve(&provider, signer).await.unwrap();
        ledger.reserve(&provider, signer).await.unwrap();
        ledger.invalidate(&signer).await;
        assert_eq!(ledger.peek(&signer).await, None);
        assert_eq!(ledger.reserve(&provider, signer).await.unwrap(), 0);

        ledger.clear().await;
        assert_eq!(ledger.peek(&signer).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_are_distinct() {
        let signer = Address::repeat_byte(0x01);
        let provider = Arc::new(MockProvider::new(signer));
        let ledger = Arc::new(NonceLedger::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let provider = provider.clone();
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(provider.as_ref(), signer).await.unwrap()
            }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..16).collect::<Vec<_>>());
    }
}

//! Chain access used by the executor

use crate::error::{ProviderError, ProviderResult};
use crate::types::{Address, PreparedTransaction, TxIntent, TxReceipt};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::{H256, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Signs, broadcasts and reads chain state (object-safe)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Account used when an intent names no sender
    fn signer(&self) -> Address;

    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, tx: &PreparedTransaction) -> ProviderResult<H256>;

    /// Receipt if the transaction is mined
    async fn get_receipt(&self, hash: &H256) -> ProviderResult<Option<TxReceipt>>;

    /// Pending transaction count for `address`
    async fn get_transaction_count(&self, address: &Address) -> ProviderResult<u64>;

    /// Gas estimate for `intent`
    async fn estimate_gas(&self, intent: &TxIntent) -> ProviderResult<u64>;

    /// Current legacy gas price
    async fn gas_price(&self) -> ProviderResult<u128>;

    /// Balance of `address`
    async fn get_balance(&self, address: &Address) -> ProviderResult<U256>;

    /// Wait until `hash` has `confirmations` blocks on top of it
    async fn wait_for_confirmation(
        &self,
        hash: &H256,
        confirmations: u64,
        timeout: Option<Duration>,
    ) -> ProviderResult<TxReceipt>;
}

#[derive(Default)]
struct MockState {
    nonces: HashMap<Address, u64>,
    send_failures: VecDeque<ProviderError>,
    reverts: usize,
    receipts: HashMap<H256, TxReceipt>,
    sent: Vec<PreparedTransaction>,
    send_attempts: usize,
    next_hash: u64,
    block_number: u64,
}

/// Scriptable in-memory provider for tests and dry runs
///
/// Every send succeeds and is mined one block later unless a failure was
/// scripted with [`fail_next_send`](Self::fail_next_send) or
/// [`revert_next`](Self::revert_next).
pub struct MockProvider {
    signer: Address,
    gas_estimate: u64,
    gas_price: u128,
    balance: U256,
    latency: Option<Duration>,
    state: Mutex<MockState>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockProvider {
    /// Create a mock signing as `signer`
    pub fn new(signer: Address) -> Self {
        Self {
            signer,
            gas_estimate: 21_000,
            gas_price: 1_000_000_000, // 1 gwei
            balance: U256::from(10u64).pow(U256::from(18u64)), // 1 ETH
            latency: None,
            state: Mutex::new(MockState {
                block_number: 0x100,
                ..Default::default()
            }),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Delay every send and confirmation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the gas estimate returned for every intent
    pub fn with_gas_estimate(mut self, gas: u64) -> Self {
        self.gas_estimate = gas;
        self
    }

    /// Set the gas price
    pub fn with_gas_price(mut self, price: u128) -> Self {
        self.gas_price = price;
        self
    }

    /// Make the next send fail with `error` (failures queue up in order)
    pub fn fail_next_send(&self, error: ProviderError) {
        self.state.lock().send_failures.push_back(error);
    }

    /// Make the next successful send produce a reverted receipt
    pub fn revert_next(&self) {
        self.state.lock().reverts += 1;
    }

    /// Set the chain-side pending nonce of `address`
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    /// Transactions broadcast successfully, in order
    pub fn sent(&self) -> Vec<PreparedTransaction> {
        self.state.lock().sent.clone()
    }

    /// Send attempts, failed ones included
    pub fn send_attempts(&self) -> usize {
        self.state.lock().send_attempts
    }

    /// Highest number of sends observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn send_transaction(&self, tx: &PreparedTransaction) -> ProviderResult<H256> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        self.simulate_latency().await;

        let mut state = self.state.lock();
        state.send_attempts += 1;
        if let Some(err) = state.send_failures.pop_front() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(err);
        }

        state.next_hash += 1;
        state.block_number += 1;
        let hash = H256::from_low_u64_be(state.next_hash);

        if let Some(nonce) = tx.nonce {
            let entry = state.nonces.entry(tx.from).or_insert(0);
            *entry = (*entry).max(nonce + 1);
        } else {
            *state.nonces.entry(tx.from).or_insert(0) += 1;
        }

        let success = if state.reverts > 0 {
            state.reverts -= 1;
            false
        } else {
            true
        };
        let receipt = TxReceipt {
            tx_hash: hash,
            block_number: state.block_number,
            gas_used: tx.gas_limit.min(self.gas_estimate),
            effective_gas_price: Some(self.gas_price),
            success,
        };
        state.receipts.insert(hash, receipt);
        state.sent.push(tx.clone());

        Ok(hash)
    }

    async fn get_receipt(&self, hash: &H256) -> ProviderResult<Option<TxReceipt>> {
        Ok(self.state.lock().receipts.get(hash).cloned())
    }

    async fn get_transaction_count(&self, address: &Address) -> ProviderResult<u64> {
        Ok(self.state.lock().nonces.get(address).copied().unwrap_or(0))
    }

    async fn estimate_gas(&self, _intent: &TxIntent) -> ProviderResult<u64> {
        Ok(self.gas_estimate)
    }

    async fn gas_price(&self) -> ProviderResult<u128> {
        Ok(self.gas_price)
    }

    async fn get_balance(&self, _address: &Address) -> ProviderResult<U256> {
        Ok(self.balance)
    }

    async fn wait_for_confirmation(
        &self,
        hash: &H256,
        _confirmations: u64,
        timeout: Option<Duration>,
    ) -> ProviderResult<TxReceipt> {
        let wait = async {
            self.simulate_latency().await;
            self.state
                .lock()
                .receipts
                .get(hash)
                .cloned()
                .ok_or_else(|| ProviderError::InvalidResponse(format!("unknown transaction {:?}", hash)))
        };

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or_else(|_| Err(ProviderError::Timeout(format!("receipt for {:?}", hash)))),
            None => wait.await,
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

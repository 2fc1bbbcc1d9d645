//! Execution engine
//!
//! One run-loop task selects eligible records and hands each one to its own
//! task, never holding more than `max_concurrent` at once. A record stays in
//! the in-flight set from selection until its task ends, including the
//! backoff sleep of a retry, so the loop never picks it twice.

use crate::config::ExecutorConfig;
use crate::error::ProviderError;
use crate::events::{EventBus, TxEvent};
use crate::nonce::NonceLedger;
use crate::provider::Provider;
use crate::queue::TxQueue;
use crate::retry::{is_nonce_error, RetryPolicy};
use crate::types::{Address, GasPricing, PreparedTransaction, TxId, TxReceipt, TxRecord, TxStatus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Why an attempt failed, and whether the transaction reached the node
struct AttemptError {
    error: ProviderError,
    broadcast: bool,
    account: Address,
    auto_nonce: bool,
}

/// Drives queued records through the provider
pub struct TxExecutor {
    queue: Arc<TxQueue>,
    provider: Arc<dyn Provider>,
    events: Arc<EventBus>,
    config: ExecutorConfig,
    policy: RetryPolicy,
    nonces: NonceLedger,
    running: AtomicBool,
    in_flight: Mutex<HashSet<TxId>>,
    wake: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TxExecutor {
    /// Create a stopped executor
    pub fn new(
        queue: Arc<TxQueue>,
        provider: Arc<dyn Provider>,
        events: Arc<EventBus>,
        config: ExecutorConfig,
    ) -> Self {
        let policy = config.retry_policy();
        Self {
            queue,
            provider,
            events,
            config,
            policy,
            nonces: NonceLedger::new(),
            running: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the run loop; false if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        // A loop from an earlier start may still be parked in its wait
        if let Some(old) = self.handle.lock().replace(handle) {
            old.abort();
        }

        tracing::info!("Transaction executor started (max_concurrent={})", self.config.max_concurrent);
        self.events.emit(TxEvent::QueueResumed);
        true
    }

    /// Stop selecting new records; in-flight ones run to completion
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.wake.notify_one();
        tracing::info!("Transaction executor stopped");
        self.events.emit(TxEvent::QueuePaused);
        true
    }

    /// Check if the run loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wake the run loop, e.g. after a submission
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Ids currently handed to workers
    pub fn in_flight_ids(&self) -> HashSet<TxId> {
        self.in_flight.lock().clone()
    }

    /// Number of records currently handed to workers
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Nothing handed to a worker and nothing eligible to pick
    ///
    /// Checked under the in-flight lock so it cannot interleave with a
    /// selection. Records blocked behind a failed dependency do not count.
    pub fn is_quiescent(&self) -> bool {
        let in_flight = self.in_flight.lock();
        in_flight.is_empty() && self.queue.next_eligible_excluding(&in_flight).is_none()
    }

    /// Nonce ledger used for automatic nonces
    pub fn nonce_ledger(&self) -> &NonceLedger {
        &self.nonces
    }

    /// Cancel a record that has not been handed to a worker
    pub fn cancel(&self, id: &TxId) -> bool {
        let cancelled = {
            let in_flight = self.in_flight.lock();
            let dispatched = in_flight.contains(id)
                || self.queue.get(id).is_some_and(|r| r.status.is_in_flight());
            !dispatched && self.queue.cancel(id)
        };

        if cancelled {
            self.events.emit(TxEvent::Cancelled { id: id.clone() });
            self.wake.notify_one();
        }
        cancelled
    }

    /// Put a `Failed` record back in line with a fresh retry budget
    pub fn retry(&self, id: &TxId) -> bool {
        if !self.queue.reset_for_retry(id) {
            return false;
        }
        tracing::info!("Manual retry of transaction {}", id);
        self.wake.notify_one();
        true
    }

    async fn run_loop(self: Arc<Self>) {
        let mut idle_reported = false;

        while self.is_running() {
            match self.select_next() {
                Some(record) => {
                    idle_reported = false;
                    self.spawn_execution(record);
                    continue;
                }
                None => {
                    if !idle_reported && self.in_flight.lock().is_empty() {
                        idle_reported = true;
                        tracing::debug!("Transaction queue idle");
                        self.events.emit(TxEvent::QueueIdle);
                    }
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Pick the next record and claim it, all under the in-flight lock
    fn select_next(&self) -> Option<TxRecord> {
        let record = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.len() >= self.config.max_concurrent {
                return None;
            }
            let record = self.queue.next_eligible_excluding(&in_flight)?;
            in_flight.insert(record.id.clone());
            self.queue.set_status(&record.id, TxStatus::Queued);
            record
        };

        self.log_transition(&record.id, TxStatus::Queued);
        self.events.emit(TxEvent::Queued { id: record.id.clone() });
        Some(record)
    }

    fn spawn_execution(self: &Arc<Self>, record: TxRecord) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let id = record.id.clone();
            this.execute(record).await;
            this.in_flight.lock().remove(&id);
            this.wake.notify_one();
        });
    }

    async fn execute(&self, record: TxRecord) {
        let id = record.id.clone();

        // Cancelled or removed between selection and start
        match self.queue.get(&id) {
            Some(current) if current.status.is_pending() => {}
            _ => return,
        }

        match self.attempt(&record).await {
            Ok(receipt) => {
                self.queue.record_receipt(&id, receipt.clone());
                self.queue.set_status(&id, TxStatus::Confirmed);
                self.log_transition(&id, TxStatus::Confirmed);
                self.events.emit(TxEvent::Confirmed { id, receipt });
            }
            Err(failure) => self.handle_failure(&id, failure).await,
        }
    }

    async fn attempt(&self, record: &TxRecord) -> Result<TxReceipt, AttemptError> {
        let id = &record.id;
        self.queue.set_status(id, TxStatus::Executing);
        self.log_transition(id, TxStatus::Executing);
        self.events.emit(TxEvent::Started { id: id.clone() });

        let account = record.intent.from.unwrap_or_else(|| self.provider.signer());
        let auto_nonce = self.config.auto_nonce && record.intent.nonce.is_none();
        let fail_before_send = |error| AttemptError {
            error,
            broadcast: false,
            account,
            auto_nonce,
        };

        let prepared = self.prepare(record, account).await.map_err(fail_before_send)?;
        let hash = self
            .provider
            .send_transaction(&prepared)
            .await
            .map_err(fail_before_send)?;

        self.queue.record_sent(id, hash);
        self.events.emit(TxEvent::Sent { id: id.clone(), hash });
        self.queue.set_status(id, TxStatus::Confirming);
        self.log_transition(id, TxStatus::Confirming);

        let fail_after_send = |error| AttemptError {
            error,
            broadcast: true,
            account,
            auto_nonce,
        };
        let receipt = self
            .provider
            .wait_for_confirmation(&hash, self.config.confirmations, self.config.confirmation_timeout())
            .await
            .map_err(fail_after_send)?;

        if !receipt.success {
            return Err(fail_after_send(ProviderError::Reverted(format!("{:?}", hash))));
        }
        Ok(receipt)
    }

    /// Fill in nonce, gas limit and pricing; runs fresh on every attempt
    async fn prepare(&self, record: &TxRecord, from: Address) -> Result<PreparedTransaction, ProviderError> {
        let intent = &record.intent;
        let to = intent
            .to
            .ok_or_else(|| ProviderError::Other(format!("transaction {} has no target address", record.id)))?;

        let nonce = match intent.nonce {
            Some(nonce) => Some(nonce),
            None if self.config.auto_nonce => Some(self.nonces.reserve(self.provider.as_ref(), from).await?),
            None => None,
        };

        let gas_limit = match intent.gas_limit {
            Some(limit) => limit,
            None => self.provider.estimate_gas(intent).await?,
        };

        let pricing = match intent.gas_price {
            Some(gas_price) => GasPricing::Legacy { gas_price },
            None if intent.has_fee_market_fields() => GasPricing::DynamicFee {
                max_fee_per_gas: intent.max_fee_per_gas,
                max_priority_fee_per_gas: intent.max_priority_fee_per_gas,
            },
            None => GasPricing::Legacy {
                gas_price: self.provider.gas_price().await?,
            },
        };

        Ok(PreparedTransaction {
            from,
            to,
            value: intent.value,
            data: intent.data.clone(),
            nonce,
            gas_limit,
            pricing,
        })
    }

    async fn handle_failure(&self, id: &TxId, failure: AttemptError) {
        let error = failure.error.to_string();

        // An automatic nonce that never reached the node, or one the node
        // complained about, must be re-read from the chain.
        if failure.auto_nonce && (is_nonce_error(&error) || !failure.broadcast) {
            self.nonces.invalidate(&failure.account).await;
        }

        let Some(record) = self.queue.get(id) else {
            return;
        };

        if self.policy.should_retry(&record, &error) {
            let attempt = self.queue.increment_retry(id).unwrap_or(record.retry_count + 1);
            self.queue.set_status(id, TxStatus::Pending);
            tracing::warn!(
                "Transaction {} failed (attempt {}/{}): {}, retrying",
                id,
                attempt,
                record.max_retries,
                error
            );
            self.events.emit(TxEvent::Retried {
                id: id.clone(),
                attempt,
            });

            let delay = self.policy.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        } else {
            self.queue.record_failure(id, error.clone());
            tracing::error!("Transaction {} failed: {}", id, error);
            self.events.emit(TxEvent::Failed {
                id: id.clone(),
                error,
            });
        }
    }

    fn log_transition(&self, id: &TxId, status: TxStatus) {
        if self.config.debug {
            tracing::info!("Transaction {} -> {}", id, status);
        } else {
            tracing::debug!("Transaction {} -> {}", id, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::provider::MockProvider;
    use crate::retry::RetryStrategy;
    use crate::types::{EnqueueOptions, TxIntent};
    use std::time::Duration;

    fn setup(config: ExecutorConfig) -> (Arc<TxExecutor>, Arc<TxQueue>, Arc<MockProvider>, Arc<EventBus>) {
        let queue = Arc::new(TxQueue::new(config.default_max_retries));
        let provider = Arc::new(MockProvider::new(Address::repeat_byte(0x11)));
        let events = Arc::new(EventBus::new());
        let executor = Arc::new(TxExecutor::new(
            queue.clone(),
            provider.clone(),
            events.clone(),
            config,
        ));
        (executor, queue, provider, events)
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            retry_strategy: RetryStrategy::None,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn intent() -> TxIntent {
        TxIntent::transfer(Address::repeat_byte(0x22), 1u64)
    }

    #[tokio::test]
    async fn test_executor_start_stop() {
        let (executor, _, _, events) = setup(fast_config());
        let mut rx = events.receiver();

        assert!(executor.start());
        assert!(!executor.start());
        assert!(executor.is_running());
        assert!(executor.stop());
        assert!(!executor.stop());
        assert!(!executor.is_running());

        assert_eq!(rx.recv().await.unwrap(), TxEvent::QueueResumed);
        // QueueIdle may be emitted before the pause
        loop {
            let event = rx.recv().await.unwrap();
            if event == TxEvent::QueuePaused {
                break;
            }
            assert_eq!(event, TxEvent::QueueIdle);
        }
    }

    #[tokio::test]
    async fn test_executor_confirms_and_prepares() {
        let (executor, queue, provider, events) = setup(fast_config());
        provider.set_nonce(Address::repeat_byte(0x11), 7);
        let id = queue.enqueue(intent(), EnqueueOptions::new().id("a")).unwrap();

        let waiter = events.wait_for(
            Some(EventKind::Confirmed),
            |_| true,
            Some(Duration::from_secs(5)),
        );
        executor.start();
        waiter.await.unwrap();

        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TxStatus::Confirmed);
        assert!(record.receipt.is_some());
        assert!(record.tx_hash.is_some());

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, Address::repeat_byte(0x11));
        assert_eq!(sent[0].nonce, Some(7));
        assert_eq!(sent[0].gas_limit, 21_000);
        assert_eq!(sent[0].pricing, GasPricing::Legacy { gas_price: 1_000_000_000 });
        executor.stop();
    }

    #[tokio::test]
    async fn test_executor_fee_market_fields_kept() {
        let (executor, queue, provider, events) = setup(fast_config());
        queue
            .enqueue(intent().fees(50, 2).gas_limit(30_000), EnqueueOptions::default())
            .unwrap();

        let waiter = events.wait_for(Some(EventKind::Confirmed), |_| true, Some(Duration::from_secs(5)));
        executor.start();
        waiter.await.unwrap();

        let sent = provider.sent();
        assert_eq!(sent[0].gas_limit, 30_000);
        assert_eq!(
            sent[0].pricing,
            GasPricing::DynamicFee {
                max_fee_per_gas: Some(50),
                max_priority_fee_per_gas: Some(2),
            }
        );
        executor.stop();
    }

    #[tokio::test]
    async fn test_executor_revert_is_permanent() {
        let (executor, queue, provider, events) = setup(fast_config());
        provider.revert_next();
        let id = queue.enqueue(intent(), EnqueueOptions::default()).unwrap();

        let waiter = events.wait_for(Some(EventKind::Failed), |_| true, Some(Duration::from_secs(5)));
        executor.start();
        let event = waiter.await.unwrap();

        match event {
            TxEvent::Failed { error, .. } => assert!(error.contains("execution reverted")),
            other => panic!("unexpected event {:?}", other),
        }
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TxStatus::Failed);
        assert_eq!(record.retry_count, 0);
        assert_eq!(provider.send_attempts(), 1);
        executor.stop();
    }

    #[tokio::test]
    async fn test_executor_nonce_error_invalidates_ledger() {
        let (executor, queue, provider, events) = setup(fast_config());
        let signer = Address::repeat_byte(0x11);
        provider.fail_next_send(ProviderError::Rpc {
            code: -32000,
            message: "nonce too low".to_string(),
        });
        queue.enqueue(intent(), EnqueueOptions::default()).unwrap();

        let waiter = events.wait_for(Some(EventKind::Confirmed), |_| true, Some(Duration::from_secs(5)));
        executor.start();
        waiter.await.unwrap();

        // both attempts used the chain's nonce since the ledger was reset
        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].nonce, Some(0));
        assert_eq!(executor.nonce_ledger().peek(&signer).await, Some(1));
        executor.stop();
    }

    #[tokio::test]
    async fn test_executor_cancel_and_manual_retry() {
        let (executor, queue, _, _) = setup(fast_config());
        let a = queue.enqueue(intent(), EnqueueOptions::new().id("a")).unwrap();
        let b = queue.enqueue(intent(), EnqueueOptions::new().id("b")).unwrap();

        // not started, nothing in flight
        assert!(executor.cancel(&a));
        assert_eq!(queue.get(&a).unwrap().status, TxStatus::Cancelled);
        assert!(!executor.cancel(&TxId::from("missing")));

        queue.set_status(&b, TxStatus::Executing);
        assert!(!executor.cancel(&b));

        assert!(!executor.retry(&b));
        queue.record_failure(&b, "timeout");
        assert!(executor.retry(&b));
        assert_eq!(queue.get(&b).unwrap().status, TxStatus::Pending);
    }
}

//! Submission surface tying queue, executor and events together

use crate::config::ExecutorConfig;
use crate::error::{TxQueueError, TxQueueResult};
use crate::events::{next_matching, EventBus, Received, TxEvent};
use crate::executor::TxExecutor;
use crate::provider::Provider;
use crate::queue::{QueueStats, TxQueue};
use crate::types::{EnqueueOptions, TxId, TxIntent, TxReceipt, TxRecord, TxStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`TxQueueManager`]
#[derive(Default)]
pub struct TxQueueManagerBuilder {
    provider: Option<Arc<dyn Provider>>,
    config: ExecutorConfig,
    events: Option<Arc<EventBus>>,
}

impl TxQueueManagerBuilder {
    /// Set the provider (required)
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing event bus
    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the manager, starting it when `auto_start` is set
    pub fn build(self) -> TxQueueResult<TxQueueManager> {
        let provider = self.provider.ok_or(TxQueueError::MissingProvider)?;
        self.config.validate()?;

        if self.config.auto_start && tokio::runtime::Handle::try_current().is_err() {
            return Err(TxQueueError::NoRuntime);
        }

        let queue = Arc::new(TxQueue::new(self.config.default_max_retries));
        let events = self.events.unwrap_or_default();
        let executor = Arc::new(TxExecutor::new(
            queue.clone(),
            provider,
            events.clone(),
            self.config.clone(),
        ));

        let manager = TxQueueManager {
            queue,
            executor,
            events,
            config: self.config,
        };
        if manager.config.auto_start {
            manager.start();
        }
        Ok(manager)
    }
}

/// Transaction queue manager
pub struct TxQueueManager {
    queue: Arc<TxQueue>,
    executor: Arc<TxExecutor>,
    events: Arc<EventBus>,
    config: ExecutorConfig,
}

impl TxQueueManager {
    /// Start building a manager
    pub fn builder() -> TxQueueManagerBuilder {
        TxQueueManagerBuilder::default()
    }

    /// Enqueue one intent
    pub fn submit(&self, intent: TxIntent, options: EnqueueOptions) -> TxQueueResult<TxId> {
        let id = self.queue.enqueue(intent, options)?;
        self.executor.notify();
        Ok(id)
    }

    /// Enqueue several intents, all or none
    ///
    /// The whole batch lands under one queue lock, so an item may depend on
    /// a later one and nothing runs before the batch is complete.
    pub fn submit_batch(&self, items: Vec<(TxIntent, EnqueueOptions)>) -> TxQueueResult<Vec<TxId>> {
        let items = self.assign_ids(items);
        self.validate_all(&items)?;

        let ids = self.queue.enqueue_batch(items)?;
        tracing::debug!("Submitted batch of {} transactions", ids.len());
        self.executor.notify();
        Ok(ids)
    }

    /// Enqueue intents that must run in order
    ///
    /// Each element depends on its predecessor in addition to its own
    /// declared dependencies.
    pub fn submit_sequence(&self, items: Vec<(TxIntent, EnqueueOptions)>) -> TxQueueResult<Vec<TxId>> {
        let mut items = self.assign_ids(items);
        for i in 1..items.len() {
            if let Some(prev) = items[i - 1].1.id.clone() {
                items[i].1.dependencies.insert(0, prev);
            }
        }
        self.submit_batch(items)
    }

    fn assign_ids(&self, items: Vec<(TxIntent, EnqueueOptions)>) -> Vec<(TxIntent, EnqueueOptions)> {
        items
            .into_iter()
            .map(|(intent, mut options)| {
                options.id.get_or_insert_with(TxId::generate);
                (intent, options)
            })
            .collect()
    }

    fn validate_all(&self, items: &[(TxIntent, EnqueueOptions)]) -> TxQueueResult<()> {
        let mut seen = HashSet::new();
        for (intent, options) in items {
            let report = self.queue.validate(intent, options.id.as_ref());
            if let Some(err) = report.errors.into_iter().next() {
                return Err(err);
            }
            if let Some(id) = &options.id {
                if !seen.insert(id.clone()) {
                    return Err(TxQueueError::DuplicateId(id.clone()));
                }
            }
            for warning in report.warnings {
                tracing::warn!("{}", warning);
            }
        }
        Ok(())
    }

    /// Delete a record that is not in flight
    pub fn remove(&self, id: &TxId) -> TxQueueResult<bool> {
        self.queue.remove(id)
    }

    /// Cancel a record that has not been dispatched
    pub fn cancel(&self, id: &TxId) -> bool {
        self.executor.cancel(id)
    }

    /// Retry a failed record
    pub fn retry(&self, id: &TxId) -> bool {
        self.executor.retry(id)
    }

    /// Change a record's priority
    pub fn reorder(&self, id: &TxId, priority: i64) -> bool {
        let moved = self.queue.reorder(id, priority);
        if moved {
            self.executor.notify();
        }
        moved
    }

    /// Snapshot of one record
    pub fn get(&self, id: &TxId) -> Option<TxRecord> {
        self.queue.get(id)
    }

    /// All records in execution order
    pub fn all(&self) -> Vec<TxRecord> {
        self.queue.all()
    }

    /// Pending or Queued records
    pub fn pending(&self) -> Vec<TxRecord> {
        self.queue.pending()
    }

    /// Executing or Confirming records
    pub fn in_flight(&self) -> Vec<TxRecord> {
        self.queue.in_flight()
    }

    /// Confirmed, Failed or Cancelled records
    pub fn completed(&self) -> Vec<TxRecord> {
        self.queue.completed()
    }

    /// Aggregate statistics
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// id → declared dependencies
    pub fn dependency_graph(&self) -> BTreeMap<TxId, Vec<TxId>> {
        self.queue.dependency_graph()
    }

    /// Start the executor; false if already running
    pub fn start(&self) -> bool {
        self.executor.start()
    }

    /// Stop the executor; false if not running
    pub fn stop(&self) -> bool {
        self.executor.stop()
    }

    /// Check if the executor is running
    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    /// Drop every record that is not in flight
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Event bus
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Underlying queue
    pub fn queue(&self) -> &Arc<TxQueue> {
        &self.queue
    }

    /// Active configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Wait until `id` is confirmed
    ///
    /// Fails with `TxFailed` / `TxCancelled` when the record ends up there,
    /// `Timeout` when `timeout` expires first.
    pub async fn wait_for_confirmation(&self, id: &TxId, timeout: Option<Duration>) -> TxQueueResult<TxReceipt> {
        // Subscribe before reading the status so no transition is missed
        let mut receiver = self.events.receiver();

        let record = self
            .queue
            .get(id)
            .ok_or_else(|| TxQueueError::NotFound(id.clone()))?;
        if let Some(outcome) = settled(&record) {
            return outcome;
        }

        let target = id.clone();
        let is_outcome = move |e: &TxEvent| {
            matches!(
                e,
                TxEvent::Confirmed { .. } | TxEvent::Failed { .. } | TxEvent::Cancelled { .. }
            ) && e.tx_id() == Some(&target)
        };
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let limit_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);

        loop {
            let next = next_matching(&mut receiver, None, &is_outcome);
            let received = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, next)
                    .await
                    .map_err(|_| TxQueueError::Timeout(limit_ms))?,
                None => next.await,
            };

            match received {
                Some(Received::Event(TxEvent::Confirmed { receipt, .. })) => return Ok(receipt),
                Some(Received::Event(TxEvent::Failed { id, error })) => {
                    return Err(TxQueueError::TxFailed { id, reason: error })
                }
                Some(Received::Event(_)) => return Err(TxQueueError::TxCancelled(id.clone())),
                Some(Received::Lagged(skipped)) => {
                    // The outcome may have been among the dropped events
                    tracing::warn!("Waiter for {} lagged by {} events, re-reading status", id, skipped);
                    let record = self
                        .queue
                        .get(id)
                        .ok_or_else(|| TxQueueError::NotFound(id.clone()))?;
                    if let Some(outcome) = settled(&record) {
                        return outcome;
                    }
                }
                None => return Err(TxQueueError::Timeout(limit_ms)),
            }
        }
    }

    /// Wait until nothing is in flight and nothing is eligible to run
    pub async fn wait_for_drain(&self, timeout: Option<Duration>) -> TxQueueResult<()> {
        let mut receiver = self.events.receiver();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let poll = self.config.poll_interval();

        loop {
            if self.executor.is_quiescent() {
                return Ok(());
            }

            let tick = async {
                tokio::select! {
                    _ = receiver.recv() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            };

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, tick).await.is_err() {
                        if self.executor.is_quiescent() {
                            return Ok(());
                        }
                        let ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                        return Err(TxQueueError::Timeout(ms));
                    }
                }
                None => tick.await,
            }
        }
    }
}

impl Drop for TxQueueManager {
    fn drop(&mut self) {
        // The run loop holds its own handle on the executor
        self.executor.stop();
    }
}

/// Outcome for a record that already reached a terminal status
fn settled(record: &TxRecord) -> Option<TxQueueResult<TxReceipt>> {
    match record.status {
        TxStatus::Confirmed => record.receipt.clone().map(Ok),
        TxStatus::Failed => Some(Err(TxQueueError::TxFailed {
            id: record.id.clone(),
            reason: record.error.clone().unwrap_or_default(),
        })),
        TxStatus::Cancelled => Some(Err(TxQueueError::TxCancelled(record.id.clone()))),
        _ => None,
    }
}

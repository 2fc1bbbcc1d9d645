//! Scheduling queue: records, execution order and dependency gating

use crate::error::{TxQueueError, TxQueueResult};
use crate::graph::DependencyGraph;
use crate::types::{now_millis, EnqueueOptions, TxId, TxIntent, TxReceipt, TxRecord, TxStatus};
use parking_lot::RwLock;
use primitive_types::H256;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Aggregate queue statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueueStats {
    /// All records
    pub total: usize,
    /// Pending status
    pub pending: usize,
    /// Queued status
    pub queued: usize,
    /// Executing status
    pub executing: usize,
    /// Confirming status
    pub confirming: usize,
    /// Confirmed status
    pub confirmed: usize,
    /// Failed status
    pub failed: usize,
    /// Cancelled status
    pub cancelled: usize,
    /// Executing + Confirming
    pub in_flight: usize,
    /// Confirmed + Failed + Cancelled
    pub completed: usize,
    /// Mean executed→confirmed latency in ms
    pub avg_confirmation_ms: f64,
    /// Mean gas used over records with a receipt
    pub avg_gas_used: f64,
    /// confirmed / (confirmed + failed), 0 when nothing finished
    pub success_rate: f64,
}

/// Result of a pre-submission check
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    /// Problems that would make `enqueue` fail
    pub errors: Vec<TxQueueError>,
    /// Suspicious but accepted
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// No errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct QueueInner {
    records: HashMap<TxId, TxRecord>,
    /// Non-increasing priority, arrival order among equals
    order: Vec<TxId>,
    graph: DependencyGraph,
}

impl QueueInner {
    fn insert_ordered(&mut self, id: TxId, priority: i64) {
        let records = &self.records;
        let pos = self
            .order
            .iter()
            .position(|other| records.get(other).is_some_and(|r| r.priority < priority))
            .unwrap_or(self.order.len());
        self.order.insert(pos, id);
    }

    fn insert(&mut self, intent: TxIntent, options: EnqueueOptions, default_max_retries: u32) -> TxQueueResult<TxId> {
        let id = options.id.clone().unwrap_or_else(TxId::generate);

        if intent.to.is_none() {
            return Err(TxQueueError::MissingTarget(id));
        }
        if self.records.contains_key(&id) {
            return Err(TxQueueError::DuplicateId(id));
        }

        let mut seen = HashSet::new();
        let dependencies: Vec<TxId> = options
            .dependencies
            .iter()
            .filter(|d| seen.insert((*d).clone()))
            .cloned()
            .collect();

        self.graph.insert(id.clone(), dependencies.clone())?;

        let max_retries = options.max_retries.unwrap_or(default_max_retries);
        let priority = options.priority;
        let options = EnqueueOptions {
            dependencies,
            ..options
        };
        let record = TxRecord::new(id.clone(), intent, options, max_retries);
        self.records.insert(id.clone(), record);
        self.insert_ordered(id.clone(), priority);
        Ok(id)
    }

    fn discard(&mut self, id: &TxId) {
        self.records.remove(id);
        self.order.retain(|o| o != id);
        self.graph.remove(id);
    }

    fn dependencies_satisfied(&self, record: &TxRecord) -> bool {
        record.dependencies.iter().all(|dep| {
            self.records
                .get(dep)
                .map_or(true, |d| d.status.satisfies_dependency())
        })
    }

    fn select(&self, exclude: &HashSet<TxId>) -> Option<&TxRecord> {
        self.order
            .iter()
            .filter(|id| !exclude.contains(*id))
            .filter_map(|id| self.records.get(id))
            .find(|r| r.status.is_pending() && self.dependencies_satisfied(r))
    }

    fn filtered(&self, pred: impl Fn(&TxRecord) -> bool) -> Vec<TxRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }
}

/// Dependency- and priority-aware transaction queue
///
/// All state sits behind one lock; callers only ever see clones.
pub struct TxQueue {
    inner: RwLock<QueueInner>,
    default_max_retries: u32,
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TxQueue {
    /// Create a queue; records enqueued without a ceiling get `default_max_retries`
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            inner: RwLock::new(QueueInner::default()),
            default_max_retries,
        }
    }

    /// Add a record
    pub fn enqueue(&self, intent: TxIntent, options: EnqueueOptions) -> TxQueueResult<TxId> {
        let mut inner = self.inner.write();
        let id = inner.insert(intent, options, self.default_max_retries)?;
        tracing::debug!("Enqueued transaction {}", id);
        Ok(id)
    }

    /// Add several records under one lock, all or none
    ///
    /// Items may depend on later items of the same batch. On the first
    /// rejected item every record added by this call is taken out again.
    pub fn enqueue_batch(&self, items: Vec<(TxIntent, EnqueueOptions)>) -> TxQueueResult<Vec<TxId>> {
        let mut inner = self.inner.write();
        let mut ids = Vec::with_capacity(items.len());

        for (intent, options) in items {
            match inner.insert(intent, options, self.default_max_retries) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids.iter().rev() {
                        inner.discard(id);
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!("Enqueued batch of {} transactions", ids.len());
        Ok(ids)
    }

    /// First runnable record in execution order
    pub fn next_eligible(&self) -> Option<TxRecord> {
        self.next_eligible_excluding(&HashSet::new())
    }

    /// First runnable record whose id is not in `exclude`
    pub fn next_eligible_excluding(&self, exclude: &HashSet<TxId>) -> Option<TxRecord> {
        self.inner.read().select(exclude).cloned()
    }

    /// Move a record to `status`, false if unknown
    pub fn set_status(&self, id: &TxId, status: TxStatus) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner.records.get_mut(id) else {
            return false;
        };

        record.status = status;
        match status {
            TxStatus::Executing => record.executed_at = Some(now_millis()),
            TxStatus::Confirmed => record.confirmed_at = Some(now_millis()),
            _ => {}
        }
        true
    }

    /// Store the hash of a dispatched transaction
    pub fn record_sent(&self, id: &TxId, hash: H256) -> bool {
        self.update(id, |r| r.tx_hash = Some(hash))
    }

    /// Store the receipt of a mined transaction
    pub fn record_receipt(&self, id: &TxId, receipt: TxReceipt) -> bool {
        self.update(id, |r| {
            r.tx_hash = Some(receipt.tx_hash);
            r.receipt = Some(receipt);
        })
    }

    /// Store a terminal error and mark the record `Failed`
    pub fn record_failure(&self, id: &TxId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(id, |r| {
            r.status = TxStatus::Failed;
            r.error = Some(error);
        })
    }

    /// Bump the retry counter, returning the new value
    pub fn increment_retry(&self, id: &TxId) -> Option<u32> {
        let mut inner = self.inner.write();
        inner.records.get_mut(id).map(|r| {
            r.retry_count += 1;
            r.retry_count
        })
    }

    /// Manual retry: `Failed` back to `Pending` with a fresh retry budget
    pub fn reset_for_retry(&self, id: &TxId) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(id) {
            Some(r) if r.status == TxStatus::Failed => {
                r.status = TxStatus::Pending;
                r.error = None;
                r.retry_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Mark `Cancelled`; false when unknown, confirmed or already cancelled
    pub fn cancel(&self, id: &TxId) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(id) {
            Some(r) if !matches!(r.status, TxStatus::Confirmed | TxStatus::Cancelled) => {
                r.status = TxStatus::Cancelled;
                tracing::debug!("Cancelled transaction {}", id);
                true
            }
            _ => false,
        }
    }

    /// Delete a record; refused while it is executing or confirming
    pub fn remove(&self, id: &TxId) -> TxQueueResult<bool> {
        let mut inner = self.inner.write();
        match inner.records.get(id) {
            None => return Ok(false),
            Some(r) if r.status.is_in_flight() => return Err(TxQueueError::InFlight(id.clone())),
            Some(_) => {}
        }

        inner.discard(id);
        tracing::debug!("Removed transaction {}", id);
        Ok(true)
    }

    /// Drop everything except in-flight records
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped: Vec<TxId> = inner
            .records
            .values()
            .filter(|r| !r.status.is_in_flight())
            .map(|r| r.id.clone())
            .collect();

        for id in &dropped {
            inner.records.remove(id);
            inner.graph.remove(id);
        }
        let QueueInner { records, order, .. } = &mut *inner;
        order.retain(|id| records.contains_key(id));

        tracing::debug!("Cleared {} transactions", dropped.len());
    }

    /// Change priority and re-insert into the order, false if unknown
    pub fn reorder(&self, id: &TxId, priority: i64) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(id) {
            Some(r) => r.priority = priority,
            None => return false,
        }
        inner.order.retain(|o| o != id);
        inner.insert_ordered(id.clone(), priority);
        true
    }

    /// Check an intent without enqueueing it
    pub fn validate(&self, intent: &TxIntent, id: Option<&TxId>) -> ValidationReport {
        let mut report = ValidationReport::default();
        let label = id.cloned().unwrap_or_else(|| TxId::new("<new>"));

        if intent.to.is_none() {
            report.errors.push(TxQueueError::MissingTarget(label));
        }
        if let Some(id) = id {
            if self.inner.read().records.contains_key(id) {
                report.errors.push(TxQueueError::DuplicateId(id.clone()));
            }
        }
        if intent.data.is_empty() && intent.value.is_zero() {
            report
                .warnings
                .push("transaction carries no data and no value".to_string());
        }
        report
    }

    /// Snapshot of one record
    pub fn get(&self, id: &TxId) -> Option<TxRecord> {
        self.inner.read().records.get(id).cloned()
    }

    /// All records in execution order
    pub fn all(&self) -> Vec<TxRecord> {
        self.inner.read().filtered(|_| true)
    }

    /// Pending or Queued records
    pub fn pending(&self) -> Vec<TxRecord> {
        self.inner.read().filtered(|r| r.status.is_pending())
    }

    /// Executing or Confirming records
    pub fn in_flight(&self) -> Vec<TxRecord> {
        self.inner.read().filtered(|r| r.status.is_in_flight())
    }

    /// Confirmed, Failed or Cancelled records
    pub fn completed(&self) -> Vec<TxRecord> {
        self.inner.read().filtered(|r| r.status.is_terminal())
    }

    /// id → declared dependencies
    pub fn dependency_graph(&self) -> BTreeMap<TxId, Vec<TxId>> {
        self.inner.read().graph.snapshot()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the queue holds no records
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Whether any record is waiting or in flight
    pub fn has_active(&self) -> bool {
        self.inner
            .read()
            .records
            .values()
            .any(|r| r.status.is_pending() || r.status.is_in_flight())
    }

    /// Aggregate statistics
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.read();
        let mut stats = QueueStats {
            total: inner.records.len(),
            ..Default::default()
        };

        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        let mut gas_sum = 0u64;
        let mut gas_count = 0u64;

        for record in inner.records.values() {
            match record.status {
                TxStatus::Pending => stats.pending += 1,
                TxStatus::Queued => stats.queued += 1,
                TxStatus::Executing => stats.executing += 1,
                TxStatus::Confirming => stats.confirming += 1,
                TxStatus::Confirmed => stats.confirmed += 1,
                TxStatus::Failed => stats.failed += 1,
                TxStatus::Cancelled => stats.cancelled += 1,
            }
            if record.status == TxStatus::Confirmed {
                if let Some(latency) = record.confirmation_latency_ms() {
                    latency_sum += latency;
                    latency_count += 1;
                }
            }
            if let Some(receipt) = &record.receipt {
                gas_sum += receipt.gas_used;
                gas_count += 1;
            }
        }

        stats.in_flight = stats.executing + stats.confirming;
        stats.completed = stats.confirmed + stats.failed + stats.cancelled;
        if latency_count > 0 {
            stats.avg_confirmation_ms = latency_sum as f64 / latency_count as f64;
        }
        if gas_count > 0 {
            stats.avg_gas_used = gas_sum as f64 / gas_count as f64;
        }
        let finished = stats.confirmed + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.confirmed as f64 / finished as f64;
        }
        stats
    }

    fn update(&self, id: &TxId, f: impl FnOnce(&mut TxRecord)) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }
}

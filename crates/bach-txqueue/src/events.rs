//! Lifecycle notifications
//!
//! Two ways to observe the queue:
//!
//! - callbacks registered with [`EventBus::subscribe`] / [`EventBus::once`],
//!   invoked synchronously by `emit` right after the state transition
//! - a `tokio::sync::broadcast` channel for async consumers, which also
//!   backs [`EventBus::wait_for`]

use crate::error::{TxQueueError, TxQueueResult};
use crate::types::{TxId, TxReceipt};
use parking_lot::RwLock;
use primitive_types::H256;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Broadcast buffer size
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Queue lifecycle event
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TxEvent {
    /// Picked for execution
    Queued {
        /// Record id
        id: TxId,
    },
    /// Execution started
    Started {
        /// Record id
        id: TxId,
    },
    /// Broadcast accepted
    Sent {
        /// Record id
        id: TxId,
        /// Transaction hash
        hash: H256,
    },
    /// Mined successfully
    Confirmed {
        /// Record id
        id: TxId,
        /// Receipt
        receipt: TxReceipt,
    },
    /// Gave up
    Failed {
        /// Record id
        id: TxId,
        /// Error text
        error: String,
    },
    /// Scheduled for another attempt
    Retried {
        /// Record id
        id: TxId,
        /// Retry number, 1-based
        attempt: u32,
    },
    /// Cancelled before dispatch
    Cancelled {
        /// Record id
        id: TxId,
    },
    /// Nothing eligible and nothing in flight
    QueueIdle,
    /// Executor stopped
    QueuePaused,
    /// Executor started
    QueueResumed,
}

impl TxEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            TxEvent::Queued { .. } => EventKind::Queued,
            TxEvent::Started { .. } => EventKind::Started,
            TxEvent::Sent { .. } => EventKind::Sent,
            TxEvent::Confirmed { .. } => EventKind::Confirmed,
            TxEvent::Failed { .. } => EventKind::Failed,
            TxEvent::Retried { .. } => EventKind::Retried,
            TxEvent::Cancelled { .. } => EventKind::Cancelled,
            TxEvent::QueueIdle => EventKind::QueueIdle,
            TxEvent::QueuePaused => EventKind::QueuePaused,
            TxEvent::QueueResumed => EventKind::QueueResumed,
        }
    }

    /// Record the event is about, if any
    pub fn tx_id(&self) -> Option<&TxId> {
        match self {
            TxEvent::Queued { id }
            | TxEvent::Started { id }
            | TxEvent::Sent { id, .. }
            | TxEvent::Confirmed { id, .. }
            | TxEvent::Failed { id, .. }
            | TxEvent::Retried { id, .. }
            | TxEvent::Cancelled { id } => Some(id),
            TxEvent::QueueIdle | TxEvent::QueuePaused | TxEvent::QueueResumed => None,
        }
    }
}

/// Event discriminant used for filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`TxEvent::Queued`]
    Queued,
    /// [`TxEvent::Started`]
    Started,
    /// [`TxEvent::Sent`]
    Sent,
    /// [`TxEvent::Confirmed`]
    Confirmed,
    /// [`TxEvent::Failed`]
    Failed,
    /// [`TxEvent::Retried`]
    Retried,
    /// [`TxEvent::Cancelled`]
    Cancelled,
    /// [`TxEvent::QueueIdle`]
    QueueIdle,
    /// [`TxEvent::QueuePaused`]
    QueuePaused,
    /// [`TxEvent::QueueResumed`]
    QueueResumed,
}

/// Handle returned by `subscribe`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&TxEvent) + Send + Sync>;

struct Listener {
    id: SubscriptionId,
    filter: Option<EventKind>,
    once: bool,
    callback: Callback,
}

/// Fan-out of lifecycle events
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<TxEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no listeners
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a callback, `None` filter receives every event
    pub fn subscribe<F>(&self, filter: Option<EventKind>, callback: F) -> SubscriptionId
    where
        F: Fn(&TxEvent) + Send + Sync + 'static,
    {
        self.register(filter, false, Arc::new(callback))
    }

    /// Register a callback removed after its first invocation
    pub fn once<F>(&self, filter: Option<EventKind>, callback: F) -> SubscriptionId
    where
        F: Fn(&TxEvent) + Send + Sync + 'static,
    {
        self.register(filter, true, Arc::new(callback))
    }

    fn register(&self, filter: Option<EventKind>, once: bool, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Listener {
            id,
            filter,
            once,
            callback,
        });
        id
    }

    /// Remove a callback, false if unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// New receiver on the broadcast channel
    pub fn receiver(&self) -> broadcast::Receiver<TxEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event` to callbacks and broadcast receivers
    pub fn emit(&self, event: TxEvent) {
        let kind = event.kind();

        // Collect under the lock, call outside it so callbacks may
        // subscribe or unsubscribe.
        let matched: Vec<Callback> = {
            let mut listeners = self.listeners.write();
            let matched = listeners
                .iter()
                .filter(|l| l.filter.map_or(true, |f| f == kind))
                .map(|l| l.callback.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.filter.map_or(true, |f| f == kind)));
            matched
        };

        for callback in matched {
            callback(&event);
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Wait for the first event of `filter` kind matching `predicate`
    ///
    /// Subscribes immediately, so every event emitted after the call is
    /// seen even if the returned future is polled later.
    pub fn wait_for<P>(
        &self,
        filter: Option<EventKind>,
        predicate: P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = TxQueueResult<TxEvent>> + Send + 'static
    where
        P: Fn(&TxEvent) -> bool + Send + Sync + 'static,
    {
        wait_on(self.receiver(), filter, predicate, timeout)
    }
}

/// What a receiver produced for a waiter
pub(crate) enum Received {
    /// First event passing the filter and predicate
    Event(TxEvent),
    /// The receiver fell behind and this many events were dropped
    Lagged(u64),
}

/// Next matching event, or the lag in between; `None` once the channel closes
pub(crate) async fn next_matching<P>(
    receiver: &mut broadcast::Receiver<TxEvent>,
    filter: Option<EventKind>,
    predicate: &P,
) -> Option<Received>
where
    P: Fn(&TxEvent) -> bool,
{
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if filter.map_or(true, |f| f == event.kind()) && predicate(&event) {
                    return Some(Received::Event(event));
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => return Some(Received::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Wait on an existing receiver; lets callers subscribe before checking state
///
/// Lag is logged and skipped. Callers that can recover the outcome from
/// state use [`next_matching`] instead.
pub(crate) async fn wait_on<P>(
    mut receiver: broadcast::Receiver<TxEvent>,
    filter: Option<EventKind>,
    predicate: P,
    timeout: Option<Duration>,
) -> TxQueueResult<TxEvent>
where
    P: Fn(&TxEvent) -> bool + Send + Sync,
{
    let wait = async move {
        loop {
            match next_matching(&mut receiver, filter, &predicate).await? {
                Received::Event(event) => return Some(event),
                Received::Lagged(skipped) => {
                    tracing::warn!("Event receiver lagged, skipped {} events", skipped);
                }
            }
        }
    };

    let limit_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| TxQueueError::Timeout(limit_ms))?,
        None => wait.await,
    };

    // Sender lives as long as the bus, so a closed channel means shutdown
    received.ok_or(TxQueueError::Timeout(limit_ms))
}

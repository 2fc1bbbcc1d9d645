//! Executor integration tests for bach-txqueue
//!
//! Drives the manager end to end against `MockProvider`.

use bach_txqueue::{
    Address, EnqueueOptions, EventKind, ExecutorConfig, MockProvider, ProviderError, RetryPolicy,
    RetryStrategy, TxEvent, TxId, TxIntent, TxQueueManager, TxStatus, U256,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn signer() -> Address {
    Address::repeat_byte(0x11)
}

fn intent(value: u64) -> TxIntent {
    TxIntent::transfer(Address::repeat_byte(0x22), value)
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        retry_strategy: RetryStrategy::None,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

fn manager_with(provider: Arc<MockProvider>, config: ExecutorConfig) -> TxQueueManager {
    TxQueueManager::builder()
        .provider(provider)
        .config(config)
        .build()
        .unwrap()
}

fn count(manager: &TxQueueManager, kind: EventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    manager.events().subscribe(Some(kind), move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_retry_ceiling() {
    let provider = Arc::new(MockProvider::new(signer()));
    for _ in 0..4 {
        provider.fail_next_send(ProviderError::Transport("connection refused".to_string()));
    }
    let manager = manager_with(provider.clone(), config());
    let retried = count(&manager, EventKind::Retried);
    let failed = count(&manager, EventKind::Failed);

    let id = manager
        .submit(intent(1), EnqueueOptions::new().max_retries(3))
        .unwrap();
    let err = manager.wait_for_confirmation(&id, WAIT).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));

    assert_eq!(retried.load(Ordering::SeqCst), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(provider.send_attempts(), 4);

    let record = manager.get(&id).unwrap();
    assert_eq!(record.status, TxStatus::Failed);
    assert_eq!(record.retry_count, 3);
}

#[tokio::test]
async fn test_insufficient_funds_not_retried() {
    let provider = Arc::new(MockProvider::new(signer()));
    provider.fail_next_send(ProviderError::Rpc {
        code: -32000,
        message: "insufficient funds for gas * price + value".to_string(),
    });
    let manager = manager_with(provider.clone(), config());
    let retried = count(&manager, EventKind::Retried);

    let id = manager.submit(intent(1), EnqueueOptions::default()).unwrap();
    let err = manager.wait_for_confirmation(&id, WAIT).await.unwrap_err();

    match err {
        bach_txqueue::TxQueueError::TxFailed { reason, .. } => {
            assert!(reason.contains("insufficient funds"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(retried.load(Ordering::SeqCst), 0);
    assert_eq!(provider.send_attempts(), 1);
}

#[test]
fn test_exponential_backoff_bounds() {
    let policy = RetryPolicy::new(RetryStrategy::ExponentialBackoff, 100, 5000, 2.0);
    for _ in 0..100 {
        let first = policy.delay(1).as_millis();
        assert!((100..=110).contains(&first), "delay(1) = {}", first);
    }
    assert_eq!(policy.delay(10), Duration::from_millis(5000));
}

#[tokio::test]
async fn test_manual_retry_after_failure() {
    let provider = Arc::new(MockProvider::new(signer()));
    provider.fail_next_send(ProviderError::Other("user rejected the request".to_string()));
    let manager = manager_with(provider.clone(), config());

    let id = manager.submit(intent(1), EnqueueOptions::default()).unwrap();
    assert!(manager.wait_for_confirmation(&id, WAIT).await.is_err());

    assert!(manager.retry(&id));
    let receipt = manager.wait_for_confirmation(&id, WAIT).await.unwrap();
    assert!(receipt.success);
    assert_eq!(provider.send_attempts(), 2);
}

// ==================== End-to-End Tests ====================

#[tokio::test]
async fn test_priority_drain() {
    let provider = Arc::new(MockProvider::new(signer()));
    let manager = manager_with(
        provider.clone(),
        ExecutorConfig {
            auto_start: false,
            ..config()
        },
    );

    let confirmed = Arc::new(Mutex::new(Vec::new()));
    let sink = confirmed.clone();
    manager.events().subscribe(Some(EventKind::Confirmed), move |event| {
        if let Some(id) = event.tx_id() {
            sink.lock().push(id.clone());
        }
    });

    for priority in [1i64, 10, 5] {
        manager
            .submit(
                intent(priority as u64),
                EnqueueOptions::new().id(format!("p{}", priority)).priority(priority),
            )
            .unwrap();
    }

    manager.start();
    manager.wait_for_drain(WAIT).await.unwrap();

    let order: Vec<TxId> = confirmed.lock().clone();
    assert_eq!(order, vec![TxId::from("p10"), TxId::from("p5"), TxId::from("p1")]);

    let values: Vec<U256> = provider.sent().iter().map(|tx| tx.value).collect();
    assert_eq!(values, vec![U256::from(10), U256::from(5), U256::from(1)]);

    let nonces: Vec<Option<u64>> = provider.sent().iter().map(|tx| tx.nonce).collect();
    assert_eq!(nonces, vec![Some(0), Some(1), Some(2)]);

    let stats = manager.stats();
    assert_eq!(stats.confirmed, 3);
    assert_eq!(stats.success_rate, 1.0);
}

#[tokio::test]
async fn test_sequence_with_retryable_failure() {
    let provider = Arc::new(MockProvider::new(signer()));
    provider.fail_next_send(ProviderError::Transport("connection reset by peer".to_string()));
    let manager = manager_with(provider.clone(), config());
    let retried = count(&manager, EventKind::Retried);
    let confirmed = count(&manager, EventKind::Confirmed);

    let ids = manager
        .submit_sequence(vec![
            (intent(1), EnqueueOptions::new().id("approve")),
            (intent(2), EnqueueOptions::new().id("swap")),
        ])
        .unwrap();

    manager.wait_for_drain(WAIT).await.unwrap();

    assert_eq!(retried.load(Ordering::SeqCst), 1);
    assert_eq!(confirmed.load(Ordering::SeqCst), 2);

    let first = manager.get(&ids[0]).unwrap();
    let second = manager.get(&ids[1]).unwrap();
    assert_eq!(first.status, TxStatus::Confirmed);
    assert_eq!(first.retry_count, 1);
    assert_eq!(second.status, TxStatus::Confirmed);
    assert!(first.confirmed_at.unwrap() <= second.executed_at.unwrap());

    let values: Vec<U256> = provider.sent().iter().map(|tx| tx.value).collect();
    assert_eq!(values, vec![U256::from(1), U256::from(2)]);
}

#[tokio::test]
async fn test_failed_dependency_blocks_dependent() {
    let provider = Arc::new(MockProvider::new(signer()));
    provider.revert_next();
    let manager = manager_with(provider.clone(), config());

    let ids = manager
        .submit_sequence(vec![
            (intent(1), EnqueueOptions::default()),
            (intent(2), EnqueueOptions::default()),
        ])
        .unwrap();

    manager.wait_for_drain(WAIT).await.unwrap();

    assert_eq!(manager.get(&ids[0]).unwrap().status, TxStatus::Failed);
    assert_eq!(manager.get(&ids[1]).unwrap().status, TxStatus::Pending);
    assert_eq!(provider.sent().len(), 1);

    // cancelling the failed dependency releases the dependent
    assert!(manager.cancel(&ids[0]));
    manager.wait_for_confirmation(&ids[1], WAIT).await.unwrap();
}

// ==================== Notification Tests ====================

fn record_events(manager: &TxQueueManager, id: &str) -> Arc<Mutex<Vec<TxEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = TxId::from(id);
    manager.events().subscribe(None, move |event| {
        if event.tx_id() == Some(&id) {
            sink.lock().push(event.clone());
        }
    });
    seen
}

fn kinds(events: &[TxEvent]) -> Vec<EventKind> {
    events.iter().map(TxEvent::kind).collect()
}

#[tokio::test]
async fn test_notification_sequence() {
    let provider = Arc::new(MockProvider::new(signer()));
    let manager = manager_with(provider, config());
    let seen = record_events(&manager, "tx");

    let id = manager.submit(intent(1), EnqueueOptions::new().id("tx")).unwrap();
    manager.wait_for_confirmation(&id, WAIT).await.unwrap();

    let events = seen.lock().clone();
    assert_eq!(
        kinds(&events),
        vec![EventKind::Queued, EventKind::Started, EventKind::Sent, EventKind::Confirmed]
    );
    match (&events[2], &events[3]) {
        (TxEvent::Sent { hash, .. }, TxEvent::Confirmed { receipt, .. }) => {
            assert_eq!(receipt.tx_hash, *hash);
            assert!(receipt.success);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[tokio::test]
async fn test_notification_sequence_with_retry() {
    let provider = Arc::new(MockProvider::new(signer()));
    provider.fail_next_send(ProviderError::Transport("connection reset".to_string()));
    let manager = manager_with(provider, config());
    let seen = record_events(&manager, "tx");

    let id = manager.submit(intent(1), EnqueueOptions::new().id("tx")).unwrap();
    manager.wait_for_confirmation(&id, WAIT).await.unwrap();

    let events = seen.lock().clone();
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Queued,
            EventKind::Started,
            EventKind::Retried,
            EventKind::Queued,
            EventKind::Started,
            EventKind::Sent,
            EventKind::Confirmed,
        ]
    );
    assert!(matches!(events[2], TxEvent::Retried { attempt: 1, .. }));
}

#[tokio::test]
async fn test_cancel_notifies_once() {
    let provider = Arc::new(MockProvider::new(signer()));
    let manager = manager_with(
        provider,
        ExecutorConfig {
            auto_start: false,
            ..config()
        },
    );
    let cancelled = count(&manager, EventKind::Cancelled);

    let id = manager.submit(intent(1), EnqueueOptions::new()).unwrap();
    assert!(manager.cancel(&id));
    assert!(!manager.cancel(&id));

    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(manager.get(&id).unwrap().status, TxStatus::Cancelled);
}

// ==================== Concurrency Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_ceiling() {
    let provider = Arc::new(MockProvider::new(signer()).with_latency(Duration::from_millis(20)));
    let manager = manager_with(
        provider.clone(),
        ExecutorConfig {
            max_concurrent: 2,
            ..config()
        },
    );

    for i in 0..6 {
        manager.submit(intent(i), EnqueueOptions::default()).unwrap();
    }
    manager.wait_for_drain(WAIT).await.unwrap();

    assert_eq!(manager.stats().confirmed, 6);
    assert!(provider.peak_in_flight() <= 2);

    let mut nonces: Vec<u64> = provider.sent().iter().filter_map(|tx| tx.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..6).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_idle_emitted_once_per_idle_period() {
    let provider = Arc::new(MockProvider::new(signer()));
    let manager = manager_with(
        provider,
        ExecutorConfig {
            auto_start: false,
            ..config()
        },
    );
    let idle = count(&manager, EventKind::QueueIdle);

    manager.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(idle.load(Ordering::SeqCst), 1);

    let id = manager.submit(intent(1), EnqueueOptions::default()).unwrap();
    manager.wait_for_confirmation(&id, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(idle.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stop_and_resume_events() {
    let provider = Arc::new(MockProvider::new(signer()));
    let manager = manager_with(
        provider,
        ExecutorConfig {
            auto_start: false,
            ..config()
        },
    );

    let mut rx = manager.events().receiver();
    assert!(manager.start());
    assert!(manager.stop());
    assert!(!manager.is_running());

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event != TxEvent::QueueIdle {
            seen.push(event);
        }
    }
    assert_eq!(seen, vec![TxEvent::QueueResumed, TxEvent::QueuePaused]);
}

//! Provider integration tests for bach-txqueue-rpc
//!
//! Runs the queue manager on top of `RpcProvider` + `MockTransport`.

use bach_txqueue::{
    Address, EnqueueOptions, ExecutorConfig, ProviderError, RetryStrategy, TxIntent, TxQueueManager,
    TxStatus,
};
use bach_txqueue_rpc::{MockTransport, RpcProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn signer() -> Address {
    Address::repeat_byte(0x11)
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        retry_strategy: RetryStrategy::None,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

// ==================== Queue over RPC ====================

#[tokio::test]
async fn test_queue_over_mock_rpc() {
    let transport = Arc::new(MockTransport::new());
    transport.set_response("eth_getTransactionCount", json!("0x7"));
    let provider = RpcProvider::with_transport(transport.clone(), signer())
        .poll_interval(Duration::from_millis(5));

    let manager = TxQueueManager::builder()
        .provider(Arc::new(provider))
        .config(config())
        .build()
        .unwrap();

    let id = manager
        .submit(
            TxIntent::transfer(Address::repeat_byte(0x22), 5u64),
            EnqueueOptions::default(),
        )
        .unwrap();
    let receipt = manager
        .wait_for_confirmation(&id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(receipt.success);

    let sends = transport.calls_to("eth_sendTransaction");
    assert_eq!(sends.len(), 1);
    let request = &sends[0][0];
    assert_eq!(request["nonce"], json!("0x7"));
    assert_eq!(request["gas"], json!("0x5208"));
    assert_eq!(request["gasPrice"], json!("0x3b9aca00"));
    assert_eq!(request["value"], json!("0x5"));

    let counts = transport.calls_to("eth_getTransactionCount");
    assert_eq!(counts[0][1], json!("pending"));
}

#[tokio::test]
async fn test_rpc_nonce_error_is_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.push_error(
        "eth_sendTransaction",
        ProviderError::Rpc {
            code: -32000,
            message: "nonce too low".to_string(),
        },
    );
    let provider = RpcProvider::with_transport(transport.clone(), signer())
        .poll_interval(Duration::from_millis(5));

    let manager = TxQueueManager::builder()
        .provider(Arc::new(provider))
        .config(config())
        .build()
        .unwrap();

    let id = manager
        .submit(
            TxIntent::transfer(Address::repeat_byte(0x22), 1u64),
            EnqueueOptions::default(),
        )
        .unwrap();
    manager
        .wait_for_confirmation(&id, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let record = manager.get(&id).unwrap();
    assert_eq!(record.status, TxStatus::Confirmed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(transport.calls_to("eth_sendTransaction").len(), 2);
}

#[tokio::test]
async fn test_confirmation_timeout_surfaces_as_retryable() {
    let transport = Arc::new(MockTransport::new());
    transport.set_response("eth_getTransactionReceipt", Value::Null);
    let provider = RpcProvider::with_transport(transport.clone(), signer())
        .poll_interval(Duration::from_millis(5));

    let manager = TxQueueManager::builder()
        .provider(Arc::new(provider))
        .config(ExecutorConfig {
            confirmation_timeout_ms: Some(30),
            default_max_retries: 1,
            ..config()
        })
        .build()
        .unwrap();

    let id = manager
        .submit(
            TxIntent::transfer(Address::repeat_byte(0x22), 1u64),
            EnqueueOptions::default(),
        )
        .unwrap();
    let err = manager
        .wait_for_confirmation(&id, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"));

    // one retry, then give up
    assert_eq!(transport.calls_to("eth_sendTransaction").len(), 2);
    assert_eq!(manager.get(&id).unwrap().retry_count, 1);
}

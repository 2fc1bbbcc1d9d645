//! # bach-txqueue
//!
//! Dependency-aware transaction queue and executor for a single signer.
//!
//! This crate provides:
//! - Priority ordering with declared dependencies between transactions
//! - A bounded number of concurrent sends
//! - Automatic nonce and gas preparation
//! - Retry with configurable backoff for transient failures
//! - Lifecycle events via callbacks or a broadcast channel
//!
//! ## Architecture
//!
//! ```text
//! +------------------+
//! |  TxQueueManager  |  <- submit / cancel / retry / wait
//! +------------------+
//!          |
//! +------------------+      +-------------+
//! |    TxExecutor    | ---> |  Provider   |  <- sign, send, confirm
//! +------------------+      +-------------+
//!     |          |
//! +---------+ +----------+
//! | TxQueue | | EventBus |
//! +---------+ +----------+
//!     |
//! +-----------------+
//! | DependencyGraph |
//! +-----------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bach_txqueue::{EnqueueOptions, MockProvider, TxIntent, TxQueueManager};
//!
//! let manager = TxQueueManager::builder()
//!     .provider(Arc::new(MockProvider::new(signer)))
//!     .build()?;
//! let approve = manager.submit(TxIntent::call(token, approve_data), EnqueueOptions::new())?;
//! let swap = manager.submit(
//!     TxIntent::call(router, swap_data),
//!     EnqueueOptions::new().depends_on(approve.clone()),
//! )?;
//! manager.wait_for_confirmation(&swap, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod events;
mod executor;
mod graph;
mod manager;
mod nonce;
mod provider;
mod queue;
mod retry;
mod types;

pub use config::ExecutorConfig;
pub use error::{ProviderError, ProviderResult, TxQueueError, TxQueueResult};
pub use events::{EventBus, EventKind, SubscriptionId, TxEvent};
pub use executor::TxExecutor;
pub use graph::DependencyGraph;
pub use manager::{TxQueueManager, TxQueueManagerBuilder};
pub use nonce::NonceLedger;
pub use provider::{MockProvider, Provider};
pub use queue::{QueueStats, TxQueue, ValidationReport};
pub use retry::{classify, is_nonce_error, ErrorClass, RetryPolicy, RetryStrategy};
pub use types::{
    hex_bytes, Address, EnqueueOptions, GasPricing, PreparedTransaction, TxId, TxIntent, TxReceipt,
    TxRecord, TxStatus,
};

pub use primitive_types::{H256, U256};

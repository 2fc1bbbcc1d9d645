//! # bach-txqueue-rpc
//!
//! JSON-RPC [`Provider`](bach_txqueue::Provider) for the transaction queue.
//!
//! ## Features
//!
//! - **RpcProvider**: maps the provider capability set onto `eth_*` calls
//! - **HttpTransport**: JSON-RPC 2.0 over HTTP (feature `http`, on by default)
//! - **MockTransport**: canned responses and scripted errors for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bach_txqueue::{Address, TxQueueManager};
//! use bach_txqueue_rpc::RpcProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signer = Address::repeat_byte(0x11);
//!     let provider = RpcProvider::connect("http://localhost:8545", signer);
//!     let manager = TxQueueManager::builder()
//!         .provider(Arc::new(provider))
//!         .build()?;
//!     manager.wait_for_drain(None).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
mod provider;
mod transport;

pub use provider::RpcProvider;
pub use transport::{deserialize_response, MockTransport, Transport, MOCK_TX_HASH};

#[cfg(feature = "http")]
pub use transport::HttpTransport;

//! Transaction queue error types

use crate::types::TxId;
use thiserror::Error;

/// Errors returned by a [`Provider`](crate::Provider)
///
/// Every provider failure is normalized into one of these variants before it
/// reaches the retry policy, which classifies on the rendered message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport/network error
    #[error("network error: {0}")]
    Transport(String),

    /// RPC error from node
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Confirmation or request timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transaction was mined but execution failed
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// Node returned something we could not decode
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Transaction queue errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxQueueError {
    /// Intent has no recipient
    #[error("transaction {0} has no target address")]
    MissingTarget(TxId),

    /// Identifier already queued
    #[error("transaction {0} already exists")]
    DuplicateId(TxId),

    /// Declared dependencies would close a cycle
    #[error("circular dependency detected involving transaction {0}")]
    CircularDependency(TxId),

    /// Identifier not in the queue
    #[error("transaction {0} not found")]
    NotFound(TxId),

    /// Record is executing or confirming and cannot be touched
    #[error("transaction {0} is in flight")]
    InFlight(TxId),

    /// A wait was abandoned
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Awaited transaction reached `Failed`
    #[error("transaction {id} failed: {reason}")]
    TxFailed {
        /// Record identifier
        id: TxId,
        /// Terminal error text
        reason: String,
    },

    /// Awaited transaction was cancelled
    #[error("transaction {0} was cancelled")]
    TxCancelled(TxId),

    /// Manager built without a provider
    #[error("no provider configured")]
    MissingProvider,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Auto-start requested outside a tokio runtime
    #[error("auto_start requires a running tokio runtime")]
    NoRuntime,

    /// Provider failure surfaced to a caller
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Result type for transaction queue operations
pub type TxQueueResult<T> = Result<T, TxQueueError>;

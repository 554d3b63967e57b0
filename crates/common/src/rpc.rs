//! Node RPC abstraction.
//!
//! This module defines the [`NodeRpc`] trait, the contract between the
//! supervisor and a single Tendermint-compatible node. The trait covers the
//! five operations the guard relies on and nothing more: a connectivity
//! probe, the active validator set, the last committed block's precommit
//! signatures, mempool validation of a transaction, and a synchronous
//! broadcast.
//!
//! # Contract for implementors
//!
//! Implementations MUST:
//! - be thread-safe (`Send + Sync`),
//! - map transport failures to [`RpcError`] rather than panicking,
//! - never retry internally (retry policy belongs to the watcher),
//! - treat the transaction bytes as opaque and immutable.

use async_trait::async_trait;
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors that can occur when talking to a node.
///
/// Application-level rejections (a nonzero `code` in [`TxResult`]) are NOT
/// errors; they are part of the successful response and drive the guard's
/// transaction-validity summary instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Transport-level failure (connection refused, timeout, DNS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The node answered with a non-success HTTP status.
    #[error("http status {0}")]
    Status(u16),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message} {data}")]
    Rpc {
        code: i64,
        message: String,
        data: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

// ════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ════════════════════════════════════════════════════════════════════════════

/// One validator in the active set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Hex consensus address of the validator.
    pub address: String,
    /// Voting power at the queried height. Zero means offline.
    pub voting_power: i64,
}

/// The active validator set at the node's current tip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatorSet {
    /// Height the set was taken at.
    pub block_height: i64,
    /// Validators in the set.
    pub validators: Vec<ValidatorInfo>,
}

/// One precommit signature from a block's last commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSignature {
    /// Hex consensus address of the signer.
    pub validator_address: String,
    /// Base64 signature. Empty means the validator did not sign.
    pub signature: String,
}

/// The last committed block's precommit signatures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockSignatures {
    /// Height of the block the signatures belong to.
    pub height: i64,
    /// Precommit signatures, one entry per set member.
    pub signatures: Vec<ValidatorSignature>,
}

/// Result of `check_tx` or `broadcast_tx_sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    /// Application result code. Zero means accepted.
    pub code: u32,
    /// Namespace of the result code.
    pub codespace: String,
    /// Human-readable log from the application.
    pub log: String,
}

impl TxResult {
    /// An accepted (zero-code) result.
    pub fn accepted() -> Self {
        TxResult {
            code: 0,
            codespace: String::new(),
            log: String::new(),
        }
    }

    /// A rejected result with the given code and log.
    pub fn rejected(code: u32, log: impl Into<String>) -> Self {
        TxResult {
            code,
            codespace: String::new(),
            log: log.into(),
        }
    }

    /// Whether the node accepted the transaction.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NODE RPC TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// The supervisor's view of a single node.
///
/// Object-safe so watchers can hold `Arc<dyn NodeRpc>` and tests can
/// substitute [`crate::MockRpc`].
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Probe node reachability. Any successful HTTP response counts.
    async fn check_connection(&self) -> Result<(), RpcError>;

    /// Fetch the active validator set at the node's current tip.
    async fn validators(&self) -> Result<ValidatorSet, RpcError>;

    /// Fetch the last committed block's precommit signatures.
    async fn block_signatures(&self) -> Result<BlockSignatures, RpcError>;

    /// Validate a transaction against the node's mempool without broadcasting.
    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, RpcError>;

    /// Enqueue a transaction into the node's mempool.
    async fn broadcast_tx_sync(&self, tx: &[u8]) -> Result<TxResult, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_result_is_ok() {
        assert!(TxResult::accepted().is_ok());
        assert!(!TxResult::rejected(5, "insufficient funds").is_ok());
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::Rpc {
            code: -32603,
            message: "Internal error".to_string(),
            data: "height must be greater than 0".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("-32603"));
        assert!(s.contains("Internal error"));
        assert_eq!(RpcError::Status(502).to_string(), "http status 502");
    }
}

//! Mock node implementation for testing.
//!
//! `MockRpc` is a fully in-memory [`NodeRpc`] that can be scripted by tests:
//! the validator set, the current block, and the transaction results are all
//! settable while the watcher runs, and every operation has a failure switch
//! to simulate an unreachable node. No network calls are performed.
//!
//! # Example
//!
//! ```ignore
//! let rpc = MockRpc::new();
//! rpc.set_validator("A0B1C2D3...", 4200, 1);
//! rpc.set_block(1, &[("A0B1C2D3...", true)]);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::rpc::{
    BlockSignatures, NodeRpc, RpcError, TxResult, ValidatorInfo, ValidatorSet,
    ValidatorSignature,
};

/// Scriptable in-memory node for tests.
#[derive(Default)]
pub struct MockRpc {
    validators: RwLock<ValidatorSet>,
    block: RwLock<BlockSignatures>,
    check_tx_result: RwLock<Option<TxResult>>,
    broadcast_result: RwLock<Option<TxResult>>,

    fail_connection: AtomicBool,
    fail_validators: AtomicBool,
    fail_block: AtomicBool,
    fail_check_tx: AtomicBool,
    fail_broadcast: AtomicBool,

    check_tx_calls: AtomicU64,
    broadcast_calls: AtomicU64,
    broadcast_log: Mutex<Vec<Vec<u8>>>,
}

impl MockRpc {
    /// Create a reachable mock with an empty validator set at height 0 and
    /// all transaction results accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole validator set.
    pub fn set_validator_set(&self, set: ValidatorSet) {
        *self.validators.write() = set;
    }

    /// Script a single-validator set at the given height.
    pub fn set_validator(&self, address: &str, voting_power: i64, height: i64) {
        *self.validators.write() = ValidatorSet {
            block_height: height,
            validators: vec![ValidatorInfo {
                address: address.to_string(),
                voting_power,
            }],
        };
    }

    /// Script the current block: height plus `(address, signed)` pairs.
    pub fn set_block(&self, height: i64, signers: &[(&str, bool)]) {
        let signatures = signers
            .iter()
            .map(|(address, signed)| ValidatorSignature {
                validator_address: address.to_string(),
                signature: if *signed {
                    "c2lnbmF0dXJl".to_string()
                } else {
                    String::new()
                },
            })
            .collect();
        *self.block.write() = BlockSignatures { height, signatures };
    }

    /// Script the `check_tx` result. `None` restores the accepted default.
    pub fn set_check_tx_result(&self, result: Option<TxResult>) {
        *self.check_tx_result.write() = result;
    }

    /// Script the `broadcast_tx_sync` result. `None` restores the accepted default.
    pub fn set_broadcast_result(&self, result: Option<TxResult>) {
        *self.broadcast_result.write() = result;
    }

    /// Toggle connectivity-probe failures.
    pub fn set_fail_connection(&self, fail: bool) {
        self.fail_connection.store(fail, Ordering::SeqCst);
    }

    /// Toggle `validators()` failures.
    pub fn set_fail_validators(&self, fail: bool) {
        self.fail_validators.store(fail, Ordering::SeqCst);
    }

    /// Toggle `block_signatures()` failures.
    pub fn set_fail_block(&self, fail: bool) {
        self.fail_block.store(fail, Ordering::SeqCst);
    }

    /// Toggle `check_tx()` failures.
    pub fn set_fail_check_tx(&self, fail: bool) {
        self.fail_check_tx.store(fail, Ordering::SeqCst);
    }

    /// Toggle `broadcast_tx_sync()` failures.
    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::SeqCst);
    }

    /// Number of `check_tx` calls observed.
    pub fn check_tx_calls(&self) -> u64 {
        self.check_tx_calls.load(Ordering::SeqCst)
    }

    /// Number of `broadcast_tx_sync` calls observed.
    pub fn broadcast_calls(&self) -> u64 {
        self.broadcast_calls.load(Ordering::SeqCst)
    }

    /// Every payload passed to `broadcast_tx_sync`, in call order.
    pub fn broadcast_log(&self) -> Vec<Vec<u8>> {
        self.broadcast_log.lock().clone()
    }

    fn network_err(op: &str) -> RpcError {
        RpcError::Network(format!("mock: {} unavailable", op))
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn check_connection(&self) -> Result<(), RpcError> {
        if self.fail_connection.load(Ordering::SeqCst) {
            return Err(Self::network_err("connection"));
        }
        Ok(())
    }

    async fn validators(&self) -> Result<ValidatorSet, RpcError> {
        if self.fail_validators.load(Ordering::SeqCst) {
            return Err(Self::network_err("validators"));
        }
        Ok(self.validators.read().clone())
    }

    async fn block_signatures(&self) -> Result<BlockSignatures, RpcError> {
        if self.fail_block.load(Ordering::SeqCst) {
            return Err(Self::network_err("block"));
        }
        Ok(self.block.read().clone())
    }

    async fn check_tx(&self, _tx: &[u8]) -> Result<TxResult, RpcError> {
        if self.fail_check_tx.load(Ordering::SeqCst) {
            return Err(Self::network_err("check_tx"));
        }
        self.check_tx_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .check_tx_result
            .read()
            .clone()
            .unwrap_or_else(TxResult::accepted))
    }

    async fn broadcast_tx_sync(&self, tx: &[u8]) -> Result<TxResult, RpcError> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(Self::network_err("broadcast_tx_sync"));
        }
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        self.broadcast_log.lock().push(tx.to_vec());
        Ok(self
            .broadcast_result
            .read()
            .clone()
            .unwrap_or_else(TxResult::accepted))
    }
}

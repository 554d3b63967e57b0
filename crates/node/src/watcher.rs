//! Per-node watcher.
//!
//! One watcher per configured endpoint. The watcher owns its RPC client and
//! its copy of the `set_offline` transaction, and runs an infinite
//! connect → query → watch loop:
//!
//! - **Connecting**: probe the node, retry forever with `fallback_pause`
//!   between attempts;
//! - **QueryValidator**: fetch the validator set once and report the guarded
//!   validator's presence;
//! - **Watching**: poll the last block's signatures and the validator set,
//!   feeding every observation to the guard, and re-check the transaction
//!   against the mempool every few new blocks.
//!
//! Any RPC error in the later states falls back to **Connecting**; the
//! watcher must tolerate indefinite transport failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use valguard_common::{GuardConfig, NodeRpc, RpcError};

use crate::guard::Guarder;
use crate::states::WatcherState;

/// Re-check the transaction roughly every this many new blocks.
pub const TX_CHECK_BLOCKS: i64 = 5;

/// Pause between poll iterations. Must stay below the chain's block time so
/// no height is skipped.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ════════════════════════════════════════════════════════════════════════════
// BLOCK COUNTER
// ════════════════════════════════════════════════════════════════════════════

/// Counts strictly-new block heights and trips every `limit` of them.
///
/// The cadence is tied to observed heights, not poll iterations, so polling
/// faster than the chain produces blocks does not inflate it.
#[derive(Debug)]
pub struct BlockCounter {
    last_block: i64,
    counter: i64,
    limit: i64,
}

impl BlockCounter {
    /// Counter that trips every `limit` new blocks.
    pub fn new(limit: i64) -> Self {
        BlockCounter {
            last_block: 0,
            counter: 0,
            limit,
        }
    }

    /// Feed an observed height. Returns `true` when the counter trips, after
    /// which it resets.
    pub fn increment(&mut self, block: i64) -> bool {
        if block > self.last_block {
            self.last_block = block;
            self.counter += 1;
        }
        if self.counter >= self.limit {
            self.counter = 0;
            return true;
        }
        false
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WATCHER
// ════════════════════════════════════════════════════════════════════════════

/// Independent observer of one node. See the module docs.
pub struct Watcher {
    node: String,
    config: GuardConfig,
    guard: Arc<dyn Guarder>,
    client: Arc<dyn NodeRpc>,
    poll_interval: Duration,

    running: AtomicBool,
    shutdown: Notify,
    state: RwLock<WatcherState>,
    tx_data: Mutex<Option<Vec<u8>>>,
}

impl Watcher {
    /// Create a watcher for `node`, reporting into `guard` through `client`.
    pub fn new(
        node: impl Into<String>,
        config: GuardConfig,
        guard: Arc<dyn Guarder>,
        client: Arc<dyn NodeRpc>,
    ) -> Arc<Self> {
        Self::with_poll_interval(node, config, guard, client, DEFAULT_POLL_INTERVAL)
    }

    /// Create a watcher with a custom poll interval. Intended for tests
    /// against mock nodes; the daemon uses [`Watcher::new`].
    pub fn with_poll_interval(
        node: impl Into<String>,
        config: GuardConfig,
        guard: Arc<dyn Guarder>,
        client: Arc<dyn NodeRpc>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Watcher {
            node: node.into(),
            config,
            guard,
            client,
            poll_interval,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            state: RwLock::new(WatcherState::Connecting),
            tx_data: Mutex::new(None),
        })
    }

    /// The endpoint this watcher observes.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Current watcher state.
    pub fn state(&self) -> WatcherState {
        *self.state.read()
    }

    /// Install (or clear) this watcher's copy of the transaction bytes.
    pub fn set_tx_data(&self, tx: Option<Vec<u8>>) {
        *self.tx_data.lock() = tx;
    }

    /// Request a cooperative stop; in-flight RPC calls finish first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.write() = state;
    }

    /// Start the watcher loop in its own task.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        info!("[{}] watcher started", self.node);
        let mut counter = BlockCounter::new(TX_CHECK_BLOCKS);
        let mut last_signature_height: i64 = 0;
        self.set_state(WatcherState::Connecting);

        while self.is_running() {
            match self.state() {
                WatcherState::Connecting => {
                    last_signature_height = 0;
                    self.guard.report_watcher(&self.node, WatcherState::Connecting);
                    match self.client.check_connection().await {
                        Ok(()) => self.set_state(WatcherState::QueryValidator),
                        Err(e) => {
                            error!("[{}] error in connecting: {}", self.node, e);
                            self.pause(Duration::from_secs(self.config.fallback_pause)).await;
                        }
                    }
                }
                WatcherState::QueryValidator => {
                    self.guard.report_watcher(&self.node, WatcherState::QueryValidator);
                    match self.query_validator_set().await {
                        Ok(()) => self.set_state(WatcherState::Watching),
                        Err(e) => {
                            error!("[{}] query validator set: {}", self.node, e);
                            self.set_state(WatcherState::Connecting);
                        }
                    }
                }
                WatcherState::Watching => {
                    self.guard.report_watcher(&self.node, WatcherState::Watching);
                    self.watch(&mut counter, &mut last_signature_height).await;
                }
            }
        }
        info!("[{}] watcher stopped", self.node);
    }

    /// Tight polling loop. Returns (after flipping back to `Connecting`)
    /// when an RPC call fails, or when the watcher is stopped.
    async fn watch(&self, counter: &mut BlockCounter, last_signature_height: &mut i64) {
        while self.is_running() {
            if let Err(e) = self.poll_once(counter, last_signature_height).await {
                error!("[{}] watch: {}", self.node, e);
                self.set_state(WatcherState::Connecting);
                return;
            }
            self.pause(self.poll_interval).await;
        }
    }

    /// One poll iteration: block signatures, validator set, and the periodic
    /// transaction re-check.
    async fn poll_once(
        &self,
        counter: &mut BlockCounter,
        last_signature_height: &mut i64,
    ) -> Result<(), RpcError> {
        let block = self.client.block_signatures().await?;
        if block.height > *last_signature_height {
            *last_signature_height = block.height;
            let signed = block
                .signatures
                .iter()
                .find(|s| {
                    s.validator_address
                        .eq_ignore_ascii_case(&self.config.validator_address)
                })
                .map(|s| !s.signature.is_empty())
                .unwrap_or(false);
            debug!("[{}] new block {} signed={}", self.node, block.height, signed);
            self.guard.set_sign(block.height, signed);
        }

        let set = self.client.validators().await?;
        let online = set
            .validators
            .iter()
            .find(|v| {
                v.address
                    .eq_ignore_ascii_case(&self.config.validator_address)
            })
            .map(|v| v.voting_power > 0)
            .unwrap_or(false);
        self.guard
            .report_validator_online(&self.node, set.block_height, online);

        if counter.increment(block.height) {
            self.check_tx_data().await;
        }
        Ok(())
    }

    /// Fetch the validator set once and report the guarded validator's
    /// presence. A validator missing from the set is reported offline.
    async fn query_validator_set(&self) -> Result<(), RpcError> {
        let set = self.client.validators().await?;
        info!(
            "[{}] retrieved validator set for block {} ({} validators)",
            self.node,
            set.block_height,
            set.validators.len()
        );
        for v in &set.validators {
            if v.address
                .eq_ignore_ascii_case(&self.config.validator_address)
            {
                self.guard
                    .report_validator_online(&self.node, set.block_height, v.voting_power > 0);
                return Ok(());
            }
        }
        self.guard
            .report_validator_online(&self.node, set.block_height, false);
        Ok(())
    }

    /// Re-check the transaction against the node's mempool and report the
    /// outcome. Transport failures are logged and absorbed here; they do not
    /// tear down the watch loop.
    async fn check_tx_data(&self) {
        let tx = self.tx_data.lock().clone();
        let Some(tx) = tx else {
            error!("[{}] set_offline transaction is empty", self.node);
            self.guard.report_tx_validity(&self.node, false);
            return;
        };
        match self.client.check_tx(&tx).await {
            Err(e) => {
                error!("[{}] check_tx: {}", self.node, e);
            }
            Ok(res) if !res.is_ok() => {
                error!(
                    "[{}] check set_offline transaction: code={}, codespace={}, log={}",
                    self.node, res.code, res.codespace, res.log
                );
                self.guard.report_tx_validity(&self.node, false);
            }
            Ok(_) => {
                info!("[{}] check set_offline transaction ok", self.node);
                self.guard.report_tx_validity(&self.node, true);
            }
        }
    }

    /// Broadcast the `set_offline` transaction.
    ///
    /// A no-op when there is no transaction or the watcher is not watching.
    /// The transaction bytes are cleared after the attempt regardless of the
    /// node's answer, so each watcher broadcasts at most once per arming.
    pub async fn send_offline(&self) {
        let tx = self.tx_data.lock().clone();
        let Some(tx) = tx else {
            error!("[{}] set_offline transaction is empty", self.node);
            return;
        };
        if self.state() != WatcherState::Watching {
            error!("[{}] watcher not watching, skipping broadcast", self.node);
            return;
        }
        match self.client.broadcast_tx_sync(&tx).await {
            Err(e) => {
                error!("[{}] broadcast_tx_sync: {}", self.node, e);
            }
            Ok(res) => {
                if !res.is_ok() {
                    error!(
                        "[{}] broadcast_tx_sync set_offline: code={}, codespace={}, log={}",
                        self.node, res.code, res.codespace, res.log
                    );
                } else {
                    info!("[{}] broadcast_tx_sync successful", self.node);
                }
            }
        }
        *self.tx_data.lock() = None;
    }

    /// Sleep that wakes early on shutdown.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = sleep(duration) => {}
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use valguard_common::{MockRpc, TxResult};

    const ADDR: &str = "A0B1C2D3E4F5061728394A5B6C7D8E9F0A1B2C3D";
    const OTHER: &str = "AAAA0000000000000000000000000000000000AA";

    /// Recording stub for the guard side of the seam.
    #[derive(Default)]
    struct RecordingGuard {
        watcher_states: PlMutex<Vec<(String, WatcherState)>>,
        tx_validity: PlMutex<Vec<(String, bool)>>,
        validator_online: PlMutex<Vec<(String, i64, bool)>>,
        signs: PlMutex<Vec<(i64, bool)>>,
    }

    impl RecordingGuard {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn last_watcher_state(&self) -> Option<WatcherState> {
            self.watcher_states.lock().last().map(|(_, s)| *s)
        }

        fn last_online(&self) -> Option<(i64, bool)> {
            self.validator_online.lock().last().map(|(_, h, o)| (*h, *o))
        }
    }

    impl Guarder for RecordingGuard {
        fn report_watcher(&self, node: &str, state: WatcherState) {
            self.watcher_states.lock().push((node.to_string(), state));
        }
        fn report_tx_validity(&self, node: &str, valid: bool) {
            self.tx_validity.lock().push((node.to_string(), valid));
        }
        fn report_validator_online(&self, node: &str, height: i64, online: bool) {
            self.validator_online
                .lock()
                .push((node.to_string(), height, online));
        }
        fn set_sign(&self, height: i64, signed: bool) {
            self.signs.lock().push((height, signed));
        }
    }

    fn test_config() -> GuardConfig {
        GuardConfig {
            nodes_endpoints: vec!["http://mock".to_string()],
            validator_address: ADDR.to_string(),
            fallback_pause: 0,
            ..GuardConfig::default()
        }
    }

    fn fast_watcher(
        guard: Arc<RecordingGuard>,
        rpc: Arc<MockRpc>,
    ) -> Arc<Watcher> {
        Watcher::with_poll_interval(
            "http://mock",
            test_config(),
            guard,
            rpc,
            Duration::from_millis(5),
        )
    }

    async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn test_block_counter_trips_every_limit_new_blocks() {
        let mut counter = BlockCounter::new(5);
        for height in 1..=4 {
            assert!(!counter.increment(height));
        }
        assert!(counter.increment(5));
        // reset: the next four do not trip
        for height in 6..=9 {
            assert!(!counter.increment(height));
        }
        assert!(counter.increment(10));
    }

    #[test]
    fn test_block_counter_ignores_repeats_and_old_heights() {
        let mut counter = BlockCounter::new(3);
        assert!(!counter.increment(7));
        for _ in 0..10 {
            assert!(!counter.increment(7));
        }
        assert!(!counter.increment(3));
        assert!(!counter.increment(8));
        assert!(counter.increment(9));
    }

    #[tokio::test]
    async fn test_watcher_reaches_watching_and_reports() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_validator(ADDR, 4200, 1);
        rpc.set_block(1, &[(ADDR, true), (OTHER, false)]);

        let watcher = fast_watcher(guard.clone(), rpc);
        let handle = Arc::clone(&watcher).start();

        wait_until(
            || guard.last_watcher_state() == Some(WatcherState::Watching),
            "watching report",
        )
        .await;
        wait_until(|| !guard.signs.lock().is_empty(), "sign report").await;

        assert_eq!(guard.signs.lock()[0], (1, true));
        assert_eq!(guard.last_online(), Some((1, true)));
        // lifecycle went through connecting and query_validator first
        let states: Vec<WatcherState> =
            guard.watcher_states.lock().iter().map(|(_, s)| *s).collect();
        assert!(states.contains(&WatcherState::Connecting));
        assert!(states.contains(&WatcherState::QueryValidator));

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_watcher_case_insensitive_address_match() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_validator(&ADDR.to_lowercase(), 10, 3);
        rpc.set_block(3, &[(&ADDR.to_lowercase(), true)]);

        let watcher = fast_watcher(guard.clone(), rpc);
        let handle = Arc::clone(&watcher).start();

        wait_until(|| !guard.signs.lock().is_empty(), "sign report").await;
        assert_eq!(guard.signs.lock()[0], (3, true));
        assert_eq!(guard.last_online(), Some((3, true)));

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_watcher_reports_offline_when_absent_or_powerless() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        // guarded validator not in the set at all
        rpc.set_validator(OTHER, 10, 2);
        rpc.set_block(2, &[(OTHER, true)]);

        let watcher = fast_watcher(guard.clone(), rpc.clone());
        let handle = Arc::clone(&watcher).start();

        wait_until(|| guard.last_online() == Some((2, false)), "offline report").await;
        // unsigned for the guarded validator: not present in signatures
        wait_until(|| !guard.signs.lock().is_empty(), "sign report").await;
        assert_eq!(guard.signs.lock()[0], (2, false));

        // present but with zero power is also offline
        rpc.set_validator(ADDR, 0, 3);
        wait_until(|| guard.last_online() == Some((3, false)), "zero power report").await;

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_watcher_retries_until_node_reachable() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_fail_connection(true);
        rpc.set_validator(ADDR, 10, 1);
        rpc.set_block(1, &[(ADDR, true)]);

        let watcher = fast_watcher(guard.clone(), rpc.clone());
        let handle = Arc::clone(&watcher).start();

        // stays in connecting while the probe fails
        wait_until(
            || guard.watcher_states.lock().len() >= 3,
            "repeated connecting reports",
        )
        .await;
        assert_eq!(guard.last_watcher_state(), Some(WatcherState::Connecting));

        rpc.set_fail_connection(false);
        wait_until(
            || guard.last_watcher_state() == Some(WatcherState::Watching),
            "recovery to watching",
        )
        .await;

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_watcher_falls_back_on_rpc_error() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_validator(ADDR, 10, 1);
        rpc.set_block(1, &[(ADDR, true)]);

        let watcher = fast_watcher(guard.clone(), rpc.clone());
        let handle = Arc::clone(&watcher).start();
        wait_until(
            || guard.last_watcher_state() == Some(WatcherState::Watching),
            "watching",
        )
        .await;

        // block queries start failing: watcher must fall back to connecting
        rpc.set_fail_block(true);
        wait_until(
            || guard.last_watcher_state() == Some(WatcherState::Connecting),
            "fallback to connecting",
        )
        .await;

        // and recover once the node answers again
        rpc.set_fail_block(false);
        wait_until(
            || guard.last_watcher_state() == Some(WatcherState::Watching),
            "recovery",
        )
        .await;

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_tx_recheck_cadence_and_validity_reports() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_validator(ADDR, 10, 1);
        rpc.set_block(1, &[(ADDR, true)]);

        let watcher = fast_watcher(guard.clone(), rpc.clone());
        watcher.set_tx_data(Some(vec![0xde, 0xad]));
        let handle = Arc::clone(&watcher).start();

        // five new heights trip the counter once
        for height in 2..=5 {
            wait_until(
                || guard.signs.lock().last() == Some(&(height - 1, true)),
                "previous height observed",
            )
            .await;
            rpc.set_block(height, &[(ADDR, true)]);
        }
        wait_until(|| rpc.check_tx_calls() >= 1, "check_tx call").await;
        wait_until(|| !guard.tx_validity.lock().is_empty(), "validity report").await;
        assert_eq!(guard.tx_validity.lock()[0].1, true);

        // a rejecting mempool flips the report to invalid on the next trip
        rpc.set_check_tx_result(Some(TxResult::rejected(7, "validator not found")));
        for height in 6..=10 {
            wait_until(
                || guard.signs.lock().last() == Some(&(height - 1, true)),
                "previous height observed",
            )
            .await;
            rpc.set_block(height, &[(ADDR, true)]);
        }
        wait_until(
            || guard.tx_validity.lock().last() == Some(&("http://mock".to_string(), false)),
            "invalid report",
        )
        .await;

        watcher.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_send_offline_broadcasts_at_most_once() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        let watcher = fast_watcher(guard, rpc.clone());
        watcher.set_tx_data(Some(vec![0x01, 0x02, 0x03]));
        watcher.set_state(WatcherState::Watching);

        watcher.send_offline().await;
        assert_eq!(rpc.broadcast_calls(), 1);
        assert_eq!(rpc.broadcast_log(), vec![vec![0x01, 0x02, 0x03]]);

        // the transaction was consumed: a second call is a no-op
        watcher.send_offline().await;
        assert_eq!(rpc.broadcast_calls(), 1);
    }

    #[tokio::test]
    async fn test_send_offline_requires_watching_state() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        let watcher = fast_watcher(guard, rpc.clone());
        watcher.set_tx_data(Some(vec![0x01]));

        // still connecting: no broadcast, transaction retained
        watcher.send_offline().await;
        assert_eq!(rpc.broadcast_calls(), 0);
        assert!(watcher.tx_data.lock().is_some());
    }

    #[tokio::test]
    async fn test_send_offline_without_tx_is_noop() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        let watcher = fast_watcher(guard, rpc.clone());
        watcher.set_state(WatcherState::Watching);

        watcher.send_offline().await;
        assert_eq!(rpc.broadcast_calls(), 0);
    }

    #[tokio::test]
    async fn test_send_offline_clears_tx_even_on_rejection() {
        let guard = RecordingGuard::new();
        let rpc = Arc::new(MockRpc::new());
        rpc.set_broadcast_result(Some(TxResult::rejected(4, "sequence mismatch")));
        let watcher = fast_watcher(guard, rpc.clone());
        watcher.set_tx_data(Some(vec![0x01]));
        watcher.set_state(WatcherState::Watching);

        watcher.send_offline().await;
        assert_eq!(rpc.broadcast_calls(), 1);
        assert!(watcher.tx_data.lock().is_none());
    }
}

//! Guard state machine.
//!
//! The guard is the single aggregator behind all watchers. Watchers report
//! through the [`Guarder`] capability; reports become [`GuardEvent`]s on a
//! bounded channel consumed by one event loop. The loop folds per-node facts
//! into summaries and walks the state machine:
//!
//! ```text
//! Starting ──▶ Connecting ──▶ Watching ◀──▶ ValidatorIsOffline
//!    ▲                           │ ▲
//!    │                           │ └──────▶ WatchingWithoutTx
//!    └──────── skip-sign fired ──┘
//! ```
//!
//! `Watching` is the only armed state: when the sliding signature window
//! accumulates `missed_blocks_limit` misses, a `SkipSign` event latches and
//! the next loop turn invokes the offline callback exactly once, then
//! returns to `Starting`.
//!
//! ## Summaries
//!
//! - watcher summary is optimistic: one watching node is enough;
//! - transaction summary is pessimistic: one rejecting node marks it stale;
//! - validator-online keeps the last report at or above the current height.
//!
//! ## Locking
//!
//! `set_sign` runs on watcher tasks and only takes the sign-window mutex;
//! everything else it needs (`validator_online`, `current_height`) is
//! mirrored in atomics. The event loop and the status snapshot take the
//! aggregate lock first and the window mutex second, so the two locks are
//! always acquired in the same order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use valguard_common::GuardConfig;

use crate::events::GuardEvent;
use crate::states::{GlobalState, TxState, WatcherState};
use crate::status::StatusSnapshot;

/// Capacity of the guard's event channel. Sized so normal operation never
/// fills it; on overflow events are dropped, not blocked on — the next
/// report restores truth.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// How long the event loop waits for an event before re-checking the
/// running flag.
const EVENT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// The capability watchers use to report into the guard.
///
/// All methods are non-blocking: they enqueue onto the event channel when
/// the guard is running and silently drop otherwise.
pub trait Guarder: Send + Sync {
    /// Report a watcher lifecycle change.
    fn report_watcher(&self, node: &str, state: WatcherState);
    /// Report whether a node accepts the `set_offline` transaction.
    fn report_tx_validity(&self, node: &str, valid: bool);
    /// Report the validator's presence at a height. Reports below the
    /// current height are dropped.
    fn report_validator_online(&self, node: &str, height: i64, online: bool);
    /// Record whether the validator signed a newly observed block.
    fn set_sign(&self, height: i64, signed: bool);
}

/// Async callback invoked exactly once per arming when the guard decides to
/// take the validator offline.
pub type OfflineCallback = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Sign-window state shared between `set_sign` callers and the snapshot.
struct SignState {
    /// Slot `height % window` holds whether that block was signed.
    window: Vec<bool>,
    /// Highest height observed; only strictly increasing updates accepted.
    current_height: i64,
    /// When the last new height was accepted.
    last_height_update: Instant,
}

/// Aggregated per-node facts, written only by the event loop.
struct Aggregate {
    state: GlobalState,
    watchers: HashMap<String, WatcherState>,
    tx_valid: HashMap<String, TxState>,
    skip_sign: bool,
}

/// The guard state machine. See the module docs for the big picture.
pub struct Guard {
    config: GuardConfig,
    events_tx: mpsc::Sender<GuardEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<GuardEvent>>>,
    running: AtomicBool,
    /// Mirror of `SignState::current_height` for lock-free reads.
    current_height: AtomicI64,
    /// Summary validator presence, written by the event loop.
    validator_online: AtomicBool,
    sign: Mutex<SignState>,
    agg: RwLock<Aggregate>,
    offline: OfflineCallback,
}

impl Guard {
    /// Create a guard. `offline` is invoked on the firing transition; in the
    /// daemon it broadcasts `set_offline` through every watcher.
    pub fn new(config: GuardConfig, offline: OfflineCallback) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let window = vec![true; config.missed_blocks_window];
        Arc::new(Guard {
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            running: AtomicBool::new(false),
            current_height: AtomicI64::new(0),
            validator_online: AtomicBool::new(false),
            sign: Mutex::new(SignState {
                window,
                current_height: 0,
                last_height_update: Instant::now(),
            }),
            agg: RwLock::new(Aggregate {
                state: GlobalState::Starting,
                watchers: HashMap::new(),
                tx_valid: HashMap::new(),
                skip_sign: false,
            }),
            offline,
        })
    }

    /// Start the event loop in its own task. The running flag is set before
    /// this returns, so reports enqueued afterwards are not lost.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        self.agg.write().state = GlobalState::Starting;
        tokio::spawn(async move { self.run_loop().await })
    }

    /// Request a cooperative stop. The loop exits at its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the event loop is accepting reports.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current guard state.
    pub fn state(&self) -> GlobalState {
        self.agg.read().state
    }

    /// Highest block height accepted through `set_sign`.
    pub fn current_height(&self) -> i64 {
        self.current_height.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>) {
        let mut rx = match self.events_rx.lock().take() {
            Some(rx) => rx,
            None => {
                error!("guard event loop started twice");
                return;
            }
        };
        info!("guard event loop started");
        while self.is_running() {
            match timeout(EVENT_READ_TIMEOUT, rx.recv()).await {
                Ok(Some(ev)) => self.process_event(ev).await,
                // The guard holds a sender for SkipSign, so the channel can
                // only close on teardown.
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        info!("guard event loop stopped");
    }

    /// Apply one event: update the per-node maps and flags, then run the
    /// transition table. Invokes the offline callback when the transition
    /// out of `Watching` fires.
    async fn process_event(&self, ev: GuardEvent) {
        let fire = {
            let mut agg = self.agg.write();
            match &ev {
                GuardEvent::WatcherState { node, state } => {
                    agg.watchers.insert(node.clone(), *state);
                }
                GuardEvent::TxValidity { node, valid } => {
                    let tx = if *valid { TxState::Valid } else { TxState::Invalid };
                    agg.tx_valid.insert(node.clone(), tx);
                }
                GuardEvent::ValidatorOnline { height, online, .. } => {
                    if *height >= self.current_height.load(Ordering::SeqCst) {
                        self.validator_online.store(*online, Ordering::SeqCst);
                    }
                }
                GuardEvent::SkipSign => {
                    agg.skip_sign = true;
                }
            }
            self.transition(&mut agg)
        };
        if fire {
            info!("guard: send set_offline");
            (self.offline)().await;
        }
    }

    /// The transition table. Returns whether the offline callback must fire.
    fn transition(&self, agg: &mut Aggregate) -> bool {
        let watchers = summary_watcher_state(agg);
        let tx = summary_tx_validity(agg);
        let online = self.validator_online.load(Ordering::SeqCst);

        match agg.state {
            GlobalState::Starting => {
                if watchers == WatcherState::Connecting {
                    debug!("guard state transition starting->connecting");
                    agg.state = GlobalState::Connecting;
                } else if watchers == WatcherState::Watching {
                    self.reset_window();
                    agg.skip_sign = false;
                    agg.state = GlobalState::Watching;
                    if !online && tx == TxState::Valid {
                        debug!("guard state transition starting->validator_is_offline");
                        agg.state = GlobalState::ValidatorIsOffline;
                    }
                    if tx == TxState::Invalid {
                        debug!("guard state transition starting->watching_without_tx");
                        agg.state = GlobalState::WatchingWithoutTx;
                    }
                }
            }
            GlobalState::Connecting => {
                if watchers == WatcherState::Watching && online && tx == TxState::Valid {
                    debug!("guard state transition connecting->watching");
                    agg.state = GlobalState::Watching;
                } else if watchers == WatcherState::Watching && !online && tx == TxState::Valid {
                    debug!("guard state transition connecting->validator_is_offline");
                    agg.state = GlobalState::ValidatorIsOffline;
                } else if watchers == WatcherState::Watching && tx != TxState::Valid {
                    debug!("guard state transition connecting->watching_without_tx");
                    agg.state = GlobalState::WatchingWithoutTx;
                }
            }
            GlobalState::Watching => {
                if watchers == WatcherState::Connecting {
                    debug!("guard state transition watching->connecting");
                    agg.state = GlobalState::Connecting;
                } else if tx != TxState::Valid {
                    debug!("guard state transition watching->watching_without_tx");
                    agg.state = GlobalState::WatchingWithoutTx;
                } else if !online {
                    debug!("guard state transition watching->validator_is_offline");
                    agg.state = GlobalState::ValidatorIsOffline;
                } else if agg.skip_sign {
                    debug!("guard state transition watching->starting");
                    agg.state = GlobalState::Starting;
                    return true;
                }
            }
            GlobalState::ValidatorIsOffline => {
                if watchers == WatcherState::Connecting {
                    debug!("guard state transition validator_is_offline->connecting");
                    agg.state = GlobalState::Connecting;
                } else if tx == TxState::Valid && online {
                    debug!("guard state transition validator_is_offline->watching");
                    agg.state = GlobalState::Watching;
                }
            }
            GlobalState::WatchingWithoutTx => {
                if watchers == WatcherState::Connecting {
                    debug!("guard state transition watching_without_tx->connecting");
                    agg.state = GlobalState::Connecting;
                } else if tx == TxState::Valid && online {
                    debug!("guard state transition watching_without_tx->watching");
                    agg.state = GlobalState::Watching;
                } else if tx == TxState::Valid && !online {
                    debug!("guard state transition watching_without_tx->validator_is_offline");
                    agg.state = GlobalState::ValidatorIsOffline;
                } else if online && tx == TxState::Invalid {
                    error!(
                        "validator is online, but the set_offline transaction is invalid! \
                         the validator cannot be protected from slashing"
                    );
                }
            }
        }
        false
    }

    /// Mark every slot of the signature window as signed.
    fn reset_window(&self) {
        let mut sign = self.sign.lock();
        for slot in sign.window.iter_mut() {
            *slot = true;
        }
    }

    /// Count of unsigned slots in the window.
    fn missed_count(&self) -> usize {
        self.sign.lock().window.iter().filter(|s| !**s).count()
    }

    fn enqueue(&self, ev: GuardEvent) {
        if let Err(e) = self.events_tx.try_send(ev) {
            warn!("guard event dropped: {}", e);
        }
    }

    /// Assemble the status snapshot (see the status module).
    pub fn snapshot(&self) -> StatusSnapshot {
        let agg = self.agg.read();
        let (current_height, silence_secs) = {
            let sign = self.sign.lock();
            (
                sign.current_height,
                sign.last_height_update.elapsed().as_secs_f64(),
            )
        };

        let watchers_count = agg.watchers.len();
        let watchers_watching = agg
            .watchers
            .values()
            .filter(|s| **s == WatcherState::Watching)
            .count();
        let tx = summary_tx_validity(&agg);
        let online = self.validator_online.load(Ordering::SeqCst);

        let mut critical = String::new();
        if summary_watcher_state(&agg) == WatcherState::Connecting {
            critical = "watchers are disconnected from nodes".to_string();
        }
        if online && tx == TxState::Invalid {
            critical = "validator is online and transaction is invalid".to_string();
        }
        if critical.is_empty() && silence_secs > self.config.new_block_timeout as f64 {
            critical = format!(
                "last block received more than {} seconds ago",
                self.config.new_block_timeout
            );
        }

        StatusSnapshot {
            validator_online: online,
            transaction_status: tx.to_string(),
            guard_state: agg.state.to_string(),
            current_height,
            watchers_count,
            watchers_watching,
            critical,
        }
    }
}

impl Guarder for Guard {
    fn report_watcher(&self, node: &str, state: WatcherState) {
        if !self.is_running() {
            return;
        }
        self.enqueue(GuardEvent::WatcherState {
            node: node.to_string(),
            state,
        });
    }

    fn report_tx_validity(&self, node: &str, valid: bool) {
        if !self.is_running() {
            return;
        }
        self.enqueue(GuardEvent::TxValidity {
            node: node.to_string(),
            valid,
        });
    }

    fn report_validator_online(&self, node: &str, height: i64, online: bool) {
        if !self.is_running() {
            return;
        }
        if height < self.current_height.load(Ordering::SeqCst) {
            return;
        }
        self.enqueue(GuardEvent::ValidatorOnline {
            node: node.to_string(),
            height,
            online,
        });
    }

    /// Record a block-sign outcome. Serialized by the window mutex; heights
    /// at or below the current one are rejected. Misses are not counted
    /// while the validator summary is offline, to avoid firing during a
    /// known-offline stretch.
    fn set_sign(&self, height: i64, signed: bool) {
        if !self.is_running() {
            return;
        }
        let missed = {
            let mut sign = self.sign.lock();
            if height <= sign.current_height {
                return;
            }
            sign.current_height = height;
            self.current_height.store(height, Ordering::SeqCst);
            sign.last_height_update = Instant::now();

            let idx = (height % self.config.missed_blocks_window as i64) as usize;
            sign.window[idx] = if self.validator_online.load(Ordering::SeqCst) {
                signed
            } else {
                true
            };
            sign.window.iter().filter(|s| !**s).count()
        };

        debug!("missed blocks in window = {}", missed);

        if missed >= self.config.missed_blocks_limit {
            self.enqueue(GuardEvent::SkipSign);
        }
    }
}

fn summary_watcher_state(agg: &Aggregate) -> WatcherState {
    if agg
        .watchers
        .values()
        .any(|s| *s == WatcherState::Watching)
    {
        WatcherState::Watching
    } else {
        WatcherState::Connecting
    }
}

fn summary_tx_validity(agg: &Aggregate) -> TxState {
    if agg.tx_valid.is_empty() {
        return TxState::Unknown;
    }
    if agg.tx_valid.values().any(|t| *t == TxState::Invalid) {
        TxState::Invalid
    } else {
        TxState::Valid
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

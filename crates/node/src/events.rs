//! Events carried on the guard's channel.
//!
//! Watchers fan their observations into the guard through a single bounded
//! channel; each observation is one variant here. `SkipSign` is internal:
//! the guard enqueues it for itself when the signature window fills with
//! misses, so the firing decision runs on the event loop like every other
//! transition.

use crate::states::WatcherState;

/// One observation from a watcher (or the guard itself, for `SkipSign`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// A watcher changed its lifecycle state.
    WatcherState {
        node: String,
        state: WatcherState,
    },
    /// A node accepted or rejected the `set_offline` transaction.
    TxValidity {
        node: String,
        valid: bool,
    },
    /// The guarded validator's presence in the active set at a height.
    ValidatorOnline {
        node: String,
        height: i64,
        online: bool,
    },
    /// The miss threshold was reached; fire on the next `Watching` turn.
    SkipSign,
}

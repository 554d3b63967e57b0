//! Lifecycle states for the watcher, the transaction, and the guard.

use std::fmt;

/// Per-node watcher state.
///
/// ## State Flow
///
/// ```text
/// Connecting ──▶ QueryValidator ──▶ Watching
///     ▲               │                │
///     └───────────────┴── any error ───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherState {
    /// Probing the node, retrying forever on failure.
    Connecting,
    /// Connected; fetching the initial validator set.
    QueryValidator,
    /// Polling blocks and the validator set.
    Watching,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherState::Connecting => write!(f, "connecting"),
            WatcherState::QueryValidator => write!(f, "query_validator"),
            WatcherState::Watching => write!(f, "watching"),
        }
    }
}

/// Per-node view of the `set_offline` transaction's acceptability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Never checked against this node.
    Unknown,
    /// The node's mempool rejected the transaction.
    Invalid,
    /// The node's mempool accepted the transaction.
    Valid,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Unknown => write!(f, "unknown"),
            TxState::Invalid => write!(f, "invalid"),
            TxState::Valid => write!(f, "valid"),
        }
    }
}

/// Aggregated guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalState {
    /// Initial state; also re-entered after the offline callback fires.
    Starting,
    /// No watcher has reached `Watching`.
    Connecting,
    /// Watching; transaction valid, validator online. The only armed state.
    Watching,
    /// Watching; transaction valid, validator offline.
    ValidatorIsOffline,
    /// Watching; transaction invalid or unknown, validator in any state.
    WatchingWithoutTx,
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalState::Starting => write!(f, "starting"),
            GlobalState::Connecting => write!(f, "connecting"),
            GlobalState::Watching => write!(f, "watching"),
            GlobalState::ValidatorIsOffline => write!(f, "validator_is_offline"),
            GlobalState::WatchingWithoutTx => write!(f, "watching_without_tx"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(WatcherState::Watching.to_string(), "watching");
        assert_eq!(TxState::Unknown.to_string(), "unknown");
        assert_eq!(GlobalState::WatchingWithoutTx.to_string(), "watching_without_tx");
    }
}

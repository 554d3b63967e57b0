//! # Valguard Node Crate
//!
//! Supervisor for a single consensus validator: per-node watchers feed a
//! central guard state machine that decides exactly when to broadcast a
//! pre-signed `set_offline` transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   events    ┌──────────────────────┐
//! │ Watcher a │────────────▶│                      │
//! └───────────┘             │        Guard         │    snapshot   ┌────────┐
//! ┌───────────┐   events    │  (state machine +    │──────────────▶│ axum   │
//! │ Watcher b │────────────▶│   signature window)  │               │ router │
//! └───────────┘             └──────────┬───────────┘               └────────┘
//!       ▲                              │
//!       └────────── send_offline ──────┘
//!                (fires at most once per arming)
//! ```
//!
//! Watchers run concurrently and independently; each polls one node for
//! block signatures, validator-set membership and the continued mempool
//! acceptability of the transaction. The guard folds their reports into
//! summaries (optimistic for watcher liveness, pessimistic for transaction
//! validity) and walks its state machine; when the sliding signature window
//! collects enough misses while armed, the guard invokes the offline
//! callback, which broadcasts through every watcher.
//!
//! # Modules
//!
//! | Module     | Description                                            |
//! |------------|--------------------------------------------------------|
//! | `states`   | Watcher, transaction and guard state enums             |
//! | `events`   | The tagged event union on the guard channel            |
//! | `guard`    | Guard state machine, `Guarder` capability, sign window |
//! | `watcher`  | Per-node polling loop and block counter                |
//! | `status`   | Read-only status snapshot                              |
//! | `handlers` | Axum observability endpoints                           |
//! | `cli`      | Clap CLI with environment fallbacks                    |

pub mod cli;
pub mod events;
pub mod guard;
pub mod handlers;
pub mod states;
pub mod status;
pub mod watcher;

pub use events::GuardEvent;
pub use guard::{Guard, Guarder, OfflineCallback, EVENT_CHANNEL_CAPACITY};
pub use states::{GlobalState, TxState, WatcherState};
pub use status::StatusSnapshot;
pub use watcher::{BlockCounter, Watcher, DEFAULT_POLL_INTERVAL, TX_CHECK_BLOCKS};

// HTTP API handlers (axum) — read-only observability endpoints
pub use handlers::{build_router, AppState};

//! # Valguard Common Crate
//!
//! Node RPC abstraction and shared configuration for the validator guard.
//!
//! ## Modules
//! - `rpc`: `NodeRpc` trait definition and wire types
//! - `http_rpc`: Tendermint RPC implementation over HTTP
//! - `mock_rpc`: Mock implementation for testing
//! - `config`: Guard runtime configuration
//!
//! ## RPC Layer Architecture
//! ```text
//! ┌─────────────────┐
//! │     NodeRpc     │  <- Abstract trait
//! └────────┬────────┘
//!          │
//!    ┌─────┴─────┐
//!    │           │
//! ┌──▼────┐  ┌───▼───┐
//! │HttpRpc│  │MockRpc│
//! └───────┘  └───────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let rpc = HttpRpc::new("http://localhost:26657", Duration::from_secs(10));
//! rpc.check_connection().await?;
//! let set = rpc.validators().await?;
//! ```

pub mod config;
pub mod http_rpc;
pub mod mock_rpc;
pub mod rpc;

pub use config::{ConfigError, GuardConfig};
pub use http_rpc::HttpRpc;
pub use mock_rpc::MockRpc;
pub use rpc::{
    BlockSignatures, NodeRpc, RpcError, TxResult, ValidatorInfo, ValidatorSet,
    ValidatorSignature,
};

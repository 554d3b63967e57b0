//! Typed runtime configuration for the guard.
//!
//! Values are normally collected by the CLI layer (flags with environment
//! fallbacks) and handed here as a typed struct. `validate()` enforces the
//! relationships the supervisor depends on, most importantly that the
//! signature window is strictly larger than the miss limit.

use thiserror::Error;

/// Default number of missed blocks in the window that triggers `set_offline`.
pub const DEFAULT_MISSED_BLOCKS_LIMIT: usize = 8;
/// Default length of the sliding signature window, in blocks.
pub const DEFAULT_MISSED_BLOCKS_WINDOW: usize = 24;
/// Default pause before a watcher retries a failed connection, in seconds.
pub const DEFAULT_FALLBACK_PAUSE_SECS: u64 = 2;
/// Default block silence after which the guard reports itself unhealthy, in seconds.
pub const DEFAULT_NEW_BLOCK_TIMEOUT_SECS: u64 = 10;

/// Errors produced by [`GuardConfig::validate`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No node endpoints were configured.
    #[error("no node endpoints configured")]
    NoEndpoints,

    /// The guarded validator address is empty.
    #[error("validator address is empty")]
    NoValidatorAddress,

    /// The signature window must be strictly larger than the miss limit.
    #[error("missed blocks window ({window}) must be greater than the limit ({limit})")]
    WindowTooSmall { window: usize, limit: usize },

    /// The signature window must hold at least one block.
    #[error("missed blocks window must be greater than zero")]
    EmptyWindow,
}

/// Runtime configuration for the guard and its watchers.
///
/// Immutable after load. Each watcher receives a clone. Population happens
/// in the CLI layer, whose flags carry the environment fallbacks.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Tendermint RPC endpoints of the nodes to watch, one watcher each.
    pub nodes_endpoints: Vec<String>,
    /// Number of missed blocks within the window that triggers `set_offline`.
    pub missed_blocks_limit: usize,
    /// Length of the sliding signature window, in blocks.
    pub missed_blocks_window: usize,
    /// Pause before a watcher retries after a transport failure, in seconds.
    pub fallback_pause: u64,
    /// Block silence after which the status endpoint reports critical, in seconds.
    pub new_block_timeout: u64,
    /// Hex address of the guarded validator. Compared case-insensitively.
    pub validator_address: String,
    /// Hex-encoded pre-signed `set_offline` transaction.
    pub set_offline_tx: String,
    /// Reserved. Carried through configuration but not consulted.
    pub enable_grace_period: bool,
    /// Reserved. Grace period length in blocks.
    pub grace_period_duration: u64,
    /// Bind address for the read-only status endpoint. Disabled when `None`.
    pub http_listen: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            nodes_endpoints: Vec::new(),
            missed_blocks_limit: DEFAULT_MISSED_BLOCKS_LIMIT,
            missed_blocks_window: DEFAULT_MISSED_BLOCKS_WINDOW,
            fallback_pause: DEFAULT_FALLBACK_PAUSE_SECS,
            new_block_timeout: DEFAULT_NEW_BLOCK_TIMEOUT_SECS,
            validator_address: String::new(),
            set_offline_tx: String::new(),
            enable_grace_period: false,
            grace_period_duration: 0,
            http_listen: None,
        }
    }
}

/// Split a comma-joined endpoint list into individual URLs.
///
/// Whitespace around entries is trimmed and empty entries are dropped.
pub fn parse_endpoints(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl GuardConfig {
    /// Validate the relationships between configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.validator_address.is_empty() {
            return Err(ConfigError::NoValidatorAddress);
        }
        if self.missed_blocks_window == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.missed_blocks_window <= self.missed_blocks_limit {
            return Err(ConfigError::WindowTooSmall {
                window: self.missed_blocks_window,
                limit: self.missed_blocks_limit,
            });
        }
        Ok(())
    }

    /// Decode the configured `set_offline` transaction into raw bytes.
    ///
    /// An optional `0x` prefix is accepted. A decode failure is not fatal to
    /// the daemon (the guard then never has a transaction to broadcast), so
    /// the caller decides how to react.
    pub fn decode_offline_tx(&self) -> Result<Vec<u8>, hex::FromHexError> {
        let raw = self
            .set_offline_tx
            .strip_prefix("0x")
            .unwrap_or(&self.set_offline_tx);
        hex::decode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GuardConfig {
        GuardConfig {
            nodes_endpoints: vec!["http://localhost:26657".to_string()],
            validator_address: "A0B1C2D3E4F5061728394A5B6C7D8E9F0A1B2C3D".to_string(),
            set_offline_tx: "f90123".to_string(),
            ..GuardConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = GuardConfig::default();
        assert_eq!(cfg.missed_blocks_limit, 8);
        assert_eq!(cfg.missed_blocks_window, 24);
        assert_eq!(cfg.fallback_pause, 2);
        assert_eq!(cfg.new_block_timeout, 10);
        assert!(cfg.http_listen.is_none());
    }

    #[test]
    fn test_parse_endpoints() {
        let eps = parse_endpoints("http://a:26657, http://b:26657 ,,http://c:26657");
        assert_eq!(
            eps,
            vec![
                "http://a:26657".to_string(),
                "http://b:26657".to_string(),
                "http://c:26657".to_string(),
            ]
        );
        assert!(parse_endpoints("").is_empty());
        assert!(parse_endpoints(" , ").is_empty());
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_endpoints() {
        let mut cfg = valid_config();
        cfg.nodes_endpoints.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoEndpoints));
    }

    #[test]
    fn test_validate_requires_address() {
        let mut cfg = valid_config();
        cfg.validator_address.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoValidatorAddress));
    }

    #[test]
    fn test_validate_window_must_exceed_limit() {
        let mut cfg = valid_config();
        cfg.missed_blocks_limit = 24;
        cfg.missed_blocks_window = 24;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::WindowTooSmall {
                window: 24,
                limit: 24
            })
        );
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        let mut cfg = valid_config();
        cfg.missed_blocks_limit = 0;
        cfg.missed_blocks_window = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyWindow));
    }

    #[test]
    fn test_decode_offline_tx() {
        let mut cfg = valid_config();
        assert_eq!(cfg.decode_offline_tx().unwrap(), vec![0xf9, 0x01, 0x23]);
        cfg.set_offline_tx = "0xf90123".to_string();
        assert_eq!(cfg.decode_offline_tx().unwrap(), vec![0xf9, 0x01, 0x23]);
        cfg.set_offline_tx = "not-hex".to_string();
        assert!(cfg.decode_offline_tx().is_err());
    }
}

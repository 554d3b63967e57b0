//! Tendermint RPC client over HTTP.
//!
//! Thin polling client for the subset of the Tendermint RPC surface the
//! guard consumes: `/validators`, `/block`, `/check_tx` and
//! `/broadcast_tx_sync`. Numbers that Tendermint encodes as decimal strings
//! (heights, voting power) are parsed into `i64` here so the rest of the
//! system never sees the wire quirk.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::rpc::{
    BlockSignatures, NodeRpc, RpcError, TxResult, ValidatorInfo, ValidatorSet,
    ValidatorSignature,
};

/// Validator sets are small (chain limit is in the low hundreds); one page
/// with headroom is enough.
const VALIDATORS_PER_PAGE: u32 = 200;

// ════════════════════════════════════════════════════════════════════════════
// RAW WIRE SHAPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct RawRpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

/// JSON-RPC envelope. Tendermint answers with either `result` or `error`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Option<RawRpcError>,
    #[serde(default = "Option::default")]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawValidator {
    #[serde(default)]
    address: String,
    #[serde(default)]
    voting_power: String,
}

#[derive(Debug, Deserialize)]
struct RawValidators {
    #[serde(default)]
    block_height: String,
    #[serde(default)]
    validators: Vec<RawValidator>,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    #[serde(default)]
    validator_address: String,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    height: String,
}

#[derive(Debug, Deserialize)]
struct RawLastCommit {
    #[serde(default)]
    signatures: Vec<RawSignature>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    header: RawHeader,
    last_commit: RawLastCommit,
}

#[derive(Debug, Deserialize)]
struct RawBlockResult {
    block: RawBlock,
}

#[derive(Debug, Deserialize)]
struct RawTxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    log: String,
}

fn parse_height(s: &str) -> Result<i64, RpcError> {
    s.parse::<i64>()
        .map_err(|_| RpcError::Decode(format!("invalid height {:?}", s)))
}

fn into_validator_set(raw: RawValidators) -> Result<ValidatorSet, RpcError> {
    let block_height = parse_height(&raw.block_height)?;
    let validators = raw
        .validators
        .into_iter()
        .map(|v| {
            // A malformed voting power is treated as zero, like the node does
            // for validators leaving the set.
            let voting_power = v.voting_power.parse::<i64>().unwrap_or(0);
            ValidatorInfo {
                address: v.address,
                voting_power,
            }
        })
        .collect();
    Ok(ValidatorSet {
        block_height,
        validators,
    })
}

fn into_block_signatures(raw: RawBlockResult) -> Result<BlockSignatures, RpcError> {
    let height = parse_height(&raw.block.header.height)?;
    let signatures = raw
        .block
        .last_commit
        .signatures
        .into_iter()
        .map(|s| ValidatorSignature {
            validator_address: s.validator_address,
            signature: s.signature.unwrap_or_default(),
        })
        .collect();
    Ok(BlockSignatures { height, signatures })
}

fn into_tx_result(raw: RawTxResult) -> TxResult {
    TxResult {
        code: raw.code,
        codespace: raw.codespace,
        log: raw.log,
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// HTTP implementation of [`NodeRpc`].
///
/// The underlying `reqwest::Client` pools connections and carries no state
/// across failures, so one `HttpRpc` per watcher lives for the whole
/// process; reconnection is just the next request.
#[derive(Clone)]
pub struct HttpRpc {
    base: String,
    client: Client,
}

impl HttpRpc {
    /// Create a client for the given base URL with a per-request timeout.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        HttpRpc { base, client }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RpcError> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RpcError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }
        let env = resp
            .json::<Envelope<T>>()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        if let Some(err) = env.error {
            if err.code != 0 {
                return Err(RpcError::Rpc {
                    code: err.code,
                    message: err.message,
                    data: err.data,
                });
            }
        }
        env.result
            .ok_or_else(|| RpcError::Decode("missing result".to_string()))
    }
}

#[async_trait]
impl NodeRpc for HttpRpc {
    async fn check_connection(&self) -> Result<(), RpcError> {
        let resp = self
            .client
            .get(&self.base)
            .send()
            .await
            .map_err(|e| RpcError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn validators(&self) -> Result<ValidatorSet, RpcError> {
        let raw: RawValidators = self
            .get_json(&format!("/validators?per_page={}", VALIDATORS_PER_PAGE))
            .await?;
        into_validator_set(raw)
    }

    async fn block_signatures(&self) -> Result<BlockSignatures, RpcError> {
        let raw: RawBlockResult = self.get_json("/block").await?;
        into_block_signatures(raw)
    }

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, RpcError> {
        let raw: RawTxResult = self
            .get_json(&format!("/check_tx?tx=0x{}", hex::encode(tx)))
            .await?;
        Ok(into_tx_result(raw))
    }

    async fn broadcast_tx_sync(&self, tx: &[u8]) -> Result<TxResult, RpcError> {
        let raw: RawTxResult = self
            .get_json(&format!("/broadcast_tx_sync?tx=0x{}", hex::encode(tx)))
            .await?;
        Ok(into_tx_result(raw))
    }
}

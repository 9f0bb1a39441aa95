//! TOML configuration: parsed into [`RawConfig`], validated by
//! [`finalize_config`] into a [`ZylithConfig`].

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use starknet::core::types::Felt;
use url::Url;

use crate::error::ClientError;
use crate::utils::{parse_felt, Address};

pub const CONFIG_ENV: &str = "ZYLITH_CONFIG";
pub const INDEXER_TIMEOUT_ENV: &str = "ZYLITH_INDEXER_TIMEOUT_SECS";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_AGGREGATE_INTERVAL_SECS: u64 = 15;
const DEFAULT_INDEXER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub rpc_url: String,
    pub indexer_url: String,
    pub pool_address: String,
    pub token0: String,
    pub token1: String,
    pub account_address: String,
    pub chain_id: Option<String>,
    pub ledger_path: String,
    pub artifacts_dir: String,
    pub poll_interval_secs: Option<u64>,
    pub aggregate_interval_secs: Option<u64>,
    pub indexer_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone)]
pub struct ZylithConfig {
    pub rpc_url: Url,
    pub indexer_url: Url,
    pub pool_address: Address,
    pub token0: Address,
    pub token1: Address,
    pub account_address: Address,
    /// `None` means ask the RPC node.
    pub chain_id: Option<Felt>,
    pub ledger_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub poll_interval: Duration,
    pub aggregate_interval: Duration,
    pub indexer_timeout: Duration,
    pub retry: RetryConfig,
}

impl ZylithConfig {
    /// Loads the file named by `ZYLITH_CONFIG`, falling back to `zylith.toml`.
    pub fn from_env() -> Result<Self, ClientError> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| "zylith.toml".to_string());
        Self::load(Path::new(&path))
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let raw = load_config(path)?;
        let timeout_override = match env::var(INDEXER_TIMEOUT_ENV) {
            Ok(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ClientError::Config(format!("{INDEXER_TIMEOUT_ENV}: {e}"))
            })?),
            Err(_) => None,
        };
        finalize_config(raw, path, timeout_override)
    }

    pub fn token_id(&self, token: Address) -> Result<u8, ClientError> {
        if token == self.token0 {
            Ok(0)
        } else if token == self.token1 {
            Ok(1)
        } else {
            Err(ClientError::Validation(format!("unknown token {token:#x}")))
        }
    }
}

pub fn load_config(path: &Path) -> Result<RawConfig, ClientError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Config(format!("failed to read {}: {e}", path.display())))?;
    let config: RawConfig = toml::from_str(&contents)?;
    Ok(config)
}

pub fn finalize_config(
    raw: RawConfig,
    config_path: &Path,
    indexer_timeout_override: Option<u64>,
) -> Result<ZylithConfig, ClientError> {
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config_err = |field: &str, err: String| ClientError::Config(format!("{field}: {err}"));

    let rpc_url = Url::parse(&raw.rpc_url).map_err(|e| config_err("rpc_url", e.to_string()))?;
    let indexer_url =
        Url::parse(&raw.indexer_url).map_err(|e| config_err("indexer_url", e.to_string()))?;
    let pool_address =
        parse_felt(&raw.pool_address).map_err(|e| config_err("pool_address", e.to_string()))?;
    let token0 = parse_felt(&raw.token0).map_err(|e| config_err("token0", e.to_string()))?;
    let token1 = parse_felt(&raw.token1).map_err(|e| config_err("token1", e.to_string()))?;
    let account_address = parse_felt(&raw.account_address)
        .map_err(|e| config_err("account_address", e.to_string()))?;
    let chain_id = raw
        .chain_id
        .as_deref()
        .map(parse_felt)
        .transpose()
        .map_err(|e| config_err("chain_id", e.to_string()))?;

    if pool_address == Felt::ZERO {
        return Err(ClientError::Config("pool_address cannot be zero".to_string()));
    }
    if account_address == Felt::ZERO {
        return Err(ClientError::Config("account_address cannot be zero".to_string()));
    }
    if token0 == Felt::ZERO || token1 == Felt::ZERO {
        return Err(ClientError::Config("token0/token1 cannot be zero".to_string()));
    }
    if token0 == token1 {
        return Err(ClientError::Config(
            "token0 and token1 must be different".to_string(),
        ));
    }

    let poll_interval_secs = raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let aggregate_interval_secs = raw
        .aggregate_interval_secs
        .unwrap_or(DEFAULT_AGGREGATE_INTERVAL_SECS);
    let indexer_timeout_secs = indexer_timeout_override
        .or(raw.indexer_timeout_secs)
        .unwrap_or(DEFAULT_INDEXER_TIMEOUT_SECS);
    if poll_interval_secs == 0 {
        return Err(ClientError::Config("poll_interval_secs must be >= 1".to_string()));
    }
    if aggregate_interval_secs == 0 {
        return Err(ClientError::Config(
            "aggregate_interval_secs must be >= 1".to_string(),
        ));
    }
    if indexer_timeout_secs == 0 {
        return Err(ClientError::Config(
            "indexer_timeout_secs must be >= 1".to_string(),
        ));
    }
    let retry = raw.retry.unwrap_or_default();
    if retry.max_attempts == 0 {
        return Err(ClientError::Config("retry.max_attempts must be >= 1".to_string()));
    }

    Ok(ZylithConfig {
        rpc_url,
        indexer_url,
        pool_address,
        token0,
        token1,
        account_address,
        chain_id,
        ledger_path: resolve_path(&base_dir, &raw.ledger_path),
        artifacts_dir: resolve_path(&base_dir, &raw.artifacts_dir),
        poll_interval: Duration::from_secs(poll_interval_secs),
        aggregate_interval: Duration::from_secs(aggregate_interval_secs),
        indexer_timeout: Duration::from_secs(indexer_timeout_secs),
        retry,
    })
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

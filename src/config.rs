// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All settings are read from the environment once at startup and are
//! immutable afterwards. A missing or invalid required value is fatal.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TREASURY_ADDRESS` | Destination for forwarded funds | Required |
//! | `EXPLORER_API_KEY` | Explorer API key | Required |
//! | `CHAIN_RPC_URL` | JSON-RPC endpoint used for broadcasting | Required |
//! | `KEY_ENCRYPTION_KEY` | Base64 32-byte key sealing wallet keys | Required |
//! | `EXPLORER_API_URL` | Etherscan-compatible API endpoint | `https://api.etherscan.io/api` |
//! | `EXPLORER_CHAIN_ID` | `chainid` parameter for multichain explorers | Unset |
//! | `DATA_DIR` | Directory holding `sweeper.redb` | `/data` |
//! | `SWEEP_INTERVAL_SECS` | Seconds between sweeps | `60` |
//! | `LEDGER_CONCURRENCY` | Addresses queried in parallel | `4` |
//! | `LEDGER_TIMEOUT_SECS` | Bound on each ledger call | `15` |
//! | `BROADCAST_TIMEOUT_SECS` | Bound on each broadcast | `30` |
//! | `NATIVE_DECIMALS` | Decimals of the native unit | `18` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use zeroize::Zeroizing;

use crate::blockchain::ledger::DEFAULT_EXPLORER_API_URL;
use crate::blockchain::{ChainConfig, NATIVE_DECIMALS};
use crate::keys::SealedKeyCipher;
use crate::storage::DATABASE_FILE;

pub const TREASURY_ADDRESS_ENV: &str = "TREASURY_ADDRESS";
pub const EXPLORER_API_KEY_ENV: &str = "EXPLORER_API_KEY";
pub const EXPLORER_API_URL_ENV: &str = "EXPLORER_API_URL";
pub const EXPLORER_CHAIN_ID_ENV: &str = "EXPLORER_CHAIN_ID";
pub const CHAIN_RPC_URL_ENV: &str = "CHAIN_RPC_URL";
pub const KEY_ENCRYPTION_KEY_ENV: &str = "KEY_ENCRYPTION_KEY";

/// Environment variable name for the data directory path.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const LEDGER_CONCURRENCY_ENV: &str = "LEDGER_CONCURRENCY";
pub const LEDGER_TIMEOUT_ENV: &str = "LEDGER_TIMEOUT_SECS";
pub const BROADCAST_TIMEOUT_ENV: &str = "BROADCAST_TIMEOUT_SECS";
pub const NATIVE_DECIMALS_ENV: &str = "NATIVE_DECIMALS";

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_LEDGER_CONCURRENCY: usize = 4;
const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BROADCAST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),

    #[error("invalid configuration {name}: {reason}")]
    Invalid { name: String, reason: String },
}

impl ConfigError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Immutable sweeper settings.
#[derive(Clone)]
pub struct SweeperConfig {
    pub treasury_address: String,
    pub explorer_api_url: String,
    pub explorer_api_key: String,
    pub explorer_chain_id: Option<u64>,
    pub chain_rpc_url: String,
    pub key_encryption_key: Zeroizing<String>,
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    pub ledger_concurrency: usize,
    pub ledger_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub native_decimals: u8,
}

impl SweeperConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let treasury_address = env.required(TREASURY_ADDRESS_ENV)?;
        let parsed = Address::from_str(&treasury_address)
            .map_err(|e| ConfigError::invalid(TREASURY_ADDRESS_ENV, e.to_string()))?;
        if parsed.is_zero() {
            return Err(ConfigError::invalid(TREASURY_ADDRESS_ENV, "zero address"));
        }

        let explorer_api_key = env.required(EXPLORER_API_KEY_ENV)?;
        let explorer_api_url = env.or_default(EXPLORER_API_URL_ENV, DEFAULT_EXPLORER_API_URL);
        url::Url::parse(&explorer_api_url)
            .map_err(|e| ConfigError::invalid(EXPLORER_API_URL_ENV, e.to_string()))?;
        let explorer_chain_id = env.parsed_optional::<u64>(EXPLORER_CHAIN_ID_ENV)?;

        let chain_rpc_url = env.required(CHAIN_RPC_URL_ENV)?;
        url::Url::parse(&chain_rpc_url)
            .map_err(|e| ConfigError::invalid(CHAIN_RPC_URL_ENV, e.to_string()))?;

        let key_encryption_key = Zeroizing::new(env.required(KEY_ENCRYPTION_KEY_ENV)?);
        SealedKeyCipher::from_base64(&key_encryption_key)
            .map_err(|e| ConfigError::invalid(KEY_ENCRYPTION_KEY_ENV, e.to_string()))?;

        let data_dir = PathBuf::from(env.or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR));

        let sweep_interval = env.seconds(SWEEP_INTERVAL_ENV, DEFAULT_SWEEP_INTERVAL_SECS)?;
        let ledger_timeout = env.seconds(LEDGER_TIMEOUT_ENV, DEFAULT_LEDGER_TIMEOUT_SECS)?;
        let broadcast_timeout = env.seconds(BROADCAST_TIMEOUT_ENV, DEFAULT_BROADCAST_TIMEOUT_SECS)?;

        let ledger_concurrency = env
            .parsed_optional::<usize>(LEDGER_CONCURRENCY_ENV)?
            .unwrap_or(DEFAULT_LEDGER_CONCURRENCY);
        if ledger_concurrency == 0 {
            return Err(ConfigError::invalid(LEDGER_CONCURRENCY_ENV, "must be at least 1"));
        }

        let native_decimals = env
            .parsed_optional::<u8>(NATIVE_DECIMALS_ENV)?
            .unwrap_or(NATIVE_DECIMALS);
        // 10^38 is the largest power of ten in a u128
        if native_decimals > 38 {
            return Err(ConfigError::invalid(NATIVE_DECIMALS_ENV, "must be at most 38"));
        }

        Ok(Self {
            treasury_address,
            explorer_api_url,
            explorer_api_key,
            explorer_chain_id,
            chain_rpc_url,
            key_encryption_key,
            data_dir,
            sweep_interval,
            ledger_concurrency,
            ledger_timeout,
            broadcast_timeout,
            native_decimals,
        })
    }

    /// Path of the sweeper database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn chain(&self) -> ChainConfig {
        ChainConfig {
            rpc_url: self.chain_rpc_url.clone(),
            native_decimals: self.native_decimals,
        }
    }
}

impl std::fmt::Debug for SweeperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweeperConfig")
            .field("treasury_address", &self.treasury_address)
            .field("explorer_api_url", &self.explorer_api_url)
            .field("explorer_api_key", &"<redacted>")
            .field("explorer_chain_id", &self.explorer_chain_id)
            .field("chain_rpc_url", &self.chain_rpc_url)
            .field("key_encryption_key", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("sweep_interval", &self.sweep_interval)
            .field("ledger_concurrency", &self.ledger_concurrency)
            .field("ledger_timeout", &self.ledger_timeout)
            .field("broadcast_timeout", &self.broadcast_timeout)
            .field("native_decimals", &self.native_decimals)
            .finish()
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed_optional<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ConfigError::invalid(name, format!("`{raw}`: {e}")))
            })
            .transpose()
    }

    fn seconds(&self, name: &str, default: u64) -> Result<Duration, ConfigError> {
        let secs = self.parsed_optional::<u64>(name)?.unwrap_or(default);
        if secs == 0 {
            return Err(ConfigError::invalid(name, "must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger queries: address transaction history and current chain height.
//!
//! The sweeper only depends on the [`LedgerClient`] trait. [`ExplorerClient`]
//! implements it against an Etherscan-compatible explorer API:
//!
//! - history: `?module=account&action=txlist&address=…&startblock=0&endblock=99999999&sort=asc`
//! - height: `?module=proxy&action=eth_blockNumber` (hex-encoded result)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::types::LedgerTransaction;

pub const DEFAULT_EXPLORER_API_URL: &str = "https://api.etherscan.io/api";

const START_BLOCK: u64 = 0;
const END_BLOCK: u64 = 99_999_999;
const NO_TRANSACTIONS_MESSAGE: &str = "No transactions found";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Network, API or payload failure. Distinct from an empty history.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the external ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// All known transactions touching `address`, ascending by block.
    async fn list_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>, LedgerError>;

    /// Latest known block height.
    async fn current_height(&self) -> Result<u64, LedgerError>;
}

/// Etherscan-compatible explorer client.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    base_url: String,
    api_key: String,
    chain_id: Option<u64>,
    http: Client,
}

impl ExplorerClient {
    /// Build a client. Every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chain_id: Option<u64>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            chain_id,
            http,
        })
    }

    async fn get_json(&self, action: &str, mut params: Vec<(&str, String)>) -> Result<Value, LedgerError> {
        if let Some(chain_id) = self.chain_id {
            params.push(("chainid", chain_id.to_string()));
        }
        params.push(("apikey", self.api_key.clone()));

        // reqwest errors carry the URL, which includes the API key
        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{action} request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LedgerError::Unavailable(format!(
                "{action} returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{action} invalid JSON: {}", e.without_url())))
    }
}

#[async_trait]
impl LedgerClient for ExplorerClient {
    async fn list_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let params = vec![
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", address.to_string()),
            ("startblock", START_BLOCK.to_string()),
            ("endblock", END_BLOCK.to_string()),
            ("sort", "asc".to_string()),
        ];
        let body = self.get_json("txlist", params).await?;
        parse_txlist(&body)
    }

    async fn current_height(&self) -> Result<u64, LedgerError> {
        let params = vec![
            ("module", "proxy".to_string()),
            ("action", "eth_blockNumber".to_string()),
        ];
        let body = self.get_json("eth_blockNumber", params).await?;
        parse_block_number(&body)
    }
}

/// Parse an explorer `txlist` response.
///
/// `status: "0"` with an empty result is a valid, empty history; any other
/// `status: "0"` is an API error.
pub fn parse_txlist(body: &Value) -> Result<Vec<LedgerTransaction>, LedgerError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
    let message = body.get("message").and_then(Value::as_str).unwrap_or_default();
    let result = body.get("result");

    match status {
        "1" => {}
        "0" => {
            let empty_result = result
                .and_then(Value::as_array)
                .is_some_and(|entries| entries.is_empty());
            if empty_result || message.eq_ignore_ascii_case(NO_TRANSACTIONS_MESSAGE) {
                return Ok(Vec::new());
            }
            let detail = result.and_then(Value::as_str).unwrap_or(message);
            return Err(LedgerError::Unavailable(format!("explorer error: {detail}")));
        }
        other => {
            return Err(LedgerError::Unavailable(format!(
                "unexpected explorer status `{other}`"
            )))
        }
    }

    let entries = result
        .and_then(Value::as_array)
        .ok_or_else(|| LedgerError::Unavailable("txlist result is not an array".to_string()))?;

    let mut transactions = Vec::with_capacity(entries.len());
    for entry in entries {
        let hash = entry
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::Unavailable("txlist entry without hash".to_string()))?;

        let block_number = entry
            .get("blockNumber")
            .and_then(Value::as_str)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                LedgerError::Unavailable(format!("txlist entry {hash} has an invalid blockNumber"))
            })?;

        // Pre-Byzantium receipts report an empty status; treat as not successful
        let receipt_success = entry.get("txreceipt_status").and_then(Value::as_str) == Some("1");

        transactions.push(LedgerTransaction {
            hash: hash.to_string(),
            block_number,
            receipt_success,
        });
    }

    transactions.sort_by_key(|tx| tx.block_number);
    Ok(transactions)
}

/// Parse an `eth_blockNumber` proxy response (`result` is a `0x` hex string).
pub fn parse_block_number(body: &Value) -> Result<u64, LedgerError> {
    if let Some(error) = body.get("error") {
        return Err(LedgerError::Unavailable(format!("eth_blockNumber error: {error}")));
    }

    let raw = body
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::Unavailable("eth_blockNumber returned no result".to_string()))?;

    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| LedgerError::Unavailable(format!("eth_blockNumber returned `{raw}`")))?;

    u64::from_str_radix(hex, 16)
        .map_err(|e| LedgerError::Unavailable(format!("eth_blockNumber returned `{raw}`: {e}")))
}

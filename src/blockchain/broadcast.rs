// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing and broadcasting of native-value forwarding transactions.
//!
//! The sweeper only sees the [`Broadcaster`] trait. [`EvmBroadcaster`] builds
//! an EIP-1559 transfer, signs it with the deposit wallet's key and submits it
//! over JSON-RPC. Submission is the end of its responsibility: inclusion and
//! receipt tracking are not performed here.

use std::str::FromStr;

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;
use url::Url;

use super::signing::{signer_from_key_material, SigningError};
use super::types::{parse_amount, AmountError, ChainConfig};

/// Base fee assumed when the latest block does not report one (25 gwei).
const DEFAULT_BASE_FEE_WEI: u128 = 25_000_000_000;
/// Priority fee (tip) attached to every forwarding (1.5 gwei).
const PRIORITY_FEE_WEI: u128 = 1_500_000_000;

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error(transparent)]
    InvalidKey(#[from] SigningError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    InvalidAmount(#[from] AmountError),

    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Submits a value transfer signed by a custodial key.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Sign a transfer of `amount` (human-readable, native unit) from the
    /// address controlled by `private_key` to `destination`, submit it and
    /// return the transaction hash.
    async fn send_value(
        &self,
        private_key: &str,
        destination: &str,
        amount: &str,
    ) -> Result<String, BroadcastError>;
}

/// JSON-RPC broadcaster for EVM chains.
#[derive(Debug, Clone)]
pub struct EvmBroadcaster {
    chain: ChainConfig,
    rpc_url: Url,
}

impl EvmBroadcaster {
    pub fn new(chain: ChainConfig) -> Result<Self, BroadcastError> {
        let rpc_url: Url = chain
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| BroadcastError::InvalidRpcUrl(e.to_string()))?;

        Ok(Self { chain, rpc_url })
    }
}

#[async_trait]
impl Broadcaster for EvmBroadcaster {
    async fn send_value(
        &self,
        private_key: &str,
        destination: &str,
        amount: &str,
    ) -> Result<String, BroadcastError> {
        let to_addr = Address::from_str(destination.trim())
            .map_err(|e| BroadcastError::InvalidAddress(format!("{destination}: {e}")))?;
        let value = parse_amount(amount, self.chain.native_decimals)?;

        let signer = signer_from_key_material(private_key)?;
        let wallet = EthereumWallet::from(signer);

        // One provider per send: the signing wallet differs for every deposit
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());

        let block = provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await
            .map_err(|e| BroadcastError::Rpc(format!("failed to get block: {e}")))?
            .ok_or_else(|| BroadcastError::Rpc("no latest block".to_string()))?;

        let (max_fee_per_gas, max_priority_fee_per_gas) = fee_caps(block.header.base_fee_per_gas);

        let tx = TransactionRequest::default()
            .to(to_addr)
            .value(value)
            .max_fee_per_gas(max_fee_per_gas)
            .max_priority_fee_per_gas(max_priority_fee_per_gas);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| BroadcastError::Rejected(e.to_string()))?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }
}

/// EIP-1559 fee caps `(max_fee_per_gas, max_priority_fee_per_gas)`.
///
/// The max fee leaves room for the base fee to double before inclusion.
pub fn fee_caps(base_fee_per_gas: Option<u64>) -> (u128, u128) {
    let base_fee = base_fee_per_gas
        .map(u128::from)
        .unwrap_or(DEFAULT_BASE_FEE_WEI);
    let max_fee = base_fee.saturating_mul(2).saturating_add(PRIORITY_FEE_WEI);
    (max_fee, PRIORITY_FEE_WEI)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and helpers.

use alloy::primitives::U256;

/// Decimals of the native unit on EVM chains (wei).
pub const NATIVE_DECIMALS: u8 = 18;

/// Chain endpoint used for signing and broadcasting.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Decimals of the native unit
    pub native_decimals: u8,
}

/// A transaction touching a watched address, as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// Transaction hash (as returned by the ledger)
    pub hash: String,
    /// Block the transaction was included in
    pub block_number: u64,
    /// Whether the receipt reports successful execution
    pub receipt_success: bool,
}

/// Confirmation depth of a transaction included at `block_number` when the
/// chain head is `height`. The including block counts as one confirmation.
pub fn confirmations_at(height: u64, block_number: u64) -> u64 {
    height.saturating_add(1).saturating_sub(block_number)
}

/// Error returned when a human-readable amount cannot be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount `{amount}`: {reason}")]
pub struct AmountError {
    pub amount: String,
    pub reason: String,
}

/// Parse a human-readable amount to wei (or token units).
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "1.5")
/// * `decimals` - Number of decimals (18 for native ETH/AVAX)
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    let invalid = |reason: &str| AmountError {
        amount: amount.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = amount.trim();
    let parts: Vec<&str> = trimmed.split('.').collect();

    if parts.len() > 2 || parts[0].is_empty() {
        return Err(invalid("invalid amount format"));
    }

    let whole = parts[0]
        .parse::<u128>()
        .map_err(|_| invalid("invalid whole number"))?;

    let decimal_part = if parts.len() == 2 {
        let dec_str = parts[1];
        if dec_str.len() > decimals as usize {
            return Err(invalid(&format!("too many decimal places (max {decimals})")));
        }
        if dec_str.is_empty() {
            0u128
        } else {
            // Pad with zeros to match decimals
            let padded = format!("{:0<width$}", dec_str, width = decimals as usize);
            padded
                .parse::<u128>()
                .map_err(|_| invalid("invalid decimal"))?
        }
    } else {
        0u128
    };

    let multiplier = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| invalid("unsupported decimals"))?;
    let total = whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(decimal_part))
        .ok_or_else(|| invalid("amount overflow"))?;

    if total == 0 {
        return Err(invalid("amount must be positive"));
    }

    Ok(U256::from(total))
}

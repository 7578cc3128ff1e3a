// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deposit, wallet and forwarding records shared by the sweeper and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalize a chain transaction hash for comparison and storage keys.
///
/// Hashes are case-insensitive; surrounding whitespace from user input is
/// ignored.
pub fn normalize_hash(tx_hash: &str) -> String {
    tx_hash.trim().to_ascii_lowercase()
}

/// Normalize an on-chain address for grouping and lookups.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

// =============================================================================
// Deposits
// =============================================================================

/// Deposit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Submitted by the user, not yet at finality depth
    Pending,
    /// Reached finality with a successful receipt
    Confirmed,
    /// Reached finality with a failed receipt
    Failed,
}

impl DepositStatus {
    /// Confirmed and failed deposits are never mutated again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-submitted incoming payment to one of their custodial wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Owning user
    pub user_id: String,
    /// Custodial wallet the payment was sent to
    pub wallet_id: String,
    /// Chain transaction hash (normalized lowercase)
    pub tx_hash: String,
    /// Amount in human-readable decimal format (e.g. "1.5")
    pub amount: String,
    /// Currency code (e.g. "ETH")
    pub currency: String,
    /// Current status
    pub status: DepositStatus,
    /// Highest confirmation depth observed so far
    pub confirmations: u64,
    /// When the deposit was submitted
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    /// Create a new pending deposit record.
    pub fn new_pending(
        user_id: impl Into<String>,
        wallet_id: impl Into<String>,
        tx_hash: &str,
        amount: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            wallet_id: wallet_id.into(),
            tx_hash: normalize_hash(tx_hash),
            amount: amount.into(),
            currency: currency.into(),
            status: DepositStatus::Pending,
            confirmations: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Wallets
// =============================================================================

/// Custodial wallet as seen by the sweeper. Read-only here.
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Unique wallet identifier
    pub wallet_id: String,
    /// Owning user
    pub user_id: String,
    /// On-chain address
    pub address: String,
    /// Currency held by this wallet
    pub currency: String,
    /// Sealed private key; only ever decrypted for a single signing operation
    pub encrypted_private_key: String,
    /// When the wallet was created
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    pub fn new(
        wallet_id: impl Into<String>,
        user_id: impl Into<String>,
        address: impl Into<String>,
        currency: impl Into<String>,
        encrypted_private_key: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            user_id: user_id.into(),
            address: address.into(),
            currency: currency.into(),
            encrypted_private_key: encrypted_private_key.into(),
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("wallet_id", &self.wallet_id)
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .field("currency", &self.currency)
            .field("encrypted_private_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

// =============================================================================
// Forwardings
// =============================================================================

/// Forwarding status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingStatus {
    /// Created, not yet broadcast
    Pending,
    /// Broadcast accepted by the node
    Sent,
    /// Gave up; needs operator intervention
    Failed,
}

impl ForwardingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ForwardingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement of a confirmed deposit's funds to the treasury wallet.
///
/// Keyed by `deposit_hash`: at most one exists per deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forwarding {
    /// Unique forwarding identifier (UUID)
    pub forwarding_id: String,
    /// Source custodial wallet
    pub wallet_id: String,
    /// Originating deposit hash (normalized, idempotency key)
    pub deposit_hash: String,
    /// Amount to forward (same as the deposit)
    pub amount: String,
    /// Currency code
    pub currency: String,
    /// Treasury address at the time the forwarding was created
    pub destination: String,
    /// Current status
    pub status: ForwardingStatus,
    /// Broadcast transaction hash (once sent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_hash: Option<String>,
    /// Why the forwarding failed (once failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the forwarding was created
    pub created_at: DateTime<Utc>,
    /// When the status was last updated
    pub updated_at: DateTime<Utc>,
}

impl Forwarding {
    /// Create a pending forwarding for a confirmed deposit.
    pub fn for_deposit(deposit: &Deposit, destination: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            forwarding_id: uuid::Uuid::new_v4().to_string(),
            wallet_id: deposit.wallet_id.clone(),
            deposit_hash: normalize_hash(&deposit.tx_hash),
            amount: deposit.amount.clone(),
            currency: deposit.currency.clone(),
            destination: destination.into(),
            status: ForwardingStatus::Pending,
            broadcast_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use crate::blockchain::{BroadcastError, LedgerError};
use crate::config::ConfigError;
use crate::keys::DecryptionError;
use crate::storage::SweepDbError;

/// Why a single forwarding could not be broadcast.
///
/// Every variant except [`ForwardingError::Storage`] is terminal for the
/// record. A storage error leaves it pending for the next sweep.
#[derive(Debug, thiserror::Error)]
pub enum ForwardingError {
    #[error("source wallet {0} not found")]
    WalletNotFound(String),

    #[error("key decryption failed: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("broadcast timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] SweepDbError),
}

impl ForwardingError {
    /// Whether the forwarding should be marked `failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Fatal errors before the first sweep.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open database: {0}")]
    Database(#[from] SweepDbError),

    #[error("failed to create data directory: {0}")]
    DataDir(#[from] std::io::Error),

    #[error("failed to build ledger client: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to build broadcaster: {0}")]
    Broadcaster(#[from] BroadcastError),

    #[error("failed to load key-encryption key: {0}")]
    KeyEncryption(#[from] DecryptionError),
}

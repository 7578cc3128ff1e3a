// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain integration.
//!
//! - Reading address history and chain height from an explorer API
//! - Turning custodial key material into signers
//! - Signing and broadcasting forwarding transfers

pub mod broadcast;
pub mod ledger;
pub mod signing;
pub mod types;

pub use broadcast::{Broadcaster, BroadcastError, EvmBroadcaster};
pub use ledger::{ExplorerClient, LedgerClient, LedgerError};
pub use signing::SigningError;
pub use types::*;

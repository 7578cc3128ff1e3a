// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Deposit Sweeper - Deposit Confirmation and Forwarding Service
//!
//! Periodically checks user-submitted deposits against the chain, finalizes
//! them once they are deep enough, and forwards confirmed funds from the
//! custodial deposit wallets to the treasury.
//!
//! ## Modules
//!
//! - `blockchain` - Explorer ledger client, signing and broadcasting
//! - `config` - Environment configuration
//! - `keys` - Encryption of custodial keys at rest
//! - `storage` - redb database and audit log
//! - `sweeper` - Confirmation engine, forwarding orchestrator, scheduler

pub mod blockchain;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod storage;
pub mod sweeper;

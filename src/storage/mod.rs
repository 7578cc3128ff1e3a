// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sweeper Storage
//!
//! Deposits, custodial wallets, forwarding records and the audit log live in
//! one embedded redb database under the data directory:
//!
//! ```text
//! /data/
//!   sweeper.redb
//! ```
//!
//! The sweeper only ever reads wallets and pending work, and writes status
//! transitions through guarded read-modify-write transactions. Deposit and
//! wallet creation belong to the account-facing service sharing this file.

pub mod audit;
pub mod database;

pub use audit::{AuditEntry, AuditEventType, AuditRepository};
pub use database::{
    CreateOutcome, DepositTransition, ForwardingTransition, ForwardingUpdate, SweepDatabase,
    SweepDbError, SweepDbResult,
};

/// File name of the sweeper database inside the data directory.
pub const DATABASE_FILE: &str = "sweeper.redb";

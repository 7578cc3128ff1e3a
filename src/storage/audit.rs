// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only audit log for deposit and forwarding state transitions.
//!
//! Operators read this as a diagnostic stream. It is never consulted as the
//! source of truth for deposit or forwarding state, and there is no update
//! or delete path.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::database::{SweepDatabase, SweepDbResult};
use crate::models::normalize_hash;

/// Sequence number → serialized AuditEntry (JSON bytes).
pub(super) const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Deposit events
    DepositConfirmed,
    DepositFailed,

    // Ledger events
    LedgerUnavailable,

    // Forwarding events
    ForwardingCreated,
    ForwardingSent,
    ForwardingFailed,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, assigned on append.
    #[serde(default)]
    pub sequence: u64,
    /// Unique entry ID.
    pub entry_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Deposit the event refers to, if any.
    pub deposit_hash: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl AuditEntry {
    /// Create a new audit entry.
    pub fn new(event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            entry_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            deposit_hash: None,
            message: message.into(),
        }
    }

    /// Reference a deposit.
    pub fn with_deposit(mut self, tx_hash: &str) -> Self {
        self.deposit_hash = Some(normalize_hash(tx_hash));
        self
    }
}

/// Repository for audit entries.
pub struct AuditRepository<'a> {
    db: &'a SweepDatabase,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(db: &'a SweepDatabase) -> Self {
        Self { db }
    }

    /// Append an entry and return its sequence number.
    pub fn log(&self, entry: &AuditEntry) -> SweepDbResult<u64> {
        let write_txn = self.db.raw().begin_write()?;
        let sequence = {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            let next = table.last()?.map(|(k, _)| k.value() + 1).unwrap_or(1);

            let mut stored = entry.clone();
            stored.sequence = next;
            let json = serde_json::to_vec(&stored)?;
            table.insert(next, json.as_slice())?;
            next
        };
        write_txn.commit()?;
        Ok(sequence)
    }

    /// Read up to `limit` entries with a sequence greater than `after`, in
    /// append order.
    pub fn read_entries(&self, after: u64, limit: usize) -> SweepDbResult<Vec<AuditEntry>> {
        let read_txn = self.db.raw().begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let mut entries = Vec::new();
        for item in table.range(after.saturating_add(1)..)? {
            if entries.len() >= limit {
                break;
            }
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// All entries referencing a deposit, in append order.
    pub fn entries_for_deposit(&self, tx_hash: &str) -> SweepDbResult<Vec<AuditEntry>> {
        let hash = normalize_hash(tx_hash);
        let read_txn = self.db.raw().begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let mut entries = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let entry: AuditEntry = serde_json::from_slice(value.value())?;
            if entry.deposit_hash.as_deref() == Some(hash.as_str()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Append an audit entry, mirroring it to tracing.
///
/// An append failure is logged and swallowed so auditing never aborts a
/// sweep.
///
/// ```rust,ignore
/// audit_log!(db, AuditEventType::DepositConfirmed, Some(hash.as_str()), "Transaction {hash} set to confirmed");
/// audit_log!(db, AuditEventType::LedgerUnavailable, None, "Error fetching transactions for {address}: {e}");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($db:expr, $event_type:expr, $deposit:expr, $($msg:tt)+) => {{
        let message = format!($($msg)+);
        let deposit: Option<&str> = $deposit;
        let mut entry = $crate::storage::AuditEntry::new($event_type, message);
        if let Some(hash) = deposit {
            entry = entry.with_deposit(hash);
        }
        tracing::info!(
            event_type = ?entry.event_type,
            deposit_hash = ?entry.deposit_hash,
            "audit: {}",
            entry.message
        );
        if let Err(e) = $crate::storage::AuditRepository::new($db).log(&entry) {
            tracing::warn!(error = %e, "Failed to append audit entry");
        }
    }};
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded sweeper database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `deposits`: normalized tx_hash → serialized Deposit
//! - `pending_deposits`: normalized tx_hash → () for deposits still pending
//! - `wallets`: wallet_id → serialized WalletRecord
//! - `address_wallet_map`: lowercase on-chain address → wallet_id
//! - `forwardings`: normalized deposit hash → serialized Forwarding
//! - `pending_forwardings`: normalized deposit hash → () for forwardings still pending
//! - `audit_log`: sequence → serialized AuditEntry (see [`super::audit`])
//!
//! Every status change is a read-modify-write inside a single write
//! transaction. redb serializes writers, so a deposit is finalized at most
//! once and a forwarding is created at most once per deposit hash even when
//! two sweeps race.

use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::audit::AUDIT_LOG;
use crate::models::{
    normalize_address, normalize_hash, Deposit, DepositStatus, Forwarding, ForwardingStatus,
    WalletRecord,
};

// =============================================================================
// Table Definitions
// =============================================================================

const DEPOSITS: TableDefinition<&str, &[u8]> = TableDefinition::new("deposits");

const PENDING_DEPOSITS: TableDefinition<&str, ()> = TableDefinition::new("pending_deposits");

const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

const ADDRESS_WALLET_MAP: TableDefinition<&str, &str> = TableDefinition::new("address_wallet_map");

const FORWARDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("forwardings");

const PENDING_FORWARDINGS: TableDefinition<&str, ()> = TableDefinition::new("pending_forwardings");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SweepDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type SweepDbResult<T> = Result<T, SweepDbError>;

// =============================================================================
// Write Outcomes
// =============================================================================

/// Result of a guarded deposit status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositTransition {
    /// The update was written; carries the stored record.
    Applied(Deposit),
    /// The record was already terminal (or the depth did not increase);
    /// nothing was written. Carries the current record.
    Unchanged(Deposit),
}

/// Result of an idempotent forwarding creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new record was stored.
    Created(Forwarding),
    /// A record already existed for this deposit hash; it is returned as is.
    AlreadyExists(Forwarding),
}

/// Terminal update for a forwarding record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingUpdate {
    Sent { broadcast_hash: String },
    Failed { reason: String },
}

/// Result of a guarded forwarding status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingTransition {
    Applied(Forwarding),
    Unchanged(Forwarding),
}

// =============================================================================
// SweepDatabase
// =============================================================================

/// Embedded ACID store for deposits, wallets, forwardings and the audit log.
pub struct SweepDatabase {
    db: Database,
}

impl SweepDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> SweepDbResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DEPOSITS)?;
            let _ = write_txn.open_table(PENDING_DEPOSITS)?;
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(ADDRESS_WALLET_MAP)?;
            let _ = write_txn.open_table(FORWARDINGS)?;
            let _ = write_txn.open_table(PENDING_FORWARDINGS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(super) fn raw(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    /// Store a wallet and register its address.
    pub fn insert_wallet(&self, wallet: &WalletRecord) -> SweepDbResult<()> {
        let json = serde_json::to_vec(wallet)?;
        let address = normalize_address(&wallet.address);

        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            if wallets.get(wallet.wallet_id.as_str())?.is_some() {
                return Err(SweepDbError::AlreadyExists(format!(
                    "Wallet {}",
                    wallet.wallet_id
                )));
            }
            wallets.insert(wallet.wallet_id.as_str(), json.as_slice())?;

            let mut map = write_txn.open_table(ADDRESS_WALLET_MAP)?;
            map.insert(address.as_str(), wallet.wallet_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Overwrite a wallet row with raw bytes.
    #[cfg(test)]
    pub(crate) fn put_wallet_bytes(&self, wallet_id: &str, bytes: &[u8]) -> SweepDbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            wallets.insert(wallet_id, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up a wallet by id.
    pub fn get_wallet(&self, wallet_id: &str) -> SweepDbResult<Option<WalletRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        match table.get(wallet_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up which wallet_id owns a given on-chain address.
    pub fn get_wallet_id_for_address(&self, address: &str) -> SweepDbResult<Option<String>> {
        let addr = normalize_address(address);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ADDRESS_WALLET_MAP)?;
        match table.get(addr.as_str())? {
            Some(v) => Ok(Some(v.value().to_string())),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Store a newly submitted deposit. Hashes are unique.
    pub fn insert_deposit(&self, deposit: &Deposit) -> SweepDbResult<()> {
        let key = normalize_hash(&deposit.tx_hash);
        let mut stored = deposit.clone();
        stored.tx_hash = key.clone();
        let json = serde_json::to_vec(&stored)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DEPOSITS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(SweepDbError::AlreadyExists(format!("Deposit {key}")));
            }
            table.insert(key.as_str(), json.as_slice())?;

            if stored.status == DepositStatus::Pending {
                let mut pending = write_txn.open_table(PENDING_DEPOSITS)?;
                pending.insert(key.as_str(), ())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up a deposit by hash (case-insensitive).
    pub fn get_deposit(&self, tx_hash: &str) -> SweepDbResult<Option<Deposit>> {
        let key = normalize_hash(tx_hash);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEPOSITS)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All deposits still pending, oldest first.
    pub fn get_pending_deposits(&self) -> SweepDbResult<Vec<Deposit>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_DEPOSITS)?;
        let deposits = read_txn.open_table(DEPOSITS)?;

        let mut results = Vec::new();
        for entry in pending.iter()? {
            let (key, _) = entry?;
            if let Some(value) = deposits.get(key.value())? {
                let deposit: Deposit = serde_json::from_slice(value.value())?;
                if deposit.status == DepositStatus::Pending {
                    results.push(deposit);
                }
            }
        }

        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    /// Atomically apply a status/confirmation update to a pending deposit.
    ///
    /// Terminal deposits are never touched. A `Pending` update is only
    /// written when it raises the confirmation count. The stored count is
    /// never lowered.
    pub fn update_deposit_status(
        &self,
        tx_hash: &str,
        status: DepositStatus,
        confirmations: u64,
    ) -> SweepDbResult<DepositTransition> {
        let key = normalize_hash(tx_hash);

        let write_txn = self.db.begin_write()?;
        let transition = {
            let mut table = write_txn.open_table(DEPOSITS)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = {
                let existing = table
                    .get(key.as_str())?
                    .ok_or_else(|| SweepDbError::NotFound(format!("Deposit {key}")))?;
                existing.value().to_vec()
            };
            let mut deposit: Deposit = serde_json::from_slice(&existing_bytes)?;

            let no_progress = status == DepositStatus::Pending && confirmations <= deposit.confirmations;
            if deposit.status.is_terminal() || no_progress {
                DepositTransition::Unchanged(deposit)
            } else {
                deposit.status = status;
                deposit.confirmations = deposit.confirmations.max(confirmations);
                deposit.updated_at = Utc::now();

                let json = serde_json::to_vec(&deposit)?;
                table.insert(key.as_str(), json.as_slice())?;

                if status.is_terminal() {
                    let mut pending = write_txn.open_table(PENDING_DEPOSITS)?;
                    pending.remove(key.as_str())?;
                }
                DepositTransition::Applied(deposit)
            }
        };
        write_txn.commit()?;
        Ok(transition)
    }

    // =========================================================================
    // Forwardings
    // =========================================================================

    /// Create a forwarding unless one already exists for its deposit hash.
    pub fn create_forwarding(&self, forwarding: &Forwarding) -> SweepDbResult<CreateOutcome> {
        let key = normalize_hash(&forwarding.deposit_hash);

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(FORWARDINGS)?;

            let existing_bytes = table.get(key.as_str())?.map(|v| v.value().to_vec());
            match existing_bytes {
                Some(bytes) => CreateOutcome::AlreadyExists(serde_json::from_slice(&bytes)?),
                None => {
                    let mut stored = forwarding.clone();
                    stored.deposit_hash = key.clone();
                    let json = serde_json::to_vec(&stored)?;
                    table.insert(key.as_str(), json.as_slice())?;

                    if stored.status == ForwardingStatus::Pending {
                        let mut pending = write_txn.open_table(PENDING_FORWARDINGS)?;
                        pending.insert(key.as_str(), ())?;
                    }
                    CreateOutcome::Created(stored)
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Look up the forwarding for a deposit hash.
    pub fn get_forwarding(&self, deposit_hash: &str) -> SweepDbResult<Option<Forwarding>> {
        let key = normalize_hash(deposit_hash);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FORWARDINGS)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All forwardings still pending, oldest first.
    pub fn get_pending_forwardings(&self) -> SweepDbResult<Vec<Forwarding>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_FORWARDINGS)?;
        let forwardings = read_txn.open_table(FORWARDINGS)?;

        let mut results = Vec::new();
        for entry in pending.iter()? {
            let (key, _) = entry?;
            if let Some(value) = forwardings.get(key.value())? {
                let forwarding: Forwarding = serde_json::from_slice(value.value())?;
                if forwarding.status == ForwardingStatus::Pending {
                    results.push(forwarding);
                }
            }
        }

        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    /// Atomically move a pending forwarding to `sent` or `failed`.
    pub fn update_forwarding_status(
        &self,
        deposit_hash: &str,
        update: ForwardingUpdate,
    ) -> SweepDbResult<ForwardingTransition> {
        let key = normalize_hash(deposit_hash);

        let write_txn = self.db.begin_write()?;
        let transition = {
            let mut table = write_txn.open_table(FORWARDINGS)?;

            let existing_bytes = {
                let existing = table
                    .get(key.as_str())?
                    .ok_or_else(|| SweepDbError::NotFound(format!("Forwarding {key}")))?;
                existing.value().to_vec()
            };
            let mut forwarding: Forwarding = serde_json::from_slice(&existing_bytes)?;

            if forwarding.status.is_terminal() {
                ForwardingTransition::Unchanged(forwarding)
            } else {
                match update {
                    ForwardingUpdate::Sent { broadcast_hash } => {
                        forwarding.status = ForwardingStatus::Sent;
                        forwarding.broadcast_hash = Some(broadcast_hash);
                    }
                    ForwardingUpdate::Failed { reason } => {
                        forwarding.status = ForwardingStatus::Failed;
                        forwarding.failure_reason = Some(reason);
                    }
                }
                forwarding.updated_at = Utc::now();

                let json = serde_json::to_vec(&forwarding)?;
                table.insert(key.as_str(), json.as_slice())?;

                let mut pending = write_txn.open_table(PENDING_FORWARDINGS)?;
                pending.remove(key.as_str())?;

                ForwardingTransition::Applied(forwarding)
            }
        };
        write_txn.commit()?;
        Ok(transition)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (SweepDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = SweepDatabase::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn sample_deposit(hash: &str) -> Deposit {
        Deposit::new_pending("user-1", "wallet-1", hash, "1.5", "ETH")
    }

    #[test]
    fn insert_and_get_deposit_case_insensitive() {
        let (db, _dir) = temp_db();
        db.insert_deposit(&sample_deposit("0xAAA")).unwrap();

        let stored = db.get_deposit("0xaaa").unwrap().unwrap();
        assert_eq!(stored.tx_hash, "0xaaa");
        assert_eq!(stored.amount, "1.5");
        assert!(db.get_deposit("0xAaA").unwrap().is_some());
    }

    #[test]
    fn duplicate_deposit_hash_is_rejected() {
        let (db, _dir) = temp_db();
        db.insert_deposit(&sample_deposit("0xaaa")).unwrap();
        let err = db.insert_deposit(&sample_deposit("0xAAA")).unwrap_err();
        assert!(matches!(err, SweepDbError::AlreadyExists(_)));
    }

    #[test]
    fn pending_deposits_are_listed_until_finalized() {
        let (db, _dir) = temp_db();
        db.insert_deposit(&sample_deposit("0x01")).unwrap();
        db.insert_deposit(&sample_deposit("0x02")).unwrap();
        assert_eq!(db.get_pending_deposits().unwrap().len(), 2);

        db.update_deposit_status("0x01", DepositStatus::Confirmed, 12)
            .unwrap();

        let pending = db.get_pending_deposits().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tx_hash, "0x02");
    }

    #[test]
    fn finalize_happens_once() {
        let (db, _dir) = temp_db();
        db.insert_deposit(&sample_deposit("0xbbb")).unwrap();

        let first = db
            .update_deposit_status("0xbbb", DepositStatus::Confirmed, 12)
            .unwrap();
        assert!(matches!(first, DepositTransition::Applied(ref d) if d.status == DepositStatus::Confirmed));

        let second = db
            .update_deposit_status("0xbbb", DepositStatus::Failed, 20)
            .unwrap();
        match second {
            DepositTransition::Unchanged(d) => {
                assert_eq!(d.status, DepositStatus::Confirmed);
                assert_eq!(d.confirmations, 12);
            }
            other => panic!("expected unchanged, got {other:?}"),
        }
    }

    #[test]
    fn pending_progress_never_lowers_confirmations() {
        let (db, _dir) = temp_db();
        db.insert_deposit(&sample_deposit("0xccc")).unwrap();

        let applied = db
            .update_deposit_status("0xccc", DepositStatus::Pending, 5)
            .unwrap();
        assert!(matches!(applied, DepositTransition::Applied(ref d) if d.confirmations == 5));

        let lower = db
            .update_deposit_status("0xccc", DepositStatus::Pending, 3)
            .unwrap();
        assert!(matches!(lower, DepositTransition::Unchanged(ref d) if d.confirmations == 5));

        let final_lower = db
            .update_deposit_status("0xccc", DepositStatus::Confirmed, 2)
            .unwrap();
        assert!(matches!(final_lower, DepositTransition::Applied(ref d) if d.confirmations == 5));
    }

    #[test]
    fn update_unknown_deposit_is_not_found() {
        let (db, _dir) = temp_db();
        let err = db
            .update_deposit_status("0xmissing", DepositStatus::Confirmed, 12)
            .unwrap_err();
        assert!(matches!(err, SweepDbError::NotFound(_)));
    }

    #[test]
    fn create_forwarding_twice_yields_single_record() {
        let (db, _dir) = temp_db();
        let deposit = sample_deposit("0xDDD");

        let first = db
            .create_forwarding(&Forwarding::for_deposit(&deposit, "0xtreasury"))
            .unwrap();
        let second = db
            .create_forwarding(&Forwarding::for_deposit(&deposit, "0xtreasury"))
            .unwrap();

        let CreateOutcome::Created(created) = first else {
            panic!("first create should store a record");
        };
        let CreateOutcome::AlreadyExists(existing) = second else {
            panic!("second create should be a no-op");
        };
        assert_eq!(created, existing);
        assert_eq!(db.get_forwarding("0xddd").unwrap(), Some(created));
        assert_eq!(db.get_pending_forwardings().unwrap().len(), 1);
    }

    #[test]
    fn forwarding_status_is_terminal_once_set() {
        let (db, _dir) = temp_db();
        let deposit = sample_deposit("0xeee");
        db.create_forwarding(&Forwarding::for_deposit(&deposit, "0xtreasury"))
            .unwrap();

        let sent = db
            .update_forwarding_status(
                "0xEEE",
                ForwardingUpdate::Sent {
                    broadcast_hash: "0xbroadcast".to_string(),
                },
            )
            .unwrap();
        assert!(matches!(sent, ForwardingTransition::Applied(ref f)
            if f.status == ForwardingStatus::Sent
                && f.broadcast_hash.as_deref() == Some("0xbroadcast")));
        assert!(db.get_pending_forwardings().unwrap().is_empty());

        let failed = db
            .update_forwarding_status(
                "0xeee",
                ForwardingUpdate::Failed {
                    reason: "late".to_string(),
                },
            )
            .unwrap();
        assert!(matches!(failed, ForwardingTransition::Unchanged(ref f)
            if f.status == ForwardingStatus::Sent && f.failure_reason.is_none()));
    }

    #[test]
    fn wallet_and_address_mapping() {
        let (db, _dir) = temp_db();
        let wallet = WalletRecord::new(
            "wallet-42",
            "user-1",
            "0xABCD1234567890ABCDEF1234567890ABCDEF1234",
            "ETH",
            "sealed",
        );
        db.insert_wallet(&wallet).unwrap();

        let stored = db.get_wallet("wallet-42").unwrap().unwrap();
        assert_eq!(stored.address, wallet.address);

        let by_addr = db
            .get_wallet_id_for_address("0xabcd1234567890abcdef1234567890abcdef1234")
            .unwrap();
        assert_eq!(by_addr, Some("wallet-42".to_string()));

        let err = db.insert_wallet(&wallet).unwrap_err();
        assert!(matches!(err, SweepDbError::AlreadyExists(_)));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Confirmation Engine
//!
//! Decides when pending deposits are final.
//!
//! ## Strategy
//!
//! Each pass:
//! 1. Reads all pending deposits and groups them by the on-chain address of
//!    their custodial wallet.
//! 2. Queries the ledger for every address (bounded parallelism), fetching the
//!    address history and the current chain height.
//! 3. Walks the history in ascending block order. A pending deposit whose hash
//!    appears with at least [`FINALITY_THRESHOLD`] confirmations becomes
//!    `confirmed` (successful receipt) or `failed` (anything else). Shallower
//!    deposits only have their confirmation count raised.
//! 4. Newly confirmed deposits immediately get a forwarding record.
//!
//! A ledger failure for one address is logged and audited and leaves its
//! deposits pending; other addresses are unaffected.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::forwarding::ForwardingOrchestrator;
use crate::audit_log;
use crate::blockchain::{confirmations_at, LedgerClient, LedgerError, LedgerTransaction};
use crate::models::{normalize_address, normalize_hash, Deposit, DepositStatus};
use crate::storage::{AuditEventType, DepositTransition, SweepDatabase};

/// Confirmations at which a deposit is considered final.
pub const FINALITY_THRESHOLD: u64 = 12;

/// Outcome counters for one confirmation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmationReport {
    pub addresses_checked: usize,
    pub addresses_unavailable: usize,
    pub deposits_confirmed: usize,
    pub deposits_failed: usize,
    pub deposits_progressed: usize,
    pub forwardings_created: usize,
}

impl ConfirmationReport {
    fn absorb(&mut self, other: ConfirmationReport) {
        self.addresses_checked += other.addresses_checked;
        self.addresses_unavailable += other.addresses_unavailable;
        self.deposits_confirmed += other.deposits_confirmed;
        self.deposits_failed += other.deposits_failed;
        self.deposits_progressed += other.deposits_progressed;
        self.forwardings_created += other.forwardings_created;
    }
}

/// Confirmation pass that matches pending deposits against ledger history
/// and finalizes them at [`FINALITY_THRESHOLD`] confirmations.
pub struct ConfirmationEngine {
    db: Arc<SweepDatabase>,
    ledger: Arc<dyn LedgerClient>,
    forwarding: Arc<ForwardingOrchestrator>,
    concurrency: usize,
    call_timeout: Duration,
}

impl ConfirmationEngine {
    /// Create an engine querying at most `concurrency` addresses at once,
    /// each ledger call bounded by `call_timeout`.
    pub fn new(
        db: Arc<SweepDatabase>,
        ledger: Arc<dyn LedgerClient>,
        forwarding: Arc<ForwardingOrchestrator>,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            forwarding,
            concurrency: concurrency.max(1),
            call_timeout,
        }
    }

    /// Run one confirmation pass over all pending deposits.
    pub async fn run(&self) -> ConfirmationReport {
        let mut report = ConfirmationReport::default();

        let pending = match self.db.get_pending_deposits() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to load pending deposits");
                return report;
            }
        };

        if pending.is_empty() {
            return report;
        }

        let by_address = self.group_by_address(pending);
        debug!(addresses = by_address.len(), "Checking deposit addresses");

        let outcomes: Vec<ConfirmationReport> = stream::iter(by_address)
            .map(|(address, deposits)| self.check_address(address, deposits))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.absorb(outcome);
        }
        report
    }

    /// Partition deposits by their wallet's normalized address. Deposits
    /// whose wallet cannot be resolved are skipped and stay pending.
    fn group_by_address(&self, deposits: Vec<Deposit>) -> BTreeMap<String, Vec<Deposit>> {
        let mut addresses: HashMap<String, Option<String>> = HashMap::new();
        let mut grouped: BTreeMap<String, Vec<Deposit>> = BTreeMap::new();

        for deposit in deposits {
            let address = addresses
                .entry(deposit.wallet_id.clone())
                .or_insert_with(|| match self.db.get_wallet(&deposit.wallet_id) {
                    Ok(Some(wallet)) => Some(normalize_address(&wallet.address)),
                    Ok(None) => {
                        warn!(
                            wallet_id = %deposit.wallet_id,
                            "Wallet for pending deposit not found"
                        );
                        None
                    }
                    Err(e) => {
                        warn!(
                            wallet_id = %deposit.wallet_id,
                            error = %e,
                            "Failed to load wallet for pending deposit"
                        );
                        None
                    }
                })
                .clone();

            match address {
                Some(address) => grouped.entry(address).or_default().push(deposit),
                None => debug!(tx_hash = %deposit.tx_hash, "Deposit left pending without wallet"),
            }
        }

        grouped
    }

    async fn check_address(&self, address: String, deposits: Vec<Deposit>) -> ConfirmationReport {
        let mut report = ConfirmationReport {
            addresses_checked: 1,
            ..Default::default()
        };

        let (transactions, height) = match self.fetch(&address).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(address = %address, error = %e, "Ledger unavailable for address");
                audit_log!(
                    &self.db,
                    AuditEventType::LedgerUnavailable,
                    None,
                    "Error fetching transactions for {address}: {e}"
                );
                report.addresses_unavailable = 1;
                return report;
            }
        };

        let mut pending: HashMap<String, Deposit> = deposits
            .into_iter()
            .map(|d| (normalize_hash(&d.tx_hash), d))
            .collect();

        for tx in &transactions {
            if pending.is_empty() {
                break;
            }
            if let Some(deposit) = pending.remove(&normalize_hash(&tx.hash)) {
                self.apply(&deposit, tx, height, &mut report);
            }
        }

        if !pending.is_empty() {
            debug!(
                address = %address,
                unseen = pending.len(),
                "Pending deposits not yet visible on ledger"
            );
        }

        report
    }

    async fn fetch(&self, address: &str) -> Result<(Vec<LedgerTransaction>, u64), LedgerError> {
        let transactions = self.bounded(self.ledger.list_transactions(address)).await?;
        if transactions.is_empty() {
            return Ok((transactions, 0));
        }
        let height = self.bounded(self.ledger.current_height()).await?;
        Ok((transactions, height))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                LedgerError::Unavailable(format!("timed out after {:?}", self.call_timeout))
            })?
    }

    fn apply(
        &self,
        deposit: &Deposit,
        tx: &LedgerTransaction,
        height: u64,
        report: &mut ConfirmationReport,
    ) {
        let confirmations = confirmations_at(height, tx.block_number);

        if confirmations < FINALITY_THRESHOLD {
            if confirmations > deposit.confirmations {
                match self
                    .db
                    .update_deposit_status(&deposit.tx_hash, DepositStatus::Pending, confirmations)
                {
                    Ok(DepositTransition::Applied(_)) => {
                        report.deposits_progressed += 1;
                        debug!(
                            tx_hash = %deposit.tx_hash,
                            confirmations,
                            "Deposit confirmation progress"
                        );
                    }
                    Ok(DepositTransition::Unchanged(_)) => {}
                    Err(e) => warn!(
                        tx_hash = %deposit.tx_hash,
                        error = %e,
                        "Failed to record confirmation progress"
                    ),
                }
            }
            return;
        }

        let (status, event_type) = if tx.receipt_success {
            (DepositStatus::Confirmed, AuditEventType::DepositConfirmed)
        } else {
            (DepositStatus::Failed, AuditEventType::DepositFailed)
        };

        let updated = match self
            .db
            .update_deposit_status(&deposit.tx_hash, status, confirmations)
        {
            Ok(DepositTransition::Applied(updated)) => updated,
            Ok(DepositTransition::Unchanged(current)) => {
                debug!(
                    tx_hash = %current.tx_hash,
                    status = %current.status,
                    "Deposit already finalized"
                );
                return;
            }
            Err(e) => {
                warn!(
                    tx_hash = %deposit.tx_hash,
                    error = %e,
                    "Failed to finalize deposit"
                );
                return;
            }
        };

        info!(
            tx_hash = %updated.tx_hash,
            status = %status,
            confirmations,
            block_number = tx.block_number,
            "Deposit finalized"
        );
        audit_log!(
            &self.db,
            event_type,
            Some(updated.tx_hash.as_str()),
            "Transaction {} set to {} with {} confirmations.",
            updated.tx_hash,
            status,
            confirmations
        );

        if status == DepositStatus::Failed {
            report.deposits_failed += 1;
            return;
        }

        report.deposits_confirmed += 1;
        match self.forwarding.initiate(&updated) {
            Ok(true) => report.forwardings_created += 1,
            Ok(false) => {}
            Err(e) => warn!(
                tx_hash = %updated.tx_hash,
                error = %e,
                "Failed to create forwarding for confirmed deposit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ForwardingStatus;
    use crate::storage::AuditRepository;
    use crate::sweeper::testing::Harness;

    const ADDR_A: &str = "0xAAAA00000000000000000000000000000000aaaa";
    const ADDR_B: &str = "0xBBBB00000000000000000000000000000000bbbb";

    #[tokio::test]
    async fn eleven_confirmations_stay_pending_twelve_confirm() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xd1", "1.0");
        harness.ledger.add_transaction(ADDR_A, "0xD1", 100, true);
        let engine = harness.engine(harness.orchestrator());

        harness.ledger.set_height(110);
        let report = engine.run().await;
        assert_eq!(report.deposits_confirmed, 0);
        assert_eq!(report.deposits_progressed, 1);
        let deposit = harness.db.get_deposit("0xd1").unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert_eq!(deposit.confirmations, 11);
        assert!(harness.db.get_forwarding("0xd1").unwrap().is_none());

        harness.ledger.set_height(111);
        let report = engine.run().await;
        assert_eq!(report.deposits_confirmed, 1);
        assert_eq!(report.forwardings_created, 1);
        let deposit = harness.db.get_deposit("0xd1").unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Confirmed);
        assert_eq!(deposit.confirmations, 12);

        let entries = AuditRepository::new(&harness.db)
            .entries_for_deposit("0xd1")
            .unwrap();
        assert_eq!(entries[0].event_type, AuditEventType::DepositConfirmed);
        assert_eq!(
            entries[0].message,
            "Transaction 0xd1 set to confirmed with 12 confirmations."
        );
    }

    #[tokio::test]
    async fn failed_receipt_marks_deposit_failed() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xbad", "3");
        harness.ledger.add_transaction(ADDR_A, "0xbad", 50, false);
        harness.ledger.set_height(200);

        let report = harness.engine(harness.orchestrator()).run().await;
        assert_eq!(report.deposits_failed, 1);
        assert_eq!(report.forwardings_created, 0);

        let deposit = harness.db.get_deposit("0xbad").unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Failed);
        assert!(harness.db.get_forwarding("0xbad").unwrap().is_none());

        let entries = AuditRepository::new(&harness.db)
            .entries_for_deposit("0xbad")
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, AuditEventType::DepositFailed);
    }

    #[tokio::test]
    async fn ledger_failure_on_one_address_does_not_block_another() {
        let harness = Harness::new();
        harness.add_wallet("wa", ADDR_A);
        harness.add_wallet("wb", ADDR_B);
        harness.add_deposit("wa", "0xa1", "1");
        harness.add_deposit("wb", "0xb1", "2");
        harness.ledger.add_transaction(ADDR_A, "0xa1", 10, true);
        harness.ledger.add_transaction(ADDR_B, "0xb1", 10, true);
        harness.ledger.fail_address(ADDR_A);
        harness.ledger.set_height(100);

        let report = harness.engine(harness.orchestrator()).run().await;
        assert_eq!(report.addresses_checked, 2);
        assert_eq!(report.addresses_unavailable, 1);
        assert_eq!(report.deposits_confirmed, 1);

        let a = harness.db.get_deposit("0xa1").unwrap().unwrap();
        let b = harness.db.get_deposit("0xb1").unwrap().unwrap();
        assert_eq!(a.status, DepositStatus::Pending);
        assert_eq!(b.status, DepositStatus::Confirmed);

        let unavailable: Vec<_> = AuditRepository::new(&harness.db)
            .read_entries(0, 100)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::LedgerUnavailable)
            .collect();
        assert_eq!(unavailable.len(), 1);
        assert!(unavailable[0]
            .message
            .starts_with(&format!("Error fetching transactions for {}", ADDR_A.to_lowercase())));
    }

    #[tokio::test]
    async fn confirmation_count_never_decreases() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xd2", "1");
        harness.ledger.add_transaction(ADDR_A, "0xd2", 100, true);
        let engine = harness.engine(harness.orchestrator());

        harness.ledger.set_height(108);
        engine.run().await;
        assert_eq!(harness.db.get_deposit("0xd2").unwrap().unwrap().confirmations, 9);

        // Lagging height endpoint
        harness.ledger.set_height(103);
        let report = engine.run().await;
        assert_eq!(report.deposits_progressed, 0);
        assert_eq!(harness.db.get_deposit("0xd2").unwrap().unwrap().confirmations, 9);
    }

    #[tokio::test]
    async fn concurrent_passes_create_one_forwarding() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xd3", "5");
        harness.ledger.add_transaction(ADDR_A, "0xd3", 1, true);
        harness.ledger.set_height(50);

        let forwarding = harness.orchestrator();
        let first = harness.engine(Arc::clone(&forwarding));
        let second = harness.engine(Arc::clone(&forwarding));

        let (r1, r2) = tokio::join!(first.run(), second.run());
        assert_eq!(r1.deposits_confirmed + r2.deposits_confirmed, 1);
        assert_eq!(r1.forwardings_created + r2.forwardings_created, 1);

        let stored = harness.db.get_forwarding("0xd3").unwrap().unwrap();
        assert_eq!(stored.status, ForwardingStatus::Pending);
        assert_eq!(harness.db.get_pending_forwardings().unwrap().len(), 1);

        let confirmations: Vec<_> = AuditRepository::new(&harness.db)
            .entries_for_deposit("0xd3")
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::DepositConfirmed)
            .collect();
        assert_eq!(confirmations.len(), 1);
    }

    #[tokio::test]
    async fn unknown_wallet_and_unseen_hash_stay_pending() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xnever", "1");
        harness.add_deposit("missing-wallet", "0xorphan", "1");
        harness.ledger.add_transaction(ADDR_A, "0xother", 1, true);
        harness.ledger.set_height(100);

        let report = harness.engine(harness.orchestrator()).run().await;
        assert_eq!(report.addresses_checked, 1);
        assert_eq!(report.deposits_confirmed, 0);

        assert_eq!(harness.db.get_pending_deposits().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn slow_ledger_counts_as_unavailable() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xd4", "1");
        harness.ledger.add_transaction(ADDR_A, "0xd4", 1, true);
        harness.ledger.set_height(100);
        harness.ledger.delay(Duration::from_millis(500));

        let engine = harness.engine_with_timeout(harness.orchestrator(), Duration::from_millis(20));
        let report = engine.run().await;

        assert_eq!(report.addresses_unavailable, 1);
        assert_eq!(
            harness.db.get_deposit("0xd4").unwrap().unwrap().status,
            DepositStatus::Pending
        );
    }

    #[tokio::test]
    async fn deposits_sharing_an_address_use_one_lookup() {
        let harness = Harness::new();
        harness.add_wallet("w1", ADDR_A);
        harness.add_deposit("w1", "0xe1", "1");
        harness.add_deposit("w1", "0xe2", "2");
        harness.ledger.add_transaction(ADDR_A, "0xe1", 10, true);
        harness.ledger.add_transaction(ADDR_A, "0xe2", 95, true);
        harness.ledger.set_height(100);

        let report = harness.engine(harness.orchestrator()).run().await;
        assert_eq!(harness.ledger.history_calls(), 1);
        assert_eq!(report.deposits_confirmed, 1);
        assert_eq!(report.deposits_progressed, 1);
        assert_eq!(harness.db.get_deposit("0xe2").unwrap().unwrap().confirmations, 6);
    }
}

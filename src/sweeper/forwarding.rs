// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Forwarding Orchestrator
//!
//! Moves confirmed deposits from custodial wallets to the treasury.
//!
//! A forwarding record is created exactly once per confirmed deposit hash
//! ([`ForwardingOrchestrator::initiate`]) and later executed
//! ([`ForwardingOrchestrator::execute_pending`]): decrypt the source wallet
//! key, sign and broadcast the full deposit amount, record `sent` with the
//! broadcast hash or `failed` with a reason. Failed forwardings are not
//! retried. A storage error while loading the source wallet is not a
//! failure: the record stays pending and the next sweep tries again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::audit_log;
use crate::blockchain::Broadcaster;
use crate::error::ForwardingError;
use crate::keys::KeyDecryptor;
use crate::models::{Deposit, DepositStatus, Forwarding};
use crate::storage::{
    AuditEventType, CreateOutcome, ForwardingTransition, ForwardingUpdate, SweepDatabase,
    SweepDbResult,
};

/// Outcome counters for one execution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Left pending after a storage error.
    pub deferred: usize,
}

/// Creates and executes treasury forwardings for confirmed deposits.
pub struct ForwardingOrchestrator {
    db: Arc<SweepDatabase>,
    decryptor: Arc<dyn KeyDecryptor>,
    broadcaster: Arc<dyn Broadcaster>,
    treasury_address: String,
    broadcast_timeout: Duration,
}

impl ForwardingOrchestrator {
    /// Create an orchestrator sending to `treasury_address`, each broadcast
    /// bounded by `broadcast_timeout`.
    pub fn new(
        db: Arc<SweepDatabase>,
        decryptor: Arc<dyn KeyDecryptor>,
        broadcaster: Arc<dyn Broadcaster>,
        treasury_address: impl Into<String>,
        broadcast_timeout: Duration,
    ) -> Self {
        Self {
            db,
            decryptor,
            broadcaster,
            treasury_address: treasury_address.into(),
            broadcast_timeout,
        }
    }

    /// Create the pending forwarding for a newly confirmed deposit.
    ///
    /// Returns `Ok(true)` when a record was created and `Ok(false)` when one
    /// already existed (or the deposit is not confirmed).
    pub fn initiate(&self, deposit: &Deposit) -> SweepDbResult<bool> {
        if deposit.status != DepositStatus::Confirmed {
            debug!(
                tx_hash = %deposit.tx_hash,
                status = %deposit.status,
                "Not forwarding unconfirmed deposit"
            );
            return Ok(false);
        }

        let forwarding = Forwarding::for_deposit(deposit, &self.treasury_address);
        match self.db.create_forwarding(&forwarding)? {
            CreateOutcome::Created(created) => {
                info!(
                    tx_hash = %created.deposit_hash,
                    forwarding_id = %created.forwarding_id,
                    wallet_id = %created.wallet_id,
                    amount = %created.amount,
                    currency = %created.currency,
                    "Forwarding created"
                );
                audit_log!(
                    &self.db,
                    AuditEventType::ForwardingCreated,
                    Some(created.deposit_hash.as_str()),
                    "Forwarding of {} {} from wallet {} to {} created for transaction {}.",
                    created.amount,
                    created.currency,
                    created.wallet_id,
                    created.destination,
                    created.deposit_hash
                );
                Ok(true)
            }
            CreateOutcome::AlreadyExists(existing) => {
                debug!(
                    tx_hash = %existing.deposit_hash,
                    status = ?existing.status,
                    "Forwarding already exists for deposit"
                );
                Ok(false)
            }
        }
    }

    /// Execute every pending forwarding, oldest first, one at a time.
    pub async fn execute_pending(&self) -> ForwardingReport {
        let mut report = ForwardingReport::default();

        let pending = match self.db.get_pending_forwardings() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to load pending forwardings");
                return report;
            }
        };

        if pending.is_empty() {
            return report;
        }

        info!(count = pending.len(), "Executing pending forwardings");

        for forwarding in &pending {
            report.attempted += 1;
            let update = match self.execute(forwarding).await {
                Ok(broadcast_hash) => {
                    report.sent += 1;
                    ForwardingUpdate::Sent { broadcast_hash }
                }
                Err(e) if !e.is_terminal() => {
                    report.deferred += 1;
                    warn!(
                        tx_hash = %forwarding.deposit_hash,
                        error = %e,
                        "Forwarding deferred to next sweep"
                    );
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    ForwardingUpdate::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            self.record(forwarding, update);
        }

        report
    }

    async fn execute(&self, forwarding: &Forwarding) -> Result<String, ForwardingError> {
        let wallet = self
            .db
            .get_wallet(&forwarding.wallet_id)?
            .ok_or_else(|| ForwardingError::WalletNotFound(forwarding.wallet_id.clone()))?;

        // Plaintext lives only for the duration of this call
        let private_key = self.decryptor.decrypt(&wallet.encrypted_private_key)?;

        let send = self
            .broadcaster
            .send_value(&private_key, &forwarding.destination, &forwarding.amount);

        let broadcast_hash = tokio::time::timeout(self.broadcast_timeout, send)
            .await
            .map_err(|_| ForwardingError::Timeout(self.broadcast_timeout))??;

        Ok(broadcast_hash)
    }

    fn record(&self, forwarding: &Forwarding, update: ForwardingUpdate) {
        let hash = forwarding.deposit_hash.as_str();

        match self.db.update_forwarding_status(hash, update.clone()) {
            Ok(ForwardingTransition::Applied(stored)) => match update {
                ForwardingUpdate::Sent { broadcast_hash } => {
                    info!(
                        tx_hash = %hash,
                        broadcast_hash = %broadcast_hash,
                        destination = %stored.destination,
                        "Forwarding sent"
                    );
                    audit_log!(
                        &self.db,
                        AuditEventType::ForwardingSent,
                        Some(hash),
                        "Forwarding for transaction {hash} sent to {} in {broadcast_hash}.",
                        stored.destination
                    );
                }
                ForwardingUpdate::Failed { reason } => {
                    warn!(tx_hash = %hash, reason = %reason, "Forwarding failed");
                    audit_log!(
                        &self.db,
                        AuditEventType::ForwardingFailed,
                        Some(hash),
                        "Forwarding for transaction {hash} failed: {reason}"
                    );
                }
            },
            Ok(ForwardingTransition::Unchanged(current)) => {
                debug!(
                    tx_hash = %hash,
                    status = ?current.status,
                    "Forwarding already terminal; result discarded"
                );
            }
            Err(e) => match update {
                // Funds moved but the record still says pending
                ForwardingUpdate::Sent { broadcast_hash } => error!(
                    tx_hash = %hash,
                    broadcast_hash = %broadcast_hash,
                    error = %e,
                    "Forwarding broadcast but status write failed"
                ),
                ForwardingUpdate::Failed { reason } => warn!(
                    tx_hash = %hash,
                    reason = %reason,
                    error = %e,
                    "Failed to record forwarding failure"
                ),
            },
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deposit Sweeper
//!
//! One sweep = a confirmation pass followed by execution of every pending
//! forwarding. Sweeps never overlap within a process: [`Sweeper`] hands out
//! at most one [`SweepPermit`] at a time and callers that cannot get one skip
//! their turn instead of queueing.

pub mod confirmation;
pub mod forwarding;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

pub use confirmation::{ConfirmationEngine, ConfirmationReport, FINALITY_THRESHOLD};
pub use forwarding::{ForwardingOrchestrator, ForwardingReport};
pub use scheduler::SweepScheduler;

/// Summary of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub confirmation: ConfirmationReport,
    pub forwarding: ForwardingReport,
}

/// Proof that the holder is the only running sweep. Released on drop.
pub struct SweepPermit {
    _guard: OwnedMutexGuard<()>,
}

/// Runs confirmation then forwarding behind a single-flight gate.
pub struct Sweeper {
    confirmations: ConfirmationEngine,
    forwarding: Arc<ForwardingOrchestrator>,
    gate: Arc<Mutex<()>>,
}

impl Sweeper {
    /// Create a sweeper over the given engine and orchestrator.
    pub fn new(confirmations: ConfirmationEngine, forwarding: Arc<ForwardingOrchestrator>) -> Self {
        Self {
            confirmations,
            forwarding,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Take the single-flight permit without waiting.
    pub fn try_acquire(&self) -> Option<SweepPermit> {
        Arc::clone(&self.gate)
            .try_lock_owned()
            .ok()
            .map(|guard| SweepPermit { _guard: guard })
    }

    /// Run a full sweep under `permit`.
    pub async fn run(&self, permit: SweepPermit) -> SweepReport {
        let started_at = Utc::now();

        let confirmation = self.confirmations.run().await;
        let forwarding = self.forwarding.execute_pending().await;

        let finished_at = Utc::now();
        drop(permit);

        info!(
            duration_ms = (finished_at - started_at).num_milliseconds(),
            addresses_checked = confirmation.addresses_checked,
            addresses_unavailable = confirmation.addresses_unavailable,
            deposits_confirmed = confirmation.deposits_confirmed,
            deposits_failed = confirmation.deposits_failed,
            deposits_progressed = confirmation.deposits_progressed,
            forwardings_created = confirmation.forwardings_created,
            forwardings_attempted = forwarding.attempted,
            forwardings_sent = forwarding.sent,
            forwardings_failed = forwarding.failed,
            forwardings_deferred = forwarding.deferred,
            "Sweep finished"
        );

        SweepReport {
            started_at,
            finished_at,
            confirmation,
            forwarding,
        }
    }

    /// Run a sweep unless one is already in flight.
    pub async fn try_sweep(&self) -> Option<SweepReport> {
        let permit = self.try_acquire()?;
        Some(self.run(permit).await)
    }

    /// Wait until no sweep is running.
    pub async fn wait_idle(&self) {
        let _guard = self.gate.lock().await;
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sweep Scheduler
//!
//! Background task that triggers a sweep every `interval` (default 60 s).
//! A tick that arrives while the previous sweep is still running is skipped,
//! never queued.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. On cancellation the scheduler
//! stops ticking and waits for an in-flight sweep to finish before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Sweeper;

/// Background task that triggers a sweep on a fixed interval.
pub struct SweepScheduler {
    sweeper: Arc<Sweeper>,
    interval: Duration,
}

impl SweepScheduler {
    /// Create a scheduler ticking every `interval`.
    pub fn new(sweeper: Arc<Sweeper>, interval: Duration) -> Self {
        Self { sweeper, interval }
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(scheduler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Sweep scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.trigger(),
            }
        }

        info!("Sweep scheduler shutting down");
        self.sweeper.wait_idle().await;
        info!("Sweep scheduler stopped");
    }

    fn trigger(&self) {
        let Some(permit) = self.sweeper.try_acquire() else {
            warn!("Previous sweep still running; skipping this tick");
            return;
        };

        let sweeper = Arc::clone(&self.sweeper);
        tokio::spawn(async move {
            sweeper.run(permit).await;
        });
    }
}

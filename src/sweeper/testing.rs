// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger and broadcaster plus a throwaway database for sweeper
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tempfile::TempDir;

use super::{ConfirmationEngine, ForwardingOrchestrator, Sweeper};
use crate::blockchain::{BroadcastError, Broadcaster, LedgerClient, LedgerError, LedgerTransaction};
use crate::keys::SealedKeyCipher;
use crate::models::{normalize_address, Deposit, WalletRecord};
use crate::storage::SweepDatabase;

pub const TREASURY: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
pub const WALLET_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

#[derive(Default)]
pub struct FakeLedger {
    histories: Mutex<HashMap<String, Vec<LedgerTransaction>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    height: AtomicU64,
    history_calls: AtomicUsize,
}

impl FakeLedger {
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn add_transaction(&self, address: &str, hash: &str, block_number: u64, success: bool) {
        self.histories
            .lock()
            .unwrap()
            .entry(normalize_address(address))
            .or_default()
            .push(LedgerTransaction {
                hash: hash.to_string(),
                block_number,
                receipt_success: success,
            });
    }

    pub fn fail_address(&self, address: &str) {
        self.failing.lock().unwrap().insert(normalize_address(address));
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn list_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let address = normalize_address(address);
        if self.failing.lock().unwrap().contains(&address) {
            return Err(LedgerError::Unavailable("connection reset".to_string()));
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub private_key: String,
    pub destination: String,
    pub amount: String,
    pub returned_hash: String,
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    sends: Mutex<Vec<RecordedSend>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingBroadcaster {
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }

    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn send_value(
        &self,
        private_key: &str,
        destination: &str,
        amount: &str,
    ) -> Result<String, BroadcastError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return Err(BroadcastError::Rejected(reason));
        }

        let mut sends = self.sends.lock().unwrap();
        let returned_hash = format!("0x{:064x}", sends.len() + 1);
        sends.push(RecordedSend {
            private_key: private_key.to_string(),
            destination: destination.to_string(),
            amount: amount.to_string(),
            returned_hash: returned_hash.clone(),
        });
        Ok(returned_hash)
    }
}

/// Database in a temp dir wired to the fakes above.
pub struct Harness {
    pub db: Arc<SweepDatabase>,
    pub ledger: Arc<FakeLedger>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub cipher: Arc<SealedKeyCipher>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = SweepDatabase::open(&dir.path().join("sweeper.redb")).unwrap();
        let cipher = SealedKeyCipher::from_base64(&BASE64.encode([42u8; 32])).unwrap();

        Self {
            db: Arc::new(db),
            ledger: Arc::new(FakeLedger::default()),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
            cipher: Arc::new(cipher),
            _dir: dir,
        }
    }

    /// Store a wallet whose sealed key opens to [`WALLET_KEY`].
    pub fn add_wallet(&self, wallet_id: &str, address: &str) -> WalletRecord {
        let sealed = self.cipher.seal(WALLET_KEY).unwrap();
        let wallet = WalletRecord::new(wallet_id, "user-1", address, "ETH", sealed);
        self.db.insert_wallet(&wallet).unwrap();
        wallet
    }

    pub fn add_deposit(&self, wallet_id: &str, tx_hash: &str, amount: &str) -> Deposit {
        let deposit = Deposit::new_pending("user-1", wallet_id, tx_hash, amount, "ETH");
        self.db.insert_deposit(&deposit).unwrap();
        deposit
    }

    pub fn orchestrator(&self) -> Arc<ForwardingOrchestrator> {
        self.orchestrator_with_timeout(Duration::from_secs(5))
    }

    pub fn orchestrator_with_timeout(&self, timeout: Duration) -> Arc<ForwardingOrchestrator> {
        Arc::new(ForwardingOrchestrator::new(
            Arc::clone(&self.db),
            self.cipher.clone(),
            self.broadcaster.clone(),
            TREASURY,
            timeout,
        ))
    }

    pub fn engine(&self, forwarding: Arc<ForwardingOrchestrator>) -> ConfirmationEngine {
        self.engine_with_timeout(forwarding, Duration::from_secs(5))
    }

    pub fn engine_with_timeout(
        &self,
        forwarding: Arc<ForwardingOrchestrator>,
        call_timeout: Duration,
    ) -> ConfirmationEngine {
        ConfirmationEngine::new(
            Arc::clone(&self.db),
            self.ledger.clone(),
            forwarding,
            4,
            call_timeout,
        )
    }

    pub fn sweeper(&self) -> Sweeper {
        let forwarding = self.orchestrator();
        Sweeper::new(self.engine(Arc::clone(&forwarding)), forwarding)
    }
}

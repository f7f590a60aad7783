//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns the [`Marketplace`] state, so calls never interleave
//! - Each call is validated, persisted and applied before the next is read
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Marketplace::execute()  → Effects (no mutation)│  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │           Storage::commit()                           │
//! │          (atomic write to RocksDB)                    │
//! │                       │                               │
//! │                       ▼                               │
//! │           Marketplace::apply()                        │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::marketplace::Marketplace;
use crate::metrics::Metrics;
use crate::types::{
    Address, Amount, BreakerState, CourseHash, CourseLookup, Receipt, ReceiptHash, Transaction,
};
use crate::{Error, Result, Storage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Execute a state-changing call
    Submit {
        transaction: Transaction,
        /// Present for signed calls
        nonce: Option<u64>,
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Look up a course by identity hash
    GetCourse {
        hash: CourseHash,
        response: oneshot::Sender<CourseLookup>,
    },

    /// Hash of the course at an index
    GetCourseHashAtIndex {
        index: u64,
        response: oneshot::Sender<Result<CourseHash>>,
    },

    /// Ledger scalars
    GetStatus {
        response: oneshot::Sender<LedgerStatus>,
    },

    /// Next signed-call nonce for an address
    GetNonce {
        address: Address,
        response: oneshot::Sender<u64>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Point-in-time view of the ledger scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// Contract owner (zero once destroyed)
    pub owner: Address,

    /// Circuit breaker state
    pub breaker: BreakerState,

    /// Held balance
    #[serde(with = "crate::types::amount")]
    pub balance: Amount,

    /// Balance reserved for refunds
    #[serde(with = "crate::types::amount")]
    pub earmarked: Amount,

    /// Balance the owner may withdraw
    #[serde(with = "crate::types::amount")]
    pub withdrawable: Amount,

    /// Number of courses
    pub course_count: u64,

    /// Sequence the next receipt will take
    pub next_sequence: u64,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Ledger state
    market: Marketplace,

    /// Storage backend
    storage: Arc<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Sequence of the next receipt
    next_sequence: u64,

    /// Hash of the last committed receipt
    last_hash: ReceiptHash,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        market: Marketplace,
        storage: Arc<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Result<Self> {
        let (next_sequence, last_hash) = storage.receipt_chain_head()?;
        metrics.update_ledger(market.course_count(), market.balance());

        Ok(Self {
            market,
            storage,
            metrics,
            mailbox,
            next_sequence,
            last_hash,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => {
                    tracing::info!(next_sequence = self.next_sequence, "Ledger actor stopping");
                    break;
                }
                msg => self.handle_message(msg),
            }
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Submit {
                transaction,
                nonce,
                response,
            } => {
                let result = self.submit(transaction, nonce);
                let _ = response.send(result);
            }

            LedgerMessage::GetCourse { hash, response } => {
                let _ = response.send(self.market.course(&hash));
            }

            LedgerMessage::GetCourseHashAtIndex { index, response } => {
                let _ = response.send(self.market.course_hash_at(index));
            }

            LedgerMessage::GetStatus { response } => {
                let _ = response.send(self.status());
            }

            LedgerMessage::GetNonce { address, response } => {
                let _ = response.send(self.market.next_nonce(&address));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn status(&self) -> LedgerStatus {
        LedgerStatus {
            owner: self.market.contract_owner(),
            breaker: self.market.breaker(),
            balance: self.market.balance(),
            earmarked: self.market.earmarked(),
            withdrawable: self.market.withdrawable(),
            course_count: self.market.course_count(),
            next_sequence: self.next_sequence,
        }
    }

    /// Validate, persist and apply one call
    fn submit(&mut self, transaction: Transaction, nonce: Option<u64>) -> Result<Receipt> {
        let started = Instant::now();
        let entry_point = transaction.call.name();

        let effects = match self.validate(&transaction, nonce) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::warn!(
                    entry_point,
                    from = %transaction.from,
                    reason = e.reason(),
                    "Call rejected: {}",
                    e
                );
                self.metrics.record_rejection(entry_point, e.reason());
                return Err(e);
            }
        };

        let mut receipt = Receipt {
            receipt_id: Uuid::now_v7(),
            sequence: self.next_sequence,
            course_hash: effects.course_hash(),
            payouts: effects.payouts.clone(),
            timestamp: Utc::now(),
            previous_hash: self.last_hash,
            receipt_hash: ReceiptHash::ZERO,
            transaction,
        };
        receipt.receipt_hash = receipt.compute_hash()?;

        if let Err(e) = self.storage.commit(&effects, &receipt) {
            tracing::error!(entry_point, sequence = receipt.sequence, "Commit failed: {}", e);
            self.metrics.record_rejection(entry_point, e.reason());
            return Err(e);
        }

        self.market.apply(&effects);
        self.next_sequence += 1;
        self.last_hash = receipt.receipt_hash;

        self.metrics
            .record_commit(entry_point, started.elapsed().as_secs_f64());
        self.metrics
            .update_ledger(self.market.course_count(), self.market.balance());

        tracing::info!(
            entry_point,
            sequence = receipt.sequence,
            from = %receipt.transaction.from,
            value = %receipt.transaction.value,
            "Call committed"
        );

        Ok(receipt)
    }

    fn validate(
        &self,
        transaction: &Transaction,
        nonce: Option<u64>,
    ) -> Result<crate::marketplace::Effects> {
        let Some(actual) = nonce else {
            return self.market.execute(transaction);
        };

        let expected = self.market.next_nonce(&transaction.from);
        if actual != expected {
            return Err(Error::InvalidNonce { expected, actual });
        }

        let mut effects = self.market.execute(transaction)?;
        effects.nonce = Some((transaction.from, expected + 1));
        Ok(effects)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Submit a call
    pub async fn submit(&self, transaction: Transaction, nonce: Option<u64>) -> Result<Receipt> {
        self.request(|response| LedgerMessage::Submit {
            transaction,
            nonce,
            response,
        })
        .await?
    }

    /// Look up a course
    pub async fn get_course(&self, hash: CourseHash) -> Result<CourseLookup> {
        self.request(|response| LedgerMessage::GetCourse { hash, response })
            .await
    }

    /// Hash of the course at `index`
    pub async fn get_course_hash_at_index(&self, index: u64) -> Result<CourseHash> {
        self.request(|response| LedgerMessage::GetCourseHashAtIndex { index, response })
            .await?
    }

    /// Ledger scalars
    pub async fn get_status(&self) -> Result<LedgerStatus> {
        self.request(|response| LedgerMessage::GetStatus { response })
            .await
    }

    /// Next signed-call nonce for `address`
    pub async fn get_nonce(&self, address: Address) -> Result<u64> {
        self.request(|response| LedgerMessage::GetNonce { address, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }

    /// Wait until the actor has stopped and released its storage
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    market: Marketplace,
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> Result<LedgerHandle> {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(market, storage, metrics, rx)?;

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(LedgerHandle::new(tx))
}

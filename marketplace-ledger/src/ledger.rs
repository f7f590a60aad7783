//! Main ledger orchestration layer
//!
//! This module ties together storage, state machine, and actor components
//! into the marketplace entry points.
//!
//! # Example
//!
//! ```no_run
//! use marketplace_ledger::{Config, Ledger};
//! use marketplace_ledger::types::{CourseId, Proof};
//!
//! #[tokio::main]
//! async fn main() -> marketplace_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     let buyer = "0x00000000000000000000000000000000000000b1".parse()?;
//!     let course_id = CourseId::from_label("10")?;
//!     let receipt = ledger
//!         .purchase_course(buyer, course_id, Proof::ZERO, 900_000_000)
//!         .await?;
//!     println!("purchased {:?}", receipt.course_hash);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle, LedgerStatus},
    crypto::SignedTransaction,
    marketplace::Marketplace,
    metrics::Metrics,
    types::{
        Address, Amount, BreakerState, Call, Course, CourseHash, CourseId, CourseLookup, Proof,
        Receipt, Transaction,
    },
    Config, Error, Result, Storage,
};
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for async operations
    handle: LedgerHandle,

    /// Direct storage access (for receipt reads)
    storage: Arc<Storage>,

    /// Metrics shared with the actor
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// A fresh data directory is initialized with `config.contract_owner`;
    /// an existing one is restored as persisted.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Open storage
        let storage = Arc::new(Storage::open(&config)?);

        let market = match storage.load()? {
            Some(snapshot) => Marketplace::restore(snapshot)?,
            None => {
                if config.contract_owner.is_zero() {
                    tracing::warn!("Initializing ledger with the zero address as contract owner");
                }
                let market = Marketplace::genesis(config.contract_owner);
                storage.initialize(&market)?;
                market
            }
        };

        tracing::info!(
            service = %config.service_name,
            owner = %market.contract_owner(),
            breaker = %market.breaker(),
            courses = market.course_count(),
            "Ledger opened"
        );

        let metrics = Metrics::new().map_err(|e| Error::Other(format!("metrics: {}", e)))?;

        // Spawn actor
        let handle = spawn_ledger_actor(
            market,
            storage.clone(),
            metrics.clone(),
            config.actor.mailbox_capacity,
        )?;

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    // Entry points
    //
    // The typed entry points submit unsigned calls on behalf of an already
    // authenticated `from`; they are refused like `submit` when
    // `actor.require_signatures` is set.

    /// Buy `course_id` for `value`; the receipt carries the identity hash
    pub async fn purchase_course(
        &self,
        from: Address,
        course_id: CourseId,
        proof: Proof,
        value: Amount,
    ) -> Result<Receipt> {
        self.call(from, Call::PurchaseCourse { course_id, proof }, value)
            .await
    }

    /// Buy back a deactivated course
    pub async fn repurchase_course(
        &self,
        from: Address,
        hash: CourseHash,
        value: Amount,
    ) -> Result<Receipt> {
        self.call(from, Call::RepurchaseCourse { hash }, value).await
    }

    /// Activate a purchased course (contract owner)
    pub async fn activate_course(&self, from: Address, hash: CourseHash) -> Result<Receipt> {
        self.call(from, Call::ActivateCourse { hash }, 0).await
    }

    /// Deactivate a course and refund its price to the buyer (contract owner)
    pub async fn deactivate_course(&self, from: Address, hash: CourseHash) -> Result<Receipt> {
        self.call(from, Call::DeactivateCourse { hash }, 0).await
    }

    /// Hand the contract to `new_owner`
    pub async fn transfer_ownership(&self, from: Address, new_owner: Address) -> Result<Receipt> {
        self.call(from, Call::TransferOwnership { new_owner }, 0)
            .await
    }

    /// Pay `amount` of unearmarked balance to the contract owner
    pub async fn withdraw(&self, from: Address, amount: Amount) -> Result<Receipt> {
        self.call(from, Call::Withdraw { amount }, 0).await
    }

    /// Trip the circuit breaker
    pub async fn stop_contract(&self, from: Address) -> Result<Receipt> {
        self.call(from, Call::StopContract, 0).await
    }

    /// Reset the circuit breaker
    pub async fn resume_contract(&self, from: Address) -> Result<Receipt> {
        self.call(from, Call::ResumeContract, 0).await
    }

    /// Pay the whole balance to the contract owner (stopped only)
    pub async fn emergency_withdraw(&self, from: Address) -> Result<Receipt> {
        self.call(from, Call::EmergencyWithdraw, 0).await
    }

    /// Pay out and tear down the ledger permanently (stopped only)
    pub async fn self_destruct(&self, from: Address) -> Result<Receipt> {
        self.call(from, Call::SelfDestruct, 0).await
    }

    /// Credit a plain transfer to the held balance
    pub async fn deposit(&self, from: Address, value: Amount) -> Result<Receipt> {
        self.call(from, Call::Deposit, value).await
    }

    async fn call(&self, from: Address, call: Call, value: Amount) -> Result<Receipt> {
        self.submit(Transaction::new(from, call).with_value(value)).await
    }

    /// Submit an unsigned transaction
    ///
    /// Refused when the ledger is configured to require signatures.
    pub async fn submit(&self, transaction: Transaction) -> Result<Receipt> {
        if self.config.actor.require_signatures {
            tracing::warn!(
                from = %transaction.from,
                call = transaction.call.name(),
                "Unsigned call refused"
            );
            return Err(Error::SignatureError(
                "unsigned submissions are disabled".to_string(),
            ));
        }
        self.handle.submit(transaction, None).await
    }

    /// Verify and submit a signed transaction
    pub async fn submit_signed(&self, signed: SignedTransaction) -> Result<Receipt> {
        let sender = signed.verify()?;
        tracing::debug!(%sender, nonce = signed.nonce, "Signature verified");
        self.handle
            .submit(signed.transaction, Some(signed.nonce))
            .await
    }

    // Reads

    /// Course record, or the all-zero sentinel for unknown hashes
    pub async fn get_course_by_hash(&self, hash: CourseHash) -> Result<Course> {
        Ok(self.handle.get_course(hash).await?.into_record())
    }

    /// Course record as `Found` / `Absent`
    pub async fn lookup_course(&self, hash: CourseHash) -> Result<CourseLookup> {
        self.handle.get_course(hash).await
    }

    /// Identity hash of the course at `index`
    pub async fn get_course_hash_at_index(&self, index: u64) -> Result<CourseHash> {
        self.handle.get_course_hash_at_index(index).await
    }

    /// Current contract owner
    pub async fn get_contract_owner(&self) -> Result<Address> {
        Ok(self.handle.get_status().await?.owner)
    }

    /// Number of courses
    pub async fn get_course_count(&self) -> Result<u64> {
        Ok(self.handle.get_status().await?.course_count)
    }

    /// Held balance
    pub async fn get_balance(&self) -> Result<Amount> {
        Ok(self.handle.get_status().await?.balance)
    }

    /// Circuit breaker state
    pub async fn get_breaker_state(&self) -> Result<BreakerState> {
        Ok(self.handle.get_status().await?.breaker)
    }

    /// All ledger scalars in one read
    pub async fn get_status(&self) -> Result<LedgerStatus> {
        self.handle.get_status().await
    }

    /// Next signed-call nonce for `address`
    pub async fn get_nonce(&self, address: Address) -> Result<u64> {
        self.handle.get_nonce(address).await
    }

    /// Receipt by sequence number
    pub fn get_receipt(&self, sequence: u64) -> Result<Receipt> {
        self.storage.get_receipt(sequence)
    }

    /// Handle for callers that talk to the actor directly
    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Shutdown ledger and wait for the actor to release the database
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.handle.closed().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{course_hash, KeyPair};
    use crate::types::CourseState;

    const PRICE: Amount = 900_000_000;

    fn owner() -> Address {
        Address::from_bytes([0xaa; 20])
    }

    fn buyer() -> Address {
        Address::from_bytes([0xbb; 20])
    }

    async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.contract_owner = owner();

        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger().await;
        assert_eq!(ledger.get_contract_owner().await.unwrap(), owner());
        assert_eq!(ledger.get_course_count().await.unwrap(), 0);
        assert_eq!(ledger.get_breaker_state().await.unwrap(), BreakerState::Running);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purchase_and_read_back() {
        let (ledger, _temp) = create_test_ledger().await;
        let course_id = CourseId::from_label("10").unwrap();

        let receipt = ledger
            .purchase_course(buyer(), course_id, Proof::from_bytes([7u8; 32]), PRICE)
            .await
            .unwrap();
        let hash = receipt.course_hash.unwrap();
        assert_eq!(hash, course_hash(&course_id, &buyer()));

        let course = ledger.get_course_by_hash(hash).await.unwrap();
        assert_eq!(course.owner, buyer());
        assert_eq!(course.price, PRICE);
        assert_eq!(course.state, CourseState::Purchased);
        assert_eq!(ledger.get_course_hash_at_index(0).await.unwrap(), hash);
        assert_eq!(ledger.get_balance().await.unwrap(), PRICE);

        assert_eq!(ledger.get_receipt(0).unwrap(), receipt);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_course_reads_as_sentinel() {
        let (ledger, _temp) = create_test_ledger().await;
        let hash = CourseHash::from_bytes([1u8; 32]);

        let course = ledger.get_course_by_hash(hash).await.unwrap();
        assert!(!course.exists());
        assert_eq!(course, Course::absent());
        assert_eq!(ledger.lookup_course(hash).await.unwrap(), CourseLookup::Absent);
        assert!(matches!(
            ledger.get_course_hash_at_index(0).await,
            Err(Error::IndexOutOfRange { index: 0, count: 0 })
        ));
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_signed_submission() {
        let keypair = KeyPair::from_seed(&[9u8; 32]);
        let (ledger, _temp) = create_test_ledger().await;

        let tx = Transaction::new(keypair.address(), Call::Deposit).with_value(50);
        let signed = keypair.sign_transaction(tx.clone(), 0).unwrap();

        let receipt = ledger.submit_signed(signed.clone()).await.unwrap();
        assert_eq!(receipt.transaction.from, keypair.address());
        assert_eq!(ledger.get_nonce(keypair.address()).await.unwrap(), 1);

        // Replay
        assert!(matches!(
            ledger.submit_signed(signed).await,
            Err(Error::InvalidNonce { expected: 1, actual: 0 })
        ));

        // Forged sender
        let mut forged = keypair.sign_transaction(tx, 1).unwrap();
        forged.transaction.from = owner();
        assert!(matches!(
            ledger.submit_signed(forged).await,
            Err(Error::SignatureError(_))
        ));

        assert_eq!(ledger.get_balance().await.unwrap(), 50);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_require_signatures() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.contract_owner = owner();
        config.actor.require_signatures = true;
        let ledger = Ledger::open(config).await.unwrap();

        let tx = Transaction::new(buyer(), Call::Deposit).with_value(1);
        assert!(matches!(
            ledger.submit(tx).await,
            Err(Error::SignatureError(_))
        ));

        // Typed entry points are unsigned too
        assert!(matches!(
            ledger.stop_contract(owner()).await,
            Err(Error::SignatureError(_))
        ));
        assert!(matches!(
            ledger.withdraw(owner(), 1).await,
            Err(Error::SignatureError(_))
        ));
        assert_eq!(ledger.get_breaker_state().await.unwrap(), BreakerState::Running);

        // Signed calls still go through
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let deposit = Transaction::new(keypair.address(), Call::Deposit).with_value(3);
        let signed = keypair.sign_transaction(deposit, 0).unwrap();
        ledger.submit_signed(signed).await.unwrap();
        assert_eq!(ledger.get_balance().await.unwrap(), 3);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.actor.mailbox_capacity = 0;

        assert!(matches!(Ledger::open(config).await, Err(Error::Config(_))));
    }
}

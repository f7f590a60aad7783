//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `courses` - Course records (key: identity hash)
//! - `course_index` - Insertion order (key: index as u64 BE, value: identity hash)
//! - `meta` - Ledger scalars: owner, breaker, balance, receipt chain head
//! - `receipts` - Append-only execution log (key: sequence as u64 BE)
//! - `nonces` - Next signed-call nonce (key: address)
//!
//! Every committed call is one `WriteBatch`, so a crash never exposes a
//! half-applied transition.

use crate::{
    error::{Error, Result},
    marketplace::{Effects, Marketplace, Snapshot},
    types::{Address, Amount, BreakerState, Course, CourseHash, Receipt, ReceiptHash},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_COURSES: &str = "courses";
const CF_COURSE_INDEX: &str = "course_index";
const CF_META: &str = "meta";
const CF_RECEIPTS: &str = "receipts";
const CF_NONCES: &str = "nonces";

/// Meta keys
const META_OWNER: &[u8] = b"owner";
const META_BREAKER: &[u8] = b"breaker";
const META_BALANCE: &[u8] = b"balance";
const META_NEXT_SEQUENCE: &[u8] = b"next_sequence";
const META_LAST_RECEIPT_HASH: &[u8] = b"last_receipt_hash";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_COURSES, Self::cf_options_courses()),
            ColumnFamilyDescriptor::new(CF_COURSE_INDEX, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_RECEIPTS, Self::cf_options_receipts()),
            ColumnFamilyDescriptor::new(CF_NONCES, Self::cf_options_small()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB for marketplace ledger");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_courses() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups by hash benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_receipts() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_small() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Ledger state

    /// Load persisted state, `None` for a fresh database
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let cf_meta = self.cf_handle(CF_META)?;

        let breaker = match self.db.get_cf(cf_meta, META_BREAKER)? {
            Some(raw) => decode_breaker(&raw)?,
            None => return Ok(None),
        };
        let owner = match self.db.get_cf(cf_meta, META_OWNER)? {
            Some(raw) => Address::from_slice(&raw)
                .ok_or_else(|| Error::Storage("corrupt owner record".to_string()))?,
            None => Address::ZERO,
        };
        let balance = match self.db.get_cf(cf_meta, META_BALANCE)? {
            Some(raw) => decode_amount(&raw)?,
            None => 0,
        };

        let cf_index = self.cf_handle(CF_COURSE_INDEX)?;
        let cf_courses = self.cf_handle(CF_COURSES)?;
        let mut courses = Vec::new();
        for item in self.db.iterator_cf(cf_index, IteratorMode::Start) {
            let (_, hash_bytes) = item?;
            let hash = CourseHash::from_slice(&hash_bytes)
                .ok_or_else(|| Error::Storage("corrupt course index entry".to_string()))?;
            let value = self
                .db
                .get_cf(cf_courses, hash.as_bytes())?
                .ok_or_else(|| Error::Storage(format!("indexed course {} missing", hash)))?;
            let course: Course = bincode::deserialize(&value)?;
            courses.push((hash, course));
        }

        let cf_nonces = self.cf_handle(CF_NONCES)?;
        let mut nonces = HashMap::new();
        for item in self.db.iterator_cf(cf_nonces, IteratorMode::Start) {
            let (key, value) = item?;
            let address = Address::from_slice(&key)
                .ok_or_else(|| Error::Storage("corrupt nonce key".to_string()))?;
            nonces.insert(address, decode_u64(&value)?);
        }

        tracing::debug!(
            courses = courses.len(),
            breaker = %breaker,
            balance = %balance,
            "Loaded ledger state"
        );

        Ok(Some(Snapshot {
            courses,
            owner,
            breaker,
            balance,
            nonces,
        }))
    }

    /// Persist genesis scalars for a fresh ledger
    pub fn initialize(&self, market: &Marketplace) -> Result<()> {
        let cf_meta = self.cf_handle(CF_META)?;
        let mut batch = WriteBatch::default();

        batch.put_cf(cf_meta, META_OWNER, market.contract_owner().as_bytes());
        batch.put_cf(cf_meta, META_BREAKER, [market.breaker() as u8]);
        batch.put_cf(cf_meta, META_BALANCE, market.balance().to_be_bytes());
        batch.put_cf(cf_meta, META_NEXT_SEQUENCE, 0u64.to_be_bytes());
        batch.put_cf(cf_meta, META_LAST_RECEIPT_HASH, ReceiptHash::ZERO.as_bytes());

        self.db.write(batch)?;

        tracing::info!(owner = %market.contract_owner(), "Ledger initialized");
        Ok(())
    }

    /// Commit the effects of one call and its receipt (atomic)
    pub fn commit(&self, effects: &Effects, receipt: &Receipt) -> Result<()> {
        let mut batch = WriteBatch::default();
        let cf_meta = self.cf_handle(CF_META)?;

        // 1. Course record and index
        if let Some(write) = &effects.course {
            let cf_courses = self.cf_handle(CF_COURSES)?;
            batch.put_cf(cf_courses, write.hash.as_bytes(), bincode::serialize(&write.course)?);

            if write.created {
                let cf_index = self.cf_handle(CF_COURSE_INDEX)?;
                batch.put_cf(cf_index, write.course.index.to_be_bytes(), write.hash.as_bytes());
            }
        }

        // 2. Scalars
        if let Some(owner) = effects.owner {
            batch.put_cf(cf_meta, META_OWNER, owner.as_bytes());
        }
        if let Some(breaker) = effects.breaker {
            batch.put_cf(cf_meta, META_BREAKER, [breaker as u8]);
        }
        batch.put_cf(cf_meta, META_BALANCE, effects.balance.to_be_bytes());

        // 3. Signed-call nonce
        if let Some((address, next)) = effects.nonce {
            let cf_nonces = self.cf_handle(CF_NONCES)?;
            batch.put_cf(cf_nonces, address.as_bytes(), next.to_be_bytes());
        }

        // 4. Teardown
        if effects.wipe {
            for name in [CF_COURSES, CF_COURSE_INDEX] {
                let cf = self.cf_handle(name)?;
                for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                    let (key, _) = item?;
                    batch.delete_cf(cf, key);
                }
            }
            batch.put_cf(cf_meta, META_OWNER, Address::ZERO.as_bytes());
        }

        // 5. Receipt and chain head
        let cf_receipts = self.cf_handle(CF_RECEIPTS)?;
        batch.put_cf(cf_receipts, receipt.sequence.to_be_bytes(), bincode::serialize(receipt)?);
        batch.put_cf(cf_meta, META_NEXT_SEQUENCE, (receipt.sequence + 1).to_be_bytes());
        batch.put_cf(cf_meta, META_LAST_RECEIPT_HASH, receipt.receipt_hash.as_bytes());

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            sequence = receipt.sequence,
            call = receipt.transaction.call.name(),
            "Receipt committed"
        );

        Ok(())
    }

    // Receipts

    /// Get receipt by sequence number
    pub fn get_receipt(&self, sequence: u64) -> Result<Receipt> {
        let cf = self.cf_handle(CF_RECEIPTS)?;

        let value = self
            .db
            .get_cf(cf, sequence.to_be_bytes())?
            .ok_or_else(|| Error::NotFound(format!("receipt {}", sequence)))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Next sequence number and hash of the last receipt
    pub fn receipt_chain_head(&self) -> Result<(u64, ReceiptHash)> {
        let cf_meta = self.cf_handle(CF_META)?;

        let next = match self.db.get_cf(cf_meta, META_NEXT_SEQUENCE)? {
            Some(raw) => decode_u64(&raw)?,
            None => 0,
        };
        let last = match self.db.get_cf(cf_meta, META_LAST_RECEIPT_HASH)? {
            Some(raw) => ReceiptHash::from_slice(&raw)
                .ok_or_else(|| Error::Storage("corrupt receipt hash".to_string()))?,
            None => ReceiptHash::ZERO,
        };

        Ok((next, last))
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_courses = self.cf_handle(CF_COURSES)?;
        let cf_receipts = self.cf_handle(CF_RECEIPTS)?;

        Ok(StorageStats {
            total_courses: self.approximate_count(cf_courses)?,
            total_receipts: self.approximate_count(cf_receipts)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        // RocksDB property for approximate count
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of course records
    pub total_courses: u64,
    /// Approximate number of receipts
    pub total_receipts: u64,
}

fn decode_u64(raw: &[u8]) -> Result<u64> {
    <[u8; 8]>::try_from(raw)
        .map(u64::from_be_bytes)
        .map_err(|_| Error::Storage(format!("expected 8-byte integer, got {} bytes", raw.len())))
}

fn decode_amount(raw: &[u8]) -> Result<Amount> {
    <[u8; 16]>::try_from(raw)
        .map(Amount::from_be_bytes)
        .map_err(|_| Error::Storage(format!("expected 16-byte amount, got {} bytes", raw.len())))
}

fn decode_breaker(raw: &[u8]) -> Result<BreakerState> {
    match raw {
        [0] => Ok(BreakerState::Running),
        [1] => Ok(BreakerState::Stopped),
        [2] => Ok(BreakerState::Destroyed),
        _ => Err(Error::Storage(format!("corrupt breaker record {:?}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::course_hash;
    use crate::types::{Call, CourseId, CourseState, Proof, Transaction};
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn owner() -> Address {
        Address::from_bytes([0xaa; 20])
    }

    fn receipt_for(sequence: u64, tx: Transaction, effects: &Effects) -> Receipt {
        let mut receipt = Receipt {
            receipt_id: Uuid::now_v7(),
            sequence,
            transaction: tx,
            course_hash: effects.course_hash(),
            payouts: effects.payouts.clone(),
            timestamp: Utc::now(),
            previous_hash: ReceiptHash::ZERO,
            receipt_hash: ReceiptHash::ZERO,
        };
        receipt.receipt_hash = receipt.compute_hash().unwrap();
        receipt
    }

    fn commit(storage: &Storage, market: &mut Marketplace, sequence: u64, tx: Transaction) {
        let effects = market.execute(&tx).unwrap();
        storage
            .commit(&effects, &receipt_for(sequence, tx, &effects))
            .unwrap();
        market.apply(&effects);
    }

    #[test]
    fn test_fresh_database_has_no_state() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.load().unwrap().is_none());
        assert_eq!(storage.receipt_chain_head().unwrap(), (0, ReceiptHash::ZERO));
    }

    #[test]
    fn test_commit_and_reload() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let mut market = Marketplace::genesis(owner());
        storage.initialize(&market).unwrap();

        let buyer = Address::from_bytes([0xbb; 20]);
        let course_id = CourseId::from_label("10").unwrap();
        let purchase = Transaction::new(
            buyer,
            Call::PurchaseCourse {
                course_id,
                proof: Proof::from_bytes([5u8; 32]),
            },
        )
        .with_value(900);
        commit(&storage, &mut market, 0, purchase);

        let hash = course_hash(&course_id, &buyer);
        commit(
            &storage,
            &mut market,
            1,
            Transaction::new(owner(), Call::ActivateCourse { hash }),
        );

        let snapshot = storage.load().unwrap().unwrap();
        assert_eq!(snapshot.owner, owner());
        assert_eq!(snapshot.balance, 900);
        assert_eq!(snapshot.courses.len(), 1);
        assert_eq!(snapshot.courses[0].0, hash);
        assert_eq!(snapshot.courses[0].1.state, CourseState::Activated);

        let receipt = storage.get_receipt(1).unwrap();
        assert_eq!(receipt.course_hash, Some(hash));
        assert_eq!(storage.receipt_chain_head().unwrap().0, 2);
        assert!(matches!(storage.get_receipt(2), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_wipe_clears_registry() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let mut market = Marketplace::genesis(owner());
        storage.initialize(&market).unwrap();

        let purchase = Transaction::new(
            Address::from_bytes([0xbb; 20]),
            Call::PurchaseCourse {
                course_id: CourseId::from_label("7").unwrap(),
                proof: Proof::ZERO,
            },
        )
        .with_value(10);
        commit(&storage, &mut market, 0, purchase);
        commit(&storage, &mut market, 1, Transaction::new(owner(), Call::StopContract));
        commit(&storage, &mut market, 2, Transaction::new(owner(), Call::SelfDestruct));

        let snapshot = storage.load().unwrap().unwrap();
        assert_eq!(snapshot.breaker, BreakerState::Destroyed);
        assert!(snapshot.courses.is_empty());
        assert!(snapshot.owner.is_zero());
        assert_eq!(snapshot.balance, 0);

        // History survives teardown
        assert_eq!(storage.get_receipt(2).unwrap().payouts[0].amount, 10);
    }

    #[test]
    fn test_decode_helpers_reject_garbage() {
        assert!(decode_u64(&[1, 2, 3]).is_err());
        assert!(decode_amount(&[0; 8]).is_err());
        assert!(decode_breaker(&[9]).is_err());
        assert_eq!(decode_breaker(&[1]).unwrap(), BreakerState::Stopped);
    }
}

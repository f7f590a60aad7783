//! Course Marketplace Ledger
//!
//! Payment-and-entitlement ledger for an online course marketplace: buyers
//! pay to purchase courses, an administrator activates or refunds them, and
//! the operator withdraws unearmarked revenue.
//!
//! # Architecture
//!
//! - **Two-phase transitions**: validate into `Effects`, persist, then apply
//! - **Single Writer**: One actor task owns all state, so calls never interleave
//! - **Atomic Storage**: One RocksDB `WriteBatch` per committed call
//! - **Receipt Chain**: Every committed call leaves a hash-linked receipt
//!
//! # Invariants
//!
//! - No double purchase: one record per `(course_id, buyer)`
//! - Index stability: `getCourseHashAtIndex(i)` never changes once assigned
//! - Refund exactness: deactivation pays back exactly the held price
//! - Balance reconciliation: `balance == earmarked + withdrawable`
//! - All-or-nothing: a rejected call leaves no trace

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod marketplace;
pub mod crypto;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Address, Amount, BreakerState, Call, Course, CourseHash, CourseId, CourseLookup, CourseState,
    Proof, Receipt, Transaction,
};
pub use crypto::{course_hash, purchase_proof, KeyPair, SignedTransaction};
pub use actor::LedgerStatus;
pub use ledger::Ledger;
pub use config::Config;
pub use storage::Storage;

//! Core types for the marketplace ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for storage and signing)
//! - Hex-string rendering in human-readable formats (JSON, TOML)
//! - Exact integer arithmetic for amounts (base units, no fractions)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Amount in base units (wei-like)
pub type Amount = u128;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length in bytes
            pub const LEN: usize = $len;

            /// All-zero value
            pub const ZERO: Self = Self([0u8; $len]);

            /// Create from bytes
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Create from a slice of exactly the right length
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            /// Get bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// True for the all-zero value
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(digits).map_err(|e| {
                    crate::Error::Parse(format!("{} {:?}: {}", stringify!($name), s, e))
                })?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    crate::Error::Parse(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(serde::de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

fixed_bytes!(
    /// Account address (20 bytes)
    Address,
    20
);

fixed_bytes!(
    /// Course identifier from the content pipeline (16 bytes)
    CourseId,
    16
);

fixed_bytes!(
    /// Identity hash of a purchase: keccak256(course_id || buyer)
    CourseHash,
    32
);

fixed_bytes!(
    /// Opaque purchase proof supplied by the buyer
    Proof,
    32
);

fixed_bytes!(
    /// SHA-256 digest chaining receipts
    ReceiptHash,
    32
);

fixed_bytes!(
    /// Ed25519 verifying key
    PublicKey,
    32
);

impl CourseId {
    /// Build from a content-pipeline id such as `"10"`.
    ///
    /// UTF-8 bytes are right-aligned, so `"10"` becomes `0x…3130`.
    pub fn from_label(label: &str) -> crate::Result<Self> {
        let raw = label.as_bytes();
        if raw.is_empty() || raw.len() > Self::LEN {
            return Err(crate::Error::Parse(format!(
                "course label must be 1..={} bytes, got {}",
                Self::LEN,
                raw.len()
            )));
        }

        let mut bytes = [0u8; 16];
        bytes[Self::LEN - raw.len()..].copy_from_slice(raw);
        Ok(Self(bytes))
    }
}

/// Serde adapter rendering amounts as decimal strings in human-readable
/// formats (u128 overflows JavaScript numbers).
pub mod amount {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialize an amount
    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&value.to_string())
        } else {
            serializer.serialize_u128(*value)
        }
    }

    /// Deserialize an amount from a decimal string or an integer
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        if !deserializer.is_human_readable() {
            return Amount::deserialize(deserializer);
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n as Amount),
        }
    }
}

/// Lifecycle state of a purchased course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CourseState {
    /// Paid, waiting for activation
    Purchased = 0,
    /// Activated by the contract owner
    Activated = 1,
    /// Refunded; may be repurchased by the buyer
    Deactivated = 2,
}

impl CourseState {
    /// Numeric code exposed to external callers
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CourseState {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(CourseState::Purchased),
            1 => Ok(CourseState::Activated),
            2 => Ok(CourseState::Deactivated),
            other => Err(crate::Error::Parse(format!("unknown course state {}", other))),
        }
    }
}

impl fmt::Display for CourseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CourseState::Purchased => "purchased",
            CourseState::Activated => "activated",
            CourseState::Deactivated => "deactivated",
        };
        f.write_str(name)
    }
}

/// Course purchase record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Insertion position in the registry
    pub index: u64,

    /// Amount currently held for this course
    #[serde(with = "amount")]
    pub price: Amount,

    /// Proof supplied at purchase time
    pub proof: Proof,

    /// Buyer
    pub owner: Address,

    /// Lifecycle state
    pub state: CourseState,
}

impl Course {
    /// The all-zero record returned for unknown hashes
    pub const fn absent() -> Self {
        Self {
            index: 0,
            price: 0,
            proof: Proof::ZERO,
            owner: Address::ZERO,
            state: CourseState::Purchased,
        }
    }

    /// Zero owner means "not found" at the external boundary
    pub fn exists(&self) -> bool {
        !self.owner.is_zero()
    }
}

/// Result of a registry lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseLookup {
    /// Record exists
    Found(Course),
    /// No record under this hash
    Absent,
}

impl CourseLookup {
    /// Flatten to the external zero-sentinel form
    pub fn into_record(self) -> Course {
        match self {
            CourseLookup::Found(course) => course,
            CourseLookup::Absent => Course::absent(),
        }
    }

    /// Record if present
    pub fn found(self) -> Option<Course> {
        match self {
            CourseLookup::Found(course) => Some(course),
            CourseLookup::Absent => None,
        }
    }
}

impl From<Option<Course>> for CourseLookup {
    fn from(course: Option<Course>) -> Self {
        course.map_or(CourseLookup::Absent, CourseLookup::Found)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum BreakerState {
    /// Normal operation
    #[default]
    Running = 0,
    /// Incident mode: emergency withdrawal and teardown allowed
    Stopped = 1,
    /// Self-destructed (terminal)
    Destroyed = 2,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerState::Running => "running",
            BreakerState::Stopped => "stopped",
            BreakerState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Ledger entry point with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    /// Buy a course (payment attached)
    PurchaseCourse {
        /// Course identifier
        course_id: CourseId,
        /// Purchase proof
        proof: Proof,
    },
    /// Buy back a deactivated course (payment attached)
    RepurchaseCourse {
        /// Identity hash
        hash: CourseHash,
    },
    /// Purchased → Activated
    ActivateCourse {
        /// Identity hash
        hash: CourseHash,
    },
    /// Purchased/Activated → Deactivated with refund
    DeactivateCourse {
        /// Identity hash
        hash: CourseHash,
    },
    /// Hand the contract-owner role to another address
    TransferOwnership {
        /// New contract owner
        new_owner: Address,
    },
    /// Pay out unearmarked funds to the contract owner
    Withdraw {
        /// Amount to withdraw
        #[serde(with = "amount")]
        amount: Amount,
    },
    /// Running → Stopped
    StopContract,
    /// Stopped → Running
    ResumeContract,
    /// Drain the full balance while stopped
    EmergencyWithdraw,
    /// Drain and destroy while stopped
    SelfDestruct,
    /// Plain value transfer (fallback path)
    Deposit,
}

impl Call {
    /// Entry point name
    pub fn name(&self) -> &'static str {
        match self {
            Call::PurchaseCourse { .. } => "purchaseCourse",
            Call::RepurchaseCourse { .. } => "repurchaseCourse",
            Call::ActivateCourse { .. } => "activateCourse",
            Call::DeactivateCourse { .. } => "deactivateCourse",
            Call::TransferOwnership { .. } => "transferOwnership",
            Call::Withdraw { .. } => "withdraw",
            Call::StopContract => "stopContract",
            Call::ResumeContract => "resumeContract",
            Call::EmergencyWithdraw => "emergencyWithdraw",
            Call::SelfDestruct => "selfDestruct",
            Call::Deposit => "deposit",
        }
    }

    /// True for entry points that accept an attached payment
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            Call::PurchaseCourse { .. } | Call::RepurchaseCourse { .. } | Call::Deposit
        )
    }
}

/// State-changing call submitted by an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Caller
    pub from: Address,

    /// Attached payment
    #[serde(with = "amount", default)]
    pub value: Amount,

    /// Entry point
    pub call: Call,
}

impl Transaction {
    /// Create a transaction without attached payment
    pub fn new(from: Address, call: Call) -> Self {
        Self { from, value: 0, call }
    }

    /// Attach payment
    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    /// Canonical bytes (bincode)
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Value transferred out of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Recipient
    pub to: Address,
    /// Amount
    #[serde(with = "amount")]
    pub amount: Amount,
}

/// Record of a committed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique receipt ID (UUIDv7 for time-ordering)
    pub receipt_id: Uuid,

    /// Position in the execution log
    pub sequence: u64,

    /// Committed call
    pub transaction: Transaction,

    /// Course touched by the call
    pub course_hash: Option<CourseHash>,

    /// Value paid out by the ledger
    pub payouts: Vec<Payout>,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,

    /// Hash of the previous receipt (zero for the first)
    pub previous_hash: ReceiptHash,

    /// Hash of this receipt
    pub receipt_hash: ReceiptHash,
}

impl Receipt {
    /// Compute receipt hash
    pub fn compute_hash(&self) -> crate::Result<ReceiptHash> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.receipt_id.as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.transaction.canonical_bytes()?);
        if let Some(hash) = self.course_hash {
            hasher.update(hash.as_bytes());
        }
        for payout in &self.payouts {
            hasher.update(payout.to.as_bytes());
            hasher.update(payout.amount.to_be_bytes());
        }
        hasher.update(self.timestamp.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());

        Ok(ReceiptHash::from_bytes(hasher.finalize().into()))
    }

    /// Total value paid to `address` by this receipt
    pub fn paid_to(&self, address: &Address) -> Amount {
        self.payouts
            .iter()
            .filter(|p| &p.to == address)
            .map(|p| p.amount)
            .sum()
    }
}

//! Error types for the marketplace ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// The first group are rejections: the call was refused and left no trace.
/// The second group are infrastructure faults.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller lacks the role the call requires
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced course or receipt does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Course exists but is in the wrong state for the transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Course already purchased by this buyer
    #[error("Course already owned: {0}")]
    AlreadyOwned(String),

    /// Amount exceeds what the ledger can pay out
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested amount
        requested: u128,
        /// Amount available for this payout
        available: u128,
    },

    /// Operation requires the circuit breaker to be stopped
    #[error("Contract is not stopped")]
    NotStopped,

    /// Operation requires the circuit breaker to be running
    #[error("Contract is stopped")]
    AlreadyStopped,

    /// Index past the end of the registry
    #[error("Index out of range: {index} >= {count}")]
    IndexOutOfRange {
        /// Requested index
        index: u64,
        /// Number of courses
        count: u64,
    },

    /// Attached payment or amount is not acceptable
    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    /// Address argument is not acceptable
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed hex or byte-length input
    #[error("Parse error: {0}")]
    Parse(String),

    /// Ledger was self-destructed
    #[error("Ledger has been destroyed")]
    Destroyed,

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Signed call carries a stale or future nonce
    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce {
        /// Next nonce for the sender
        expected: u64,
        /// Nonce carried by the call
        actual: u64,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable reason string reported to callers of a rejected call
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "Unauthorized",
            Error::NotFound(_) => "NotFound",
            Error::InvalidState(_) => "InvalidState",
            Error::AlreadyOwned(_) => "AlreadyOwned",
            Error::InsufficientFunds { .. } => "InsufficientFunds",
            Error::NotStopped => "NotStopped",
            Error::AlreadyStopped => "AlreadyStopped",
            Error::IndexOutOfRange { .. } => "IndexOutOfRange",
            Error::InvalidPayment(_) => "InvalidPayment",
            Error::InvalidAddress(_) => "InvalidAddress",
            Error::Parse(_) => "Parse",
            Error::Destroyed => "Destroyed",
            Error::SignatureError(_) => "SignatureError",
            Error::InvalidNonce { .. } => "InvalidNonce",
            Error::Storage(_) => "Storage",
            Error::Serialization(_) => "Serialization",
            Error::Concurrency(_) => "Concurrency",
            Error::Config(_) => "Config",
            Error::Io(_) => "Io",
            Error::Other(_) => "Other",
        }
    }

    /// True when the call was refused by ledger rules rather than failing
    /// in the infrastructure
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Error::Storage(_)
                | Error::Serialization(_)
                | Error::Concurrency(_)
                | Error::Config(_)
                | Error::Io(_)
                | Error::Other(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

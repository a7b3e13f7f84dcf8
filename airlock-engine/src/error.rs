//! Error types for the airlock ledger
//!
//! Every variant aborts the triggering call with no state change. Callers
//! decide whether to retry with corrected inputs.

use crate::models::{Address, Amount, Timestamp, TxId};
use thiserror::Error;

/// Main error type for ledger operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Caller lacks the role required for the operation
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Transaction is already paid or reversed
    #[error("Transaction {0} was resolved already")]
    AlreadyResolved(TxId),

    /// Settlement attempted before maturity
    #[error("Transaction {id} has not yet reached maturity (matures at {maturity})")]
    NotMature { id: TxId, maturity: Timestamp },

    /// Reversal attempted at or after maturity
    #[error("Transaction {id} already reached maturity at {maturity}")]
    MaturityReached { id: TxId, maturity: Timestamp },

    /// Deposit does not exceed the fee
    #[error("Transaction amount {value} is too small to cover the fee {fee}")]
    InsufficientFunds { value: Amount, fee: Amount },

    #[error("It is not allowed to send transactions to the zero address")]
    InvalidDestinationZero,

    #[error("It is not allowed to send transactions with the sender as destination")]
    InvalidDestinationSelf,

    #[error("It is not allowed to send transactions with this contract as destination")]
    InvalidDestinationContract,

    /// Withdrawal exceeds the accumulated fees
    #[error("Requested {requested} exceeds the treasury balance {available}")]
    InsufficientTreasury { requested: Amount, available: Amount },

    /// Circuit breaker engaged
    #[error("Contract is broken; new transactions are not accepted")]
    Broken,

    /// Version pointer was already assigned
    #[error("Contract was already superseded by {0}")]
    AlreadySuperseded(Address),

    /// Requested maturity offset is below the configured delay
    #[error("Transaction delay {requested} is smaller than the minimum {minimum}")]
    DelayTooShort { requested: u64, minimum: u64 },

    /// Checked arithmetic overflowed
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Payout handed back for rollback does not match one in flight
    #[error("No payout in flight matches {0}")]
    UnknownPayout(String),

    /// Host refused an outbound value transfer
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl EscrowError {
    /// Create an authorization error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an overflow error
    pub fn overflow<S: Into<String>>(msg: S) -> Self {
        Self::Overflow(msg.into())
    }

    /// Create a transfer error
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Self::Transfer(msg.into())
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Unauthorized",
            Self::AlreadyResolved(_) => "AlreadyResolved",
            Self::NotMature { .. } => "NotMature",
            Self::MaturityReached { .. } => "MaturityReached",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::InvalidDestinationZero => "InvalidDestinationZero",
            Self::InvalidDestinationSelf => "InvalidDestinationSelf",
            Self::InvalidDestinationContract => "InvalidDestinationContract",
            Self::InsufficientTreasury { .. } => "InsufficientTreasury",
            Self::Broken => "Broken",
            Self::AlreadySuperseded(_) => "AlreadySuperseded",
            Self::DelayTooShort { .. } => "DelayTooShort",
            Self::Overflow(_) => "Overflow",
            Self::UnknownPayout(_) => "UnknownPayout",
            Self::Transfer(_) => "Transfer",
            Self::Config(_) => "Config",
        }
    }
}

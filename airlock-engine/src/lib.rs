//! Time-locked escrow engine
//!
//! A party deposits value for a named recipient. Before the deposit matures
//! either party may reverse it; after maturity either party may settle it.
//! This crate provides:
//! - A synchronous ledger state machine holding the accounting invariant
//! - Fee treasury, access control, circuit breaker and version chain components
//! - An async service facade that pays out only after bookkeeping commits

pub mod access;
pub mod airlock;
pub mod breaker;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod treasury;
pub mod version;

pub use airlock::{Airlock, Clock, InMemoryWallets, ManualClock, SystemClock, ValueTransfer};
pub use config::AirlockConfig;
pub use error::EscrowError;
pub use ledger::Ledger;
pub use models::{Address, Amount, PartyIndex, Payout, PayoutReason, Timestamp, Transaction, TxId};

/// Result type alias for ledger operations
pub type EscrowResult<T> = Result<T, EscrowError>;

//! Core data models for the airlock ledger
//!
//! Identities, amounts, the transaction record and its state machine,
//! payout instructions handed to the host, and audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Value in the smallest indivisible unit of the host currency
pub type Amount = u128;

/// Host-supplied time in seconds
pub type Timestamp = u64;

/// Opaque 20-byte identity with an all-zero "empty" sentinel
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    /// The reserved empty address
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Address with every byte set to `byte`
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when parsing an address from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {0:?}: expected 0x followed by 40 hex digits")]
pub struct ParseAddressError(String);

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 40 || !digits.is_ascii() {
            return Err(ParseAddressError(s.to_string()));
        }

        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseAddressError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = ParseAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub u64);

impl TxId {
    /// First id handed out; zero stays reserved as "unset"
    pub const FIRST: TxId = TxId(1024);

    pub fn next(self) -> Option<TxId> {
        self.0.checked_add(1).map(TxId)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Funds held in escrow
    Pending,
    /// Funds released to the destination
    Paid,
    /// Funds returned to the origin
    Reversed,
}

impl TransactionState {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Reversed)
    }
}

/// One escrowed deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub origin: Address,
    pub destination: Address,
    pub maturity: Timestamp,
    /// Net value held, fee already skimmed
    pub amount: Amount,
    pub paid: bool,
    pub reversed: bool,
}

impl Transaction {
    pub fn state(&self) -> TransactionState {
        match (self.paid, self.reversed) {
            (true, _) => TransactionState::Paid,
            (_, true) => TransactionState::Reversed,
            _ => TransactionState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TransactionState::Pending
    }

    /// Whether `who` is the origin or the destination
    pub fn is_party(&self, who: Address) -> bool {
        self.origin == who || self.destination == who
    }

    pub fn is_mature(&self, now: Timestamp) -> bool {
        now >= self.maturity
    }
}

/// Ids a party takes part in, split by role, each in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyIndex {
    /// Caller is the origin
    pub outgoing: Vec<TxId>,
    /// Caller is the destination
    pub incoming: Vec<TxId>,
}

impl PartyIndex {
    /// Both roles merged in creation order
    pub fn combined(&self) -> Vec<TxId> {
        let mut ids: Vec<TxId> = self
            .outgoing
            .iter()
            .chain(self.incoming.iter())
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

/// Why value leaves the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutReason {
    Reversal(TxId),
    Settlement(TxId),
    TreasuryWithdrawal,
}

/// Outbound transfer the host must perform after the ledger committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub to: Address,
    pub amount: Amount,
    pub reason: PayoutReason,
}

/// Kinds of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    TransactionCreated,
    TransactionReversed,
    TransactionFinished,
    FeeChanged,
    DelayChanged,
    TreasuryDeposit,
    TreasuryWithdrawal,
    DevChanged,
    NextVersionSet,
    Broken,
}

/// Audit event for the ledger trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub kind: LedgerEventKind,
    pub actor: Address,
    pub tx_id: Option<TxId>,
    pub amount: Option<Amount>,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new(kind: LedgerEventKind, actor: Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            actor,
            tx_id: None,
            amount: None,
            metadata: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_tx(mut self, tx_id: TxId) -> Self {
        self.tx_id = Some(tx_id);
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

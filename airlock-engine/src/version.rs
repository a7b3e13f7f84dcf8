//! Version chain - one-shot pointer to a successor instance

use crate::{access::AccessControl, error::EscrowError, models::Address, EscrowResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChain {
    next_version: Option<Address>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_latest(&self) -> bool {
        self.next_version.is_none()
    }

    /// Successor, or `Address::ZERO` while this instance is the latest
    pub fn next_version(&self) -> Address {
        self.next_version.unwrap_or(Address::ZERO)
    }

    /// Point at `successor` and mark this instance superseded for good.
    ///
    /// The zero address is refused since it would leave the instance
    /// looking like the latest.
    pub fn set_next_version(
        &mut self,
        access: &AccessControl,
        caller: Address,
        successor: Address,
    ) -> EscrowResult<()> {
        access.ensure_dev(caller, "setNextVersion")?;
        if let Some(current) = self.next_version {
            return Err(EscrowError::AlreadySuperseded(current));
        }
        if successor.is_zero() {
            return Err(EscrowError::InvalidDestinationZero);
        }

        self.next_version = Some(successor);
        Ok(())
    }
}

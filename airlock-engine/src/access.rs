//! Access control - the single privileged "dev" principal

use crate::{error::EscrowError, models::Address, EscrowResult};
use serde::{Deserialize, Serialize};

/// Holds the current dev and gates dev-only operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    dev: Address,
}

impl AccessControl {
    /// The deployer becomes the first dev
    pub fn new(deployer: Address) -> Self {
        Self { dev: deployer }
    }

    pub fn current_dev(&self) -> Address {
        self.dev
    }

    pub fn is_dev(&self, caller: Address) -> bool {
        caller == self.dev
    }

    /// Fail with `Unauthorized` unless `caller` is the dev
    pub fn ensure_dev(&self, caller: Address, action: &str) -> EscrowResult<()> {
        if self.is_dev(caller) {
            Ok(())
        } else {
            Err(EscrowError::unauthorized(format!(
                "{} may only be called by the developer, not {}",
                action, caller
            )))
        }
    }

    /// Hand the role to `new_dev`. Reachability of `new_dev` is not checked.
    pub fn change_dev(&mut self, caller: Address, new_dev: Address) -> EscrowResult<()> {
        self.ensure_dev(caller, "changeDev")?;
        self.dev = new_dev;
        Ok(())
    }
}

//! Treasury - fee revenue kept apart from escrowed amounts

use crate::{
    access::AccessControl,
    error::EscrowError,
    models::{Address, Amount, Payout, PayoutReason},
    EscrowResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treasury {
    dev_money: Amount,
}

impl Treasury {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance without an access check, for internal accounting
    pub(crate) fn balance(&self) -> Amount {
        self.dev_money
    }

    /// Dev-only view of the accumulated fees
    pub fn dev_money(&self, access: &AccessControl, caller: Address) -> EscrowResult<Amount> {
        access.ensure_dev(caller, "getDevMoney")?;
        Ok(self.dev_money)
    }

    /// Credit a fee skimmed from a deposit
    pub(crate) fn credit(&mut self, amount: Amount) -> EscrowResult<()> {
        self.dev_money = self
            .dev_money
            .checked_add(amount)
            .ok_or_else(|| EscrowError::overflow("treasury balance"))?;
        Ok(())
    }

    /// Plain value receipt; only the dev may top up the treasury
    pub fn receive(
        &mut self,
        access: &AccessControl,
        caller: Address,
        value: Amount,
    ) -> EscrowResult<()> {
        access.ensure_dev(caller, "plain value receipt")?;
        self.credit(value)
    }

    /// Debit `amount` and return the payout owed to the dev
    pub fn withdraw(
        &mut self,
        access: &AccessControl,
        caller: Address,
        amount: Amount,
    ) -> EscrowResult<Payout> {
        access.ensure_dev(caller, "retrieveDevMoney")?;
        if amount > self.dev_money {
            return Err(EscrowError::InsufficientTreasury {
                requested: amount,
                available: self.dev_money,
            });
        }

        self.dev_money -= amount;
        Ok(Payout {
            to: caller,
            amount,
            reason: PayoutReason::TreasuryWithdrawal,
        })
    }
}

//! Ledger - the escrow transaction state machine
//!
//! One owned aggregate holding every piece of mutable state: the transaction
//! records, the per-party indices, the treasury and the control flags. Each
//! operation validates all of its preconditions before touching anything, so
//! a failed call leaves the ledger exactly as it was.
//!
//! Value never leaves the ledger from in here. Operations that owe someone
//! money commit their bookkeeping first and hand back a [`Payout`] for the
//! host to execute, which keeps reentrant calls from observing stale state.

use crate::{
    access::AccessControl,
    breaker::CircuitBreaker,
    config::AirlockConfig,
    error::EscrowError,
    models::{Address, Amount, PartyIndex, Payout, PayoutReason, Timestamp, Transaction, TxId},
    treasury::Treasury,
    version::VersionChain,
    EscrowResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// This instance's own address
    address: Address,
    access: AccessControl,
    version: VersionChain,
    breaker: CircuitBreaker,
    treasury: Treasury,
    fee: Amount,
    delay: u64,
    next_id: TxId,
    /// Total value held: treasury plus every pending amount
    holdings: Amount,
    transactions: BTreeMap<TxId, Transaction>,
    parties: HashMap<Address, PartyIndex>,
    /// Treasury payouts whose transfer has not been confirmed yet
    #[serde(default)]
    unconfirmed_withdrawals: Vec<Payout>,
}

impl Ledger {
    /// Deploy a fresh ledger at `address` with `deployer` as dev
    pub fn new(config: &AirlockConfig, address: Address, deployer: Address) -> Self {
        info!(
            "Deploying ledger {} (dev {}, fee {}, delay {}s)",
            address, deployer, config.fee, config.delay
        );

        Self {
            address,
            access: AccessControl::new(deployer),
            version: VersionChain::new(),
            breaker: CircuitBreaker::new(),
            treasury: Treasury::new(),
            fee: Amount::from(config.fee),
            delay: config.delay,
            next_id: TxId::FIRST,
            holdings: 0,
            transactions: BTreeMap::new(),
            parties: HashMap::new(),
            unconfirmed_withdrawals: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Id the next successful deposit will receive
    pub fn next_id(&self) -> TxId {
        self.next_id
    }

    // Transactions

    /// Deposit `value` for `destination`, maturing after the configured delay
    pub fn create_transaction(
        &mut self,
        caller: Address,
        destination: Address,
        value: Amount,
        now: Timestamp,
    ) -> EscrowResult<TxId> {
        self.create_transaction_with_delay(caller, destination, value, self.delay, now)
    }

    /// Deposit with a caller-chosen delay, which may not undercut the configured one
    pub fn create_transaction_with_delay(
        &mut self,
        caller: Address,
        destination: Address,
        value: Amount,
        delay: u64,
        now: Timestamp,
    ) -> EscrowResult<TxId> {
        self.breaker.ensure_operational()?;
        if value <= self.fee {
            return Err(EscrowError::InsufficientFunds {
                value,
                fee: self.fee,
            });
        }
        if destination.is_zero() {
            return Err(EscrowError::InvalidDestinationZero);
        }
        if destination == caller {
            return Err(EscrowError::InvalidDestinationSelf);
        }
        if destination == self.address {
            return Err(EscrowError::InvalidDestinationContract);
        }
        if delay < self.delay {
            return Err(EscrowError::DelayTooShort {
                requested: delay,
                minimum: self.delay,
            });
        }

        let maturity = now
            .checked_add(delay)
            .ok_or_else(|| EscrowError::overflow("maturity timestamp"))?;
        let holdings = self
            .holdings
            .checked_add(value)
            .ok_or_else(|| EscrowError::overflow("ledger holdings"))?;
        let id = self.next_id;
        let next_id = id
            .next()
            .ok_or_else(|| EscrowError::overflow("transaction id"))?;
        let amount = value - self.fee;

        self.treasury.credit(self.fee)?;

        self.holdings = holdings;
        self.next_id = next_id;
        self.transactions.insert(
            id,
            Transaction {
                id,
                origin: caller,
                destination,
                maturity,
                amount,
                paid: false,
                reversed: false,
            },
        );
        self.parties.entry(caller).or_default().outgoing.push(id);
        self.parties.entry(destination).or_default().incoming.push(id);

        info!(
            "Created transaction {}: {} -> {} amount {} maturity {}",
            id, caller, destination, amount, maturity
        );

        Ok(id)
    }

    /// Cancel a pending transaction before maturity, refunding the origin.
    /// The fee stays in the treasury.
    pub fn reverse_transaction(
        &mut self,
        caller: Address,
        id: TxId,
        now: Timestamp,
    ) -> EscrowResult<Payout> {
        let tx = self.pending_for_party(caller, id)?;
        if tx.is_mature(now) {
            return Err(EscrowError::MaturityReached {
                id,
                maturity: tx.maturity,
            });
        }
        let (origin, amount) = (tx.origin, tx.amount);
        let holdings = self.debit_holdings(amount)?;

        self.holdings = holdings;
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.reversed = true;
        }

        info!("Reversed transaction {} by {}", id, caller);

        Ok(Payout {
            to: origin,
            amount,
            reason: PayoutReason::Reversal(id),
        })
    }

    /// Settle a pending transaction at or after maturity, paying the destination
    pub fn finish_transaction(
        &mut self,
        caller: Address,
        id: TxId,
        now: Timestamp,
    ) -> EscrowResult<Payout> {
        let tx = self.pending_for_party(caller, id)?;
        if !tx.is_mature(now) {
            return Err(EscrowError::NotMature {
                id,
                maturity: tx.maturity,
            });
        }
        let (destination, amount) = (tx.destination, tx.amount);
        let holdings = self.debit_holdings(amount)?;

        self.holdings = holdings;
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.paid = true;
        }

        info!("Finished transaction {} by {}", id, caller);

        Ok(Payout {
            to: destination,
            amount,
            reason: PayoutReason::Settlement(id),
        })
    }

    /// Full record of `id`, visible to its origin and destination only
    pub fn transaction(&self, caller: Address, id: TxId) -> EscrowResult<Transaction> {
        self.transactions
            .get(&id)
            .filter(|tx| tx.is_party(caller))
            .cloned()
            .ok_or_else(|| Self::not_a_party(caller, id))
    }

    /// Every record the caller takes part in, in creation order
    pub fn my_transactions(&self, caller: Address) -> Vec<Transaction> {
        self.my_transaction_ids(caller)
            .combined()
            .into_iter()
            .filter_map(|id| self.transactions.get(&id).cloned())
            .collect()
    }

    /// The caller's ids split into outgoing and incoming
    pub fn my_transaction_ids(&self, caller: Address) -> PartyIndex {
        self.parties.get(&caller).cloned().unwrap_or_default()
    }

    // Dev settings

    pub fn set_fee(&mut self, caller: Address, fee: Amount) -> EscrowResult<()> {
        self.access.ensure_dev(caller, "setFee")?;
        self.fee = fee;
        info!("Fee set to {}", fee);
        Ok(())
    }

    pub fn set_delay(&mut self, caller: Address, delay: u64) -> EscrowResult<()> {
        self.access.ensure_dev(caller, "setDelay")?;
        self.delay = delay;
        info!("Delay set to {}s", delay);
        Ok(())
    }

    // Treasury

    pub fn dev_money(&self, caller: Address) -> EscrowResult<Amount> {
        self.treasury.dev_money(&self.access, caller)
    }

    pub fn retrieve_dev_money(&mut self, caller: Address, amount: Amount) -> EscrowResult<Payout> {
        let mut treasury = self.treasury.clone();
        let payout = treasury.withdraw(&self.access, caller, amount)?;
        let holdings = self.debit_holdings(payout.amount)?;

        self.treasury = treasury;
        self.holdings = holdings;
        self.unconfirmed_withdrawals.push(payout);

        info!("Dev {} retrieved {} from the treasury", caller, amount);

        Ok(payout)
    }

    /// Plain value sent without a call; credited to the treasury when it comes from the dev
    pub fn receive(&mut self, caller: Address, value: Amount) -> EscrowResult<()> {
        let holdings = self
            .holdings
            .checked_add(value)
            .ok_or_else(|| EscrowError::overflow("ledger holdings"))?;
        self.treasury.receive(&self.access, caller, value)?;
        self.holdings = holdings;

        info!("Treasury topped up with {} by {}", value, caller);

        Ok(())
    }

    // Access, version chain, circuit breaker

    pub fn current_dev(&self) -> Address {
        self.access.current_dev()
    }

    pub fn is_dev(&self, caller: Address) -> bool {
        self.access.is_dev(caller)
    }

    pub fn change_dev(&mut self, caller: Address, new_dev: Address) -> EscrowResult<()> {
        self.access.change_dev(caller, new_dev)?;
        info!("Dev changed from {} to {}", caller, new_dev);
        Ok(())
    }

    pub fn is_latest(&self) -> bool {
        self.version.is_latest()
    }

    pub fn next_version(&self) -> Address {
        self.version.next_version()
    }

    pub fn set_next_version(&mut self, caller: Address, successor: Address) -> EscrowResult<()> {
        self.version
            .set_next_version(&self.access, caller, successor)?;
        info!("Ledger {} superseded by {}", self.address, successor);
        Ok(())
    }

    pub fn is_broken(&self) -> bool {
        self.breaker.is_broken()
    }

    pub fn set_broken(&mut self, caller: Address) -> EscrowResult<()> {
        self.breaker.set_broken(&self.access, caller)?;
        info!("Circuit breaker engaged on ledger {}", self.address);
        Ok(())
    }

    // Accounting

    /// Total value the ledger holds
    pub fn holdings(&self) -> Amount {
        self.holdings
    }

    /// Sum of the amounts still in escrow
    pub fn pending_total(&self) -> Amount {
        self.transactions
            .values()
            .filter(|tx| tx.is_pending())
            .map(|tx| tx.amount)
            .sum()
    }

    /// holdings == treasury + pending amounts
    pub fn check_invariant(&self) -> bool {
        self.treasury
            .balance()
            .checked_add(self.pending_total())
            .is_some_and(|expected| expected == self.holdings)
    }

    /// The host carried out `payout`; it can no longer be restored
    pub(crate) fn confirm_payout(&mut self, payout: &Payout) {
        if let Some(pos) = self.unconfirmed_withdrawals.iter().position(|p| p == payout) {
            self.unconfirmed_withdrawals.remove(pos);
        }
    }

    /// Undo a payout whose transfer the host refused.
    ///
    /// Only a payout this ledger handed out and that is still in effect can
    /// be restored: the transaction must carry the matching resolving flag
    /// and amount, and a withdrawal must still be unconfirmed.
    pub(crate) fn restore_payout(&mut self, payout: &Payout) -> EscrowResult<()> {
        let holdings = self
            .holdings
            .checked_add(payout.amount)
            .ok_or_else(|| EscrowError::overflow("ledger holdings"))?;

        match payout.reason {
            PayoutReason::Reversal(id) | PayoutReason::Settlement(id) => {
                let tx = self
                    .transactions
                    .get_mut(&id)
                    .ok_or_else(|| Self::unknown_payout(payout))?;
                let (flag, to) = match payout.reason {
                    PayoutReason::Reversal(_) => (&mut tx.reversed, tx.origin),
                    _ => (&mut tx.paid, tx.destination),
                };
                if !*flag || to != payout.to || tx.amount != payout.amount {
                    return Err(Self::unknown_payout(payout));
                }
                *flag = false;
            }
            PayoutReason::TreasuryWithdrawal => {
                let pos = self
                    .unconfirmed_withdrawals
                    .iter()
                    .position(|p| p == payout)
                    .ok_or_else(|| Self::unknown_payout(payout))?;
                self.treasury.credit(payout.amount)?;
                self.unconfirmed_withdrawals.remove(pos);
            }
        }
        self.holdings = holdings;

        info!("Restored payout of {} to {}", payout.amount, payout.to);

        Ok(())
    }

    fn pending_for_party(&self, caller: Address, id: TxId) -> EscrowResult<&Transaction> {
        // Unknown ids have no parties.
        let tx = self
            .transactions
            .get(&id)
            .ok_or_else(|| Self::not_a_party(caller, id))?;
        if !tx.is_pending() {
            return Err(EscrowError::AlreadyResolved(id));
        }
        if !tx.is_party(caller) {
            return Err(Self::not_a_party(caller, id));
        }
        Ok(tx)
    }

    fn debit_holdings(&self, amount: Amount) -> EscrowResult<Amount> {
        self.holdings
            .checked_sub(amount)
            .ok_or_else(|| EscrowError::overflow("ledger holdings underflow"))
    }

    fn unknown_payout(payout: &Payout) -> EscrowError {
        EscrowError::UnknownPayout(format!(
            "{:?} of {} to {}",
            payout.reason, payout.amount, payout.to
        ))
    }

    fn not_a_party(caller: Address, id: TxId) -> EscrowError {
        EscrowError::unauthorized(format!(
            "{} is not a party to transaction {}",
            caller, id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionState;

    const CONTRACT: Address = Address::repeat_byte(0xcc);
    const OWNER: Address = Address::repeat_byte(0x01);
    const BOBBY: Address = Address::repeat_byte(0x02);
    const ALICE: Address = Address::repeat_byte(0x03);
    const CAROL: Address = Address::repeat_byte(0x04);

    const ETHER: Amount = 1_000_000_000_000_000_000;
    const FEE: Amount = 1_000_000_000_000_000;
    const DAY: u64 = 86_400;
    const T0: Timestamp = 1_700_000_000;

    fn ledger() -> Ledger {
        Ledger::new(&AirlockConfig::default(), CONTRACT, OWNER)
    }

    #[test]
    fn test_deploy_defaults() {
        let ledger = ledger();
        assert_eq!(ledger.fee(), FEE);
        assert_eq!(ledger.delay(), DAY);
        assert_eq!(ledger.current_dev(), OWNER);
        assert!(!ledger.is_broken());
        assert!(ledger.is_latest());
        assert_eq!(ledger.next_version(), Address::ZERO);
        assert_eq!(ledger.next_id(), TxId(1024));
        assert_eq!(ledger.dev_money(OWNER).unwrap(), 0);
    }

    #[test]
    fn test_create_transaction_records_everything() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        assert_eq!(id, TxId(1024));

        let tx = ledger.transaction(BOBBY, id).unwrap();
        assert_eq!(tx.origin, BOBBY);
        assert_eq!(tx.destination, ALICE);
        assert_eq!(tx.maturity, T0 + DAY);
        assert_eq!(tx.amount, ETHER - FEE);
        assert!(!tx.paid);
        assert!(!tx.reversed);

        assert_eq!(ledger.dev_money(OWNER).unwrap(), FEE);
        assert_eq!(ledger.holdings(), ETHER);
        assert!(ledger.check_invariant());

        let bobby = ledger.my_transaction_ids(BOBBY);
        let alice = ledger.my_transaction_ids(ALICE);
        assert_eq!(bobby.outgoing, vec![id]);
        assert!(bobby.incoming.is_empty());
        assert!(alice.outgoing.is_empty());
        assert_eq!(alice.incoming, vec![id]);
    }

    #[test]
    fn test_ids_increase_by_one_and_skip_failed_attempts() {
        let mut ledger = ledger();
        assert_eq!(ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap(), TxId(1024));
        assert!(ledger.create_transaction(BOBBY, BOBBY, ETHER, T0).is_err());
        assert!(ledger.create_transaction(BOBBY, ALICE, FEE, T0).is_err());
        assert_eq!(ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap(), TxId(1025));
        assert_eq!(ledger.create_transaction(ALICE, BOBBY, ETHER, T0).unwrap(), TxId(1026));
    }

    #[test]
    fn test_create_preconditions_in_order() {
        let mut ledger = ledger();

        // Too small and a bad destination: the amount check wins.
        assert!(matches!(
            ledger.create_transaction(BOBBY, Address::ZERO, FEE, T0),
            Err(EscrowError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.create_transaction(BOBBY, Address::ZERO, ETHER, T0),
            Err(EscrowError::InvalidDestinationZero)
        ));
        assert!(matches!(
            ledger.create_transaction(BOBBY, BOBBY, ETHER, T0),
            Err(EscrowError::InvalidDestinationSelf)
        ));
        assert!(matches!(
            ledger.create_transaction(BOBBY, CONTRACT, ETHER, T0),
            Err(EscrowError::InvalidDestinationContract)
        ));

        ledger.set_broken(OWNER).unwrap();
        assert!(matches!(
            ledger.create_transaction(BOBBY, Address::ZERO, 0, T0),
            Err(EscrowError::Broken)
        ));

        assert_eq!(ledger.holdings(), 0);
        assert_eq!(ledger.next_id(), TxId(1024));
        assert!(ledger.my_transaction_ids(BOBBY).is_empty());
    }

    #[test]
    fn test_value_equal_to_fee_is_rejected() {
        let mut ledger = ledger();
        assert!(matches!(
            ledger.create_transaction(BOBBY, ALICE, FEE, T0),
            Err(EscrowError::InsufficientFunds { value, fee }) if value == FEE && fee == FEE
        ));
        assert!(ledger.create_transaction(BOBBY, ALICE, FEE + 1, T0).is_ok());
    }

    #[test]
    fn test_requested_delay_below_minimum() {
        let mut ledger = ledger();
        assert!(matches!(
            ledger.create_transaction_with_delay(BOBBY, ALICE, ETHER, DAY - 1, T0),
            Err(EscrowError::DelayTooShort { requested, minimum }) if requested == DAY - 1 && minimum == DAY
        ));

        let id = ledger
            .create_transaction_with_delay(BOBBY, ALICE, ETHER, 2 * DAY, T0)
            .unwrap();
        assert_eq!(ledger.transaction(ALICE, id).unwrap().maturity, T0 + 2 * DAY);
    }

    #[test]
    fn test_reverse_before_maturity_by_either_party() {
        let mut ledger = ledger();
        let first = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        let second = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        let payout = ledger.reverse_transaction(BOBBY, first, T0 + 10).unwrap();
        assert_eq!(payout.to, BOBBY);
        assert_eq!(payout.amount, ETHER - FEE);
        assert_eq!(payout.reason, PayoutReason::Reversal(first));

        let payout = ledger.reverse_transaction(ALICE, second, T0 + DAY - 1).unwrap();
        assert_eq!(payout.to, BOBBY);

        assert_eq!(ledger.dev_money(OWNER).unwrap(), 2 * FEE);
        assert_eq!(ledger.holdings(), 2 * FEE);
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_reverse_only_flips_reversed() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        let before = ledger.transaction(BOBBY, id).unwrap();

        ledger.reverse_transaction(BOBBY, id, T0).unwrap();
        let after = ledger.transaction(BOBBY, id).unwrap();
        assert_eq!(after, Transaction { reversed: true, ..before });
        assert_eq!(after.state(), TransactionState::Reversed);
    }

    #[test]
    fn test_reverse_rejections() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        assert!(matches!(
            ledger.reverse_transaction(CAROL, id, T0),
            Err(EscrowError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.reverse_transaction(OWNER, id, T0),
            Err(EscrowError::Unauthorized(_))
        ));
        for caller in [BOBBY, ALICE] {
            assert!(matches!(
                ledger.reverse_transaction(caller, id, T0 + DAY),
                Err(EscrowError::MaturityReached { .. })
            ));
        }
        assert!(matches!(
            ledger.reverse_transaction(BOBBY, TxId(9999), T0),
            Err(EscrowError::Unauthorized(_))
        ));

        ledger.reverse_transaction(BOBBY, id, T0).unwrap();
        assert!(matches!(
            ledger.reverse_transaction(ALICE, id, T0),
            Err(EscrowError::AlreadyResolved(_))
        ));
        assert!(matches!(
            ledger.finish_transaction(ALICE, id, T0 + DAY),
            Err(EscrowError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_finish_after_maturity() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        for caller in [BOBBY, ALICE] {
            assert!(matches!(
                ledger.finish_transaction(caller, id, T0 + DAY - 1),
                Err(EscrowError::NotMature { .. })
            ));
        }
        assert!(matches!(
            ledger.finish_transaction(OWNER, id, T0 + DAY),
            Err(EscrowError::Unauthorized(_))
        ));

        let payout = ledger.finish_transaction(BOBBY, id, T0 + DAY).unwrap();
        assert_eq!(payout.to, ALICE);
        assert_eq!(payout.amount, ETHER - FEE);

        let tx = ledger.transaction(ALICE, id).unwrap();
        assert!(tx.paid);
        assert!(!tx.reversed);

        for caller in [BOBBY, ALICE] {
            assert!(matches!(
                ledger.finish_transaction(caller, id, T0 + 2 * DAY),
                Err(EscrowError::AlreadyResolved(_))
            ));
        }
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_views_hidden_from_outsiders_and_dev() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        ledger.create_transaction(ALICE, BOBBY, ETHER, T0).unwrap();

        assert!(ledger.transaction(CAROL, id).is_err());
        assert!(ledger.transaction(OWNER, id).is_err());
        assert!(ledger.my_transactions(CAROL).is_empty());
        assert!(ledger.my_transactions(OWNER).is_empty());

        let mine: Vec<TxId> = ledger.my_transactions(BOBBY).iter().map(|tx| tx.id).collect();
        assert_eq!(mine, vec![TxId(1024), TxId(1025)]);
    }

    #[test]
    fn test_resolved_transactions_stay_readable() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        ledger.finish_transaction(ALICE, id, T0 + DAY).unwrap();

        assert!(ledger.transaction(BOBBY, id).unwrap().paid);
        assert_eq!(ledger.my_transactions(ALICE).len(), 1);
    }

    #[test]
    fn test_dev_setters() {
        let mut ledger = ledger();
        let early = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        assert!(ledger.set_fee(BOBBY, 95).is_err());
        assert!(ledger.set_delay(BOBBY, 1).is_err());

        ledger.set_fee(OWNER, 95).unwrap();
        ledger.set_delay(OWNER, 1).unwrap();
        assert_eq!(ledger.fee(), 95);
        assert_eq!(ledger.delay(), 1);

        let late = ledger.create_transaction(BOBBY, ALICE, 1_000, T0).unwrap();
        assert_eq!(ledger.transaction(BOBBY, late).unwrap().amount, 905);
        assert_eq!(ledger.transaction(BOBBY, late).unwrap().maturity, T0 + 1);
        assert_eq!(ledger.transaction(BOBBY, early).unwrap().amount, ETHER - FEE);

        ledger.set_fee(OWNER, 10 * ETHER).unwrap();
        assert!(matches!(
            ledger.create_transaction(BOBBY, ALICE, ETHER, T0),
            Err(EscrowError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_treasury_flow() {
        let mut ledger = ledger();
        ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        ledger.create_transaction(ALICE, BOBBY, ETHER, T0).unwrap();
        ledger.create_transaction(BOBBY, OWNER, ETHER, T0).unwrap();
        ledger.create_transaction(OWNER, BOBBY, ETHER, T0).unwrap();

        let fees = ledger.dev_money(OWNER).unwrap();
        assert_eq!(fees, 4 * FEE);
        assert!(ledger.dev_money(BOBBY).is_err());
        assert!(ledger.retrieve_dev_money(BOBBY, fees).is_err());
        assert!(matches!(
            ledger.retrieve_dev_money(OWNER, fees + 1),
            Err(EscrowError::InsufficientTreasury { .. })
        ));

        let payout = ledger.retrieve_dev_money(OWNER, fees).unwrap();
        assert_eq!(payout.to, OWNER);
        assert_eq!(payout.amount, fees);
        assert_eq!(ledger.dev_money(OWNER).unwrap(), 0);
        assert_eq!(ledger.holdings(), 4 * (ETHER - FEE));
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_receive_from_dev_only() {
        let mut ledger = ledger();
        ledger.receive(OWNER, ETHER).unwrap();
        assert_eq!(ledger.dev_money(OWNER).unwrap(), ETHER);
        assert_eq!(ledger.holdings(), ETHER);

        assert!(matches!(
            ledger.receive(BOBBY, ETHER),
            Err(EscrowError::Unauthorized(_))
        ));
        assert_eq!(ledger.dev_money(OWNER).unwrap(), ETHER);
        assert_eq!(ledger.holdings(), ETHER);
    }

    #[test]
    fn test_broken_still_lets_pending_resolve() {
        let mut ledger = ledger();
        let a = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        let b = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        assert!(ledger.set_broken(BOBBY).is_err());
        ledger.set_broken(OWNER).unwrap();
        assert!(matches!(
            ledger.create_transaction(BOBBY, ALICE, ETHER, T0),
            Err(EscrowError::Broken)
        ));

        ledger.reverse_transaction(BOBBY, a, T0 + 1).unwrap();
        ledger.finish_transaction(ALICE, b, T0 + DAY).unwrap();
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_dev_only_controls_reject_others() {
        let mut ledger = ledger();
        assert!(matches!(ledger.change_dev(BOBBY, BOBBY), Err(EscrowError::Unauthorized(_))));
        assert!(matches!(
            ledger.set_next_version(BOBBY, CAROL),
            Err(EscrowError::Unauthorized(_))
        ));

        ledger.change_dev(OWNER, BOBBY).unwrap();
        assert!(ledger.is_dev(BOBBY));
        assert!(ledger.set_fee(OWNER, 1).is_err());
        ledger.set_next_version(BOBBY, CAROL).unwrap();
        assert!(!ledger.is_latest());
        assert!(matches!(
            ledger.set_next_version(BOBBY, ALICE),
            Err(EscrowError::AlreadySuperseded(_))
        ));
    }

    #[test]
    fn test_restore_payout_undoes_resolution() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        let before = ledger.clone();

        let payout = ledger.finish_transaction(ALICE, id, T0 + DAY).unwrap();
        ledger.restore_payout(&payout).unwrap();
        assert_eq!(ledger.transaction(ALICE, id).unwrap(), before.transaction(ALICE, id).unwrap());
        assert_eq!(ledger.holdings(), before.holdings());

        let payout = ledger.retrieve_dev_money(OWNER, FEE).unwrap();
        ledger.restore_payout(&payout).unwrap();
        assert_eq!(ledger.dev_money(OWNER).unwrap(), FEE);
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_restore_payout_rejects_stale_and_forged_payouts() {
        let mut ledger = ledger();
        let id = ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();
        let payout = ledger.finish_transaction(ALICE, id, T0 + DAY).unwrap();

        ledger.restore_payout(&payout).unwrap();
        assert!(matches!(
            ledger.restore_payout(&payout),
            Err(EscrowError::UnknownPayout(_))
        ));
        assert_eq!(ledger.holdings(), ETHER);
        assert!(ledger.check_invariant());

        // Settled again, then handed back with the wrong amount or reason.
        let payout = ledger.finish_transaction(ALICE, id, T0 + DAY).unwrap();
        let inflated = Payout {
            amount: payout.amount + 1,
            ..payout
        };
        let as_reversal = Payout {
            reason: PayoutReason::Reversal(id),
            ..payout
        };
        for bad in [inflated, as_reversal] {
            assert!(matches!(
                ledger.restore_payout(&bad),
                Err(EscrowError::UnknownPayout(_))
            ));
        }
        assert!(ledger.transaction(ALICE, id).unwrap().paid);

        let forged = Payout {
            to: OWNER,
            amount: 5,
            reason: PayoutReason::TreasuryWithdrawal,
        };
        assert!(matches!(
            ledger.restore_payout(&forged),
            Err(EscrowError::UnknownPayout(_))
        ));
        assert_eq!(ledger.dev_money(OWNER).unwrap(), FEE);

        let withdrawal = ledger.retrieve_dev_money(OWNER, FEE).unwrap();
        ledger.confirm_payout(&withdrawal);
        assert!(ledger.restore_payout(&withdrawal).is_err());
        assert_eq!(ledger.dev_money(OWNER).unwrap(), 0);
        assert!(ledger.check_invariant());
    }

    #[test]
    fn test_withdrawal_from_inconsistent_snapshot_fails_cleanly() {
        let mut ledger = ledger();
        ledger.create_transaction(BOBBY, ALICE, ETHER, T0).unwrap();

        let mut state = serde_json::to_value(&ledger).unwrap();
        state["holdings"] = serde_json::json!(0);
        let mut ledger: Ledger = serde_json::from_value(state).unwrap();

        assert!(matches!(
            ledger.retrieve_dev_money(OWNER, FEE),
            Err(EscrowError::Overflow(_))
        ));
        assert_eq!(ledger.dev_money(OWNER).unwrap(), FEE);
        assert_eq!(ledger.holdings(), 0);
    }
}

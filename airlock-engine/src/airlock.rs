//! Airlock - async service facade over the ledger
//!
//! Applies calls one at a time through a call gate, reads time from a
//! [`Clock`] and pays out through a [`ValueTransfer`]. The ledger lock is
//! released before value moves, so a transfer that calls back into the
//! service sees the committed state. The gate stays held for the whole call,
//! so other callers never see a payout that is later rolled back. A refused
//! transfer is compensated and the call reports [`EscrowError::Transfer`]
//! with no net effect.

use crate::{
    config::AirlockConfig,
    error::EscrowError,
    ledger::Ledger,
    models::{
        Address, Amount, LedgerEvent, LedgerEventKind, PartyIndex, Payout, PayoutReason,
        Timestamp, Transaction, TxId,
    },
    EscrowResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};

tokio::task_local! {
    /// Set while the current task is inside a gated call
    static IN_CALL: ();
}

/// Source of the current time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Clock moved by hand, for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump to `now`; moving backwards is ignored since host time never decreases
    pub fn set(&self, now: Timestamp) {
        self.now.fetch_max(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`, stopping at the largest timestamp
    pub fn advance(&self, secs: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(secs))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Host hook that moves value out of the ledger
#[async_trait]
pub trait ValueTransfer: Send + Sync {
    async fn transfer(&self, payout: &Payout) -> EscrowResult<()>;
}

/// Wallet balances kept in memory
#[derive(Debug, Default)]
pub struct InMemoryWallets {
    balances: RwLock<HashMap<Address, Amount>>,
}

impl InMemoryWallets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (Address, Amount)>,
    {
        Self {
            balances: RwLock::new(balances.into_iter().collect()),
        }
    }

    pub async fn balance(&self, owner: Address) -> Amount {
        self.balances.read().await.get(&owner).copied().unwrap_or(0)
    }

    pub async fn credit(&self, owner: Address, amount: Amount) -> EscrowResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(owner).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| EscrowError::overflow(format!("wallet balance of {}", owner)))?;
        Ok(())
    }

    /// Take `amount` from `owner`, e.g. the value attached to a call
    pub async fn debit(&self, owner: Address, amount: Amount) -> EscrowResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(owner).or_insert(0);
        if *balance < amount {
            return Err(EscrowError::transfer(format!(
                "{} holds {} but {} was requested",
                owner, balance, amount
            )));
        }
        *balance -= amount;
        Ok(())
    }
}

#[async_trait]
impl ValueTransfer for InMemoryWallets {
    async fn transfer(&self, payout: &Payout) -> EscrowResult<()> {
        self.credit(payout.to, payout.amount).await
    }
}

/// Main airlock service
#[derive(Clone)]
pub struct Airlock {
    ledger: Arc<RwLock<Ledger>>,
    /// Audit trail of successful state changes
    events: Arc<RwLock<Vec<LedgerEvent>>>,
    clock: Arc<dyn Clock>,
    transfer: Arc<dyn ValueTransfer>,
    /// Held for the whole of each top-level call
    gate: Arc<Mutex<()>>,
}

impl Airlock {
    /// Deploy a new instance at `address` with `deployer` as dev
    pub fn new(
        config: &AirlockConfig,
        address: Address,
        deployer: Address,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn ValueTransfer>,
    ) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::new(config, address, deployer))),
            events: Arc::new(RwLock::new(Vec::new())),
            clock,
            transfer,
            gate: Arc::new(Mutex::new(())),
        }
    }

    // Transactions

    pub async fn create_transaction(
        &self,
        caller: Address,
        destination: Address,
        value: Amount,
    ) -> EscrowResult<TxId> {
        self.gated(async {
            let id = self
                .commit("createTransaction", caller, |ledger, now| {
                    ledger.create_transaction(caller, destination, value, now)
                })
                .await?;
            self.record_created(caller, id, value).await;
            Ok(id)
        })
        .await
    }

    pub async fn create_transaction_with_delay(
        &self,
        caller: Address,
        destination: Address,
        value: Amount,
        delay: u64,
    ) -> EscrowResult<TxId> {
        self.gated(async {
            let id = self
                .commit("createTransaction", caller, |ledger, now| {
                    ledger.create_transaction_with_delay(caller, destination, value, delay, now)
                })
                .await?;
            self.record_created(caller, id, value).await;
            Ok(id)
        })
        .await
    }

    pub async fn reverse_transaction(&self, caller: Address, id: TxId) -> EscrowResult<Payout> {
        self.gated(async {
            let payout = self
                .commit("reverseTransaction", caller, |ledger, now| {
                    ledger.reverse_transaction(caller, id, now)
                })
                .await?;
            self.pay_out(caller, payout).await
        })
        .await
    }

    pub async fn finish_transaction(&self, caller: Address, id: TxId) -> EscrowResult<Payout> {
        self.gated(async {
            let payout = self
                .commit("finishTransaction", caller, |ledger, now| {
                    ledger.finish_transaction(caller, id, now)
                })
                .await?;
            self.pay_out(caller, payout).await
        })
        .await
    }

    pub async fn get_transaction(&self, caller: Address, id: TxId) -> EscrowResult<Transaction> {
        self.view(|ledger| ledger.transaction(caller, id)).await
    }

    pub async fn my_transactions(&self, caller: Address) -> Vec<Transaction> {
        self.view(|ledger| ledger.my_transactions(caller)).await
    }

    pub async fn my_transaction_ids(&self, caller: Address) -> PartyIndex {
        self.view(|ledger| ledger.my_transaction_ids(caller)).await
    }

    // Dev settings

    pub async fn fee(&self) -> Amount {
        self.view(Ledger::fee).await
    }

    pub async fn delay(&self) -> u64 {
        self.view(Ledger::delay).await
    }

    pub async fn set_fee(&self, caller: Address, fee: Amount) -> EscrowResult<()> {
        self.gated(async {
            self.commit("setFee", caller, |ledger, _| ledger.set_fee(caller, fee))
                .await?;
            self.record(
                LedgerEvent::new(LedgerEventKind::FeeChanged, caller)
                    .with_metadata(serde_json::json!({ "fee": fee.to_string() })),
            )
            .await;
            Ok(())
        })
        .await
    }

    pub async fn set_delay(&self, caller: Address, delay: u64) -> EscrowResult<()> {
        self.gated(async {
            self.commit("setDelay", caller, |ledger, _| ledger.set_delay(caller, delay))
                .await?;
            self.record(
                LedgerEvent::new(LedgerEventKind::DelayChanged, caller)
                    .with_metadata(serde_json::json!({ "delay": delay })),
            )
            .await;
            Ok(())
        })
        .await
    }

    // Treasury

    pub async fn get_dev_money(&self, caller: Address) -> EscrowResult<Amount> {
        self.view(|ledger| ledger.dev_money(caller)).await
    }

    pub async fn retrieve_dev_money(&self, caller: Address, amount: Amount) -> EscrowResult<Payout> {
        self.gated(async {
            let payout = self
                .commit("retrieveDevMoney", caller, |ledger, _| {
                    ledger.retrieve_dev_money(caller, amount)
                })
                .await?;
            self.pay_out(caller, payout).await
        })
        .await
    }

    /// Plain value receipt with no call attached
    pub async fn receive(&self, caller: Address, value: Amount) -> EscrowResult<()> {
        self.gated(async {
            self.commit("receive", caller, |ledger, _| ledger.receive(caller, value))
                .await?;
            self.record(
                LedgerEvent::new(LedgerEventKind::TreasuryDeposit, caller).with_amount(value),
            )
            .await;
            Ok(())
        })
        .await
    }

    // Access, version chain, circuit breaker

    pub async fn current_dev(&self) -> Address {
        self.view(Ledger::current_dev).await
    }

    pub async fn is_dev(&self, caller: Address) -> bool {
        self.view(|ledger| ledger.is_dev(caller)).await
    }

    pub async fn change_dev(&self, caller: Address, new_dev: Address) -> EscrowResult<()> {
        self.gated(async {
            self.commit("changeDev", caller, |ledger, _| {
                ledger.change_dev(caller, new_dev)
            })
            .await?;
            self.record(
                LedgerEvent::new(LedgerEventKind::DevChanged, caller)
                    .with_metadata(serde_json::json!({ "new_dev": new_dev })),
            )
            .await;
            Ok(())
        })
        .await
    }

    pub async fn is_latest(&self) -> bool {
        self.view(Ledger::is_latest).await
    }

    pub async fn next_version(&self) -> Address {
        self.view(Ledger::next_version).await
    }

    pub async fn set_next_version(&self, caller: Address, successor: Address) -> EscrowResult<()> {
        self.gated(async {
            self.commit("setNextVersion", caller, |ledger, _| {
                ledger.set_next_version(caller, successor)
            })
            .await?;
            self.record(
                LedgerEvent::new(LedgerEventKind::NextVersionSet, caller)
                    .with_metadata(serde_json::json!({ "next_version": successor })),
            )
            .await;
            Ok(())
        })
        .await
    }

    pub async fn is_broken(&self) -> bool {
        self.view(Ledger::is_broken).await
    }

    pub async fn set_broken(&self, caller: Address) -> EscrowResult<()> {
        self.gated(async {
            self.commit("setBroken", caller, |ledger, _| ledger.set_broken(caller))
                .await?;
            self.record(LedgerEvent::new(LedgerEventKind::Broken, caller))
                .await;
            Ok(())
        })
        .await
    }

    // Accounting and audit

    pub async fn holdings(&self) -> Amount {
        self.view(Ledger::holdings).await
    }

    pub async fn check_invariant(&self) -> bool {
        self.view(Ledger::check_invariant).await
    }

    /// Copy of the full ledger state
    pub async fn snapshot(&self) -> Ledger {
        self.view(Ledger::clone).await
    }

    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.gated(async { self.events.read().await.clone() }).await
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run `call` as one whole call. Top-level callers queue on the gate;
    /// calls made from inside a transfer already hold it and run straight away.
    async fn gated<T, Fut>(&self, call: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        if IN_CALL.try_with(|_| ()).is_ok() {
            return call.await;
        }
        let _gate = self.gate.lock().await;
        IN_CALL.scope((), call).await
    }

    async fn view<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Ledger) -> T,
    {
        self.gated(async { f(&*self.ledger.read().await) }).await
    }

    /// Run one ledger operation under the write lock
    async fn commit<T, F>(&self, op: &str, caller: Address, f: F) -> EscrowResult<T>
    where
        F: FnOnce(&mut Ledger, Timestamp) -> EscrowResult<T>,
    {
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;
        f(&mut *ledger, now).map_err(|err| {
            warn!("{} by {} rejected: {}", op, caller, err);
            err
        })
    }

    /// Interaction step, after the ledger has committed and the lock is gone
    async fn pay_out(&self, caller: Address, payout: Payout) -> EscrowResult<Payout> {
        if let Err(err) = self.transfer.transfer(&payout).await {
            error!(
                "Transfer of {} to {} failed, rolling back: {}",
                payout.amount, payout.to, err
            );
            self.ledger.write().await.restore_payout(&payout)?;
            return Err(match err {
                EscrowError::Transfer(_) => err,
                other => EscrowError::transfer(other.to_string()),
            });
        }
        self.ledger.write().await.confirm_payout(&payout);

        let event = match payout.reason {
            PayoutReason::Reversal(id) => {
                LedgerEvent::new(LedgerEventKind::TransactionReversed, caller).with_tx(id)
            }
            PayoutReason::Settlement(id) => {
                LedgerEvent::new(LedgerEventKind::TransactionFinished, caller).with_tx(id)
            }
            PayoutReason::TreasuryWithdrawal => {
                LedgerEvent::new(LedgerEventKind::TreasuryWithdrawal, caller)
            }
        };
        self.record(event.with_amount(payout.amount)).await;

        Ok(payout)
    }

    async fn record_created(&self, caller: Address, id: TxId, value: Amount) {
        self.record(
            LedgerEvent::new(LedgerEventKind::TransactionCreated, caller)
                .with_tx(id)
                .with_amount(value),
        )
        .await;
    }

    async fn record(&self, event: LedgerEvent) {
        self.events.write().await.push(event);
    }
}

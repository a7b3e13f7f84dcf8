//! Scenario replay - runs a scripted sequence of calls against a fresh instance

use airlock_engine::{
    Address, Airlock, AirlockConfig, Amount, EscrowError, InMemoryWallets, ManualClock,
    Timestamp, TxId,
};
use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::BTreeMap, path::Path, sync::Arc};
use tracing::info;

/// A deployment plus the calls to run against it
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Address the instance is deployed at
    pub contract: Address,
    /// Becomes the dev
    pub deployer: Address,
    #[serde(default)]
    pub start: Timestamp,
    /// Opening wallet balances
    #[serde(default)]
    pub wallets: BTreeMap<Address, Amount>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Absolute time for this call
    #[serde(default)]
    pub at: Option<Timestamp>,
    /// Seconds to move the clock forward before this call
    #[serde(default)]
    pub advance: Option<u64>,
    pub caller: Address,
    pub call: Call,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    CreateTransaction {
        destination: Address,
        value: Amount,
        #[serde(default)]
        delay: Option<u64>,
    },
    ReverseTransaction {
        id: TxId,
    },
    FinishTransaction {
        id: TxId,
    },
    GetTransaction {
        id: TxId,
    },
    MyTransactions,
    MyTransactionIds,
    SetFee {
        fee: Amount,
    },
    SetDelay {
        delay: u64,
    },
    GetDevMoney,
    RetrieveDevMoney {
        amount: Amount,
    },
    Receive {
        value: Amount,
    },
    ChangeDev {
        new_dev: Address,
    },
    SetNextVersion {
        successor: Address,
    },
    SetBroken,
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTransaction { .. } => "createTransaction",
            Self::ReverseTransaction { .. } => "reverseTransaction",
            Self::FinishTransaction { .. } => "finishTransaction",
            Self::GetTransaction { .. } => "getTransaction",
            Self::MyTransactions => "myTransactions",
            Self::MyTransactionIds => "myTransactionIds",
            Self::SetFee { .. } => "setFee",
            Self::SetDelay { .. } => "setDelay",
            Self::GetDevMoney => "getDevMoney",
            Self::RetrieveDevMoney { .. } => "retrieveDevMoney",
            Self::Receive { .. } => "receive",
            Self::ChangeDev { .. } => "changeDev",
            Self::SetNextVersion { .. } => "setNextVersion",
            Self::SetBroken => "setBroken",
        }
    }

    /// Value sent along with the call
    fn attached_value(&self) -> Amount {
        match self {
            Self::CreateTransaction { value, .. } | Self::Receive { value } => *value,
            _ => 0,
        }
    }
}

impl Scenario {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing scenario {}", path.display()))
    }
}

/// Replay every step and return one JSON line per step followed by a summary
pub async fn replay(config: &AirlockConfig, scenario: &Scenario) -> anyhow::Result<Vec<Value>> {
    let clock = Arc::new(ManualClock::new(scenario.start));
    let wallets = Arc::new(InMemoryWallets::with_balances(
        scenario.wallets.iter().map(|(addr, amount)| (*addr, *amount)),
    ));
    let airlock = Airlock::new(
        config,
        scenario.contract,
        scenario.deployer,
        clock.clone(),
        wallets.clone(),
    );

    info!(
        "Replaying {} steps against {}",
        scenario.steps.len(),
        scenario.contract
    );

    let mut lines = Vec::with_capacity(scenario.steps.len() + 1);
    for (index, step) in scenario.steps.iter().enumerate() {
        if let Some(at) = step.at {
            clock.set(at);
        }
        if let Some(secs) = step.advance {
            clock.advance(secs);
        }

        let outcome = run_step(&airlock, &wallets, step).await;
        let mut line = json!({
            "step": index,
            "at": airlock.now(),
            "caller": step.caller,
            "call": step.call.name(),
        });
        match outcome {
            Ok(result) => line["ok"] = result,
            Err(err) => {
                line["error"] = json!(err.kind());
                line["message"] = json!(err.to_string());
            }
        }
        lines.push(line);
    }

    let ledger = airlock.snapshot().await;
    let mut balances = BTreeMap::new();
    for addr in scenario.wallets.keys() {
        balances.insert(addr.to_string(), wallets.balance(*addr).await.to_string());
    }
    lines.push(json!({
        "summary": {
            "dev": ledger.current_dev(),
            "dev_money": ledger.dev_money(ledger.current_dev())?.to_string(),
            "fee": ledger.fee().to_string(),
            "delay": ledger.delay(),
            "holdings": ledger.holdings().to_string(),
            "pending": ledger.pending_total().to_string(),
            "invariant": ledger.check_invariant(),
            "broken": ledger.is_broken(),
            "latest": ledger.is_latest(),
            "next_version": ledger.next_version(),
            "next_id": ledger.next_id(),
            "events": airlock.events().await.len(),
            "wallets": balances,
        }
    }));

    Ok(lines)
}

async fn run_step(
    airlock: &Airlock,
    wallets: &InMemoryWallets,
    step: &Step,
) -> Result<Value, EscrowError> {
    let value = step.call.attached_value();
    if value > 0 {
        wallets.debit(step.caller, value).await?;
    }

    let result = dispatch(airlock, step.caller, &step.call).await;
    if result.is_err() && value > 0 {
        wallets.credit(step.caller, value).await?;
    }
    result
}

async fn dispatch(airlock: &Airlock, caller: Address, call: &Call) -> Result<Value, EscrowError> {
    let value = match call {
        Call::CreateTransaction {
            destination,
            value,
            delay,
        } => {
            let id = match delay {
                Some(delay) => {
                    airlock
                        .create_transaction_with_delay(caller, *destination, *value, *delay)
                        .await?
                }
                None => airlock.create_transaction(caller, *destination, *value).await?,
            };
            json!({ "id": id })
        }
        Call::ReverseTransaction { id } => payout_json(airlock.reverse_transaction(caller, *id).await?),
        Call::FinishTransaction { id } => payout_json(airlock.finish_transaction(caller, *id).await?),
        Call::GetTransaction { id } => transaction_json(&airlock.get_transaction(caller, *id).await?),
        Call::MyTransactions => Value::Array(
            airlock
                .my_transactions(caller)
                .await
                .iter()
                .map(transaction_json)
                .collect(),
        ),
        Call::MyTransactionIds => {
            let ids = airlock.my_transaction_ids(caller).await;
            json!({ "outgoing": ids.outgoing, "incoming": ids.incoming })
        }
        Call::SetFee { fee } => {
            airlock.set_fee(caller, *fee).await?;
            Value::Null
        }
        Call::SetDelay { delay } => {
            airlock.set_delay(caller, *delay).await?;
            Value::Null
        }
        Call::GetDevMoney => json!(airlock.get_dev_money(caller).await?.to_string()),
        Call::RetrieveDevMoney { amount } => {
            payout_json(airlock.retrieve_dev_money(caller, *amount).await?)
        }
        Call::Receive { value } => {
            airlock.receive(caller, *value).await?;
            Value::Null
        }
        Call::ChangeDev { new_dev } => {
            airlock.change_dev(caller, *new_dev).await?;
            Value::Null
        }
        Call::SetNextVersion { successor } => {
            airlock.set_next_version(caller, *successor).await?;
            Value::Null
        }
        Call::SetBroken => {
            airlock.set_broken(caller).await?;
            Value::Null
        }
    };
    Ok(value)
}

// Amounts are printed as strings; u128 does not fit every JSON reader.
fn payout_json(payout: airlock_engine::Payout) -> Value {
    json!({ "to": payout.to, "amount": payout.amount.to_string() })
}

fn transaction_json(tx: &airlock_engine::Transaction) -> Value {
    json!({
        "id": tx.id,
        "origin": tx.origin,
        "destination": tx.destination,
        "maturity": tx.maturity,
        "amount": tx.amount.to_string(),
        "paid": tx.paid,
        "reversed": tx.reversed,
    })
}

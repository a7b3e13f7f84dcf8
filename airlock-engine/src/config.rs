//! Configuration for a new ledger instance

use crate::EscrowResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default per-transaction fee (10^15 smallest units)
pub const DEFAULT_FEE: u64 = 1_000_000_000_000_000;

/// Default maturity delay in seconds (one day)
pub const DEFAULT_DELAY_SECS: u64 = 86_400;

/// Initial fee and delay; the dev setters change them afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirlockConfig {
    /// Fee skimmed into the treasury on every deposit
    pub fee: u64,
    /// Seconds between creation and maturity
    pub delay: u64,
}

impl Default for AirlockConfig {
    fn default() -> Self {
        Self {
            fee: DEFAULT_FEE,
            delay: DEFAULT_DELAY_SECS,
        }
    }
}

impl AirlockConfig {
    /// Layer defaults, an optional file and `AIRLOCK_*` environment variables
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("AIRLOCK").try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

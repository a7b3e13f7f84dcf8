//! Circuit breaker - one-way halt on new deposits

use crate::{access::AccessControl, error::EscrowError, models::Address, EscrowResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    broken: bool,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Engage the breaker. There is no way back; repeating it is a no-op.
    pub fn set_broken(&mut self, access: &AccessControl, caller: Address) -> EscrowResult<()> {
        access.ensure_dev(caller, "setBroken")?;
        self.broken = true;
        Ok(())
    }

    /// Admission gate for new deposits
    pub fn ensure_operational(&self) -> EscrowResult<()> {
        if self.broken {
            Err(EscrowError::Broken)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_broken_is_idempotent_and_dev_only() {
        let owner = Address::repeat_byte(1);
        let access = AccessControl::new(owner);
        let mut breaker = CircuitBreaker::new();
        assert!(breaker.ensure_operational().is_ok());

        assert!(matches!(
            breaker.set_broken(&access, Address::repeat_byte(2)),
            Err(EscrowError::Unauthorized(_))
        ));
        assert!(!breaker.is_broken());

        breaker.set_broken(&access, owner).unwrap();
        breaker.set_broken(&access, owner).unwrap();
        assert!(breaker.is_broken());
        assert!(matches!(breaker.ensure_operational(), Err(EscrowError::Broken)));
    }
}

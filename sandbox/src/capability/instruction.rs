//! `instruction_counter`: the guest's self-reported gas channel.

use tracing::trace;

use super::{Bridge, BridgeError};
use crate::governor::Breach;

/// Largest amount accepted by a single `incr`.
pub const MAX_INCR: f64 = 2_147_483_648.0; // 2^31, exclusive

/// Instruction counter bound to one sandbox.
#[derive(Debug, Clone, Copy)]
pub struct InstructionCounter<'a> {
    bridge: &'a Bridge,
}

impl<'a> InstructionCounter<'a> {
    pub(super) fn new(bridge: &'a Bridge) -> Self {
        Self { bridge }
    }

    /// Charge `n` and return the new total.
    ///
    /// `n` must be a finite non-negative integer below 2^31.
    pub fn incr(&self, n: f64) -> Result<u64, BridgeError> {
        if !n.is_finite() || n < 0.0 || n.fract() != 0.0 || n >= MAX_INCR {
            return Err(BridgeError::InvalidArgument(format!(
                "instruction_counter.incr: expected a non-negative integer below 2^31, got {}",
                n
            )));
        }
        self.bridge.check_running()?;
        let amount = n as u64;
        trace!(sandbox = %self.bridge.id(), amount, "instruction counter");
        self.bridge
            .governor()
            .charge(amount)
            .map_err(|_| BridgeError::Halted(Breach::Gas))
    }

    pub fn count(&self) -> u64 {
        self.bridge.governor().gas_used()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gasvm_hostapi::MemLedger;

    use crate::capability::tests::bridge_with;
    use crate::capability::BridgeError;
    use crate::governor::Breach;

    #[test]
    fn test_incr_accumulates() {
        let bridge = bridge_with(Arc::new(MemLedger::default()), 1_000);
        let counter = bridge.instructions();
        assert_eq!(counter.incr(10.0).unwrap(), 10);
        assert_eq!(counter.incr(0.0).unwrap(), 10);
        assert_eq!(counter.incr(32.0).unwrap(), 42);
        assert_eq!(counter.count(), 42);
    }

    #[test]
    fn test_incr_rejects_bad_amounts() {
        let bridge = bridge_with(Arc::new(MemLedger::default()), 1_000);
        let counter = bridge.instructions();
        for bad in [-1.0, 1.5, f64::NAN, f64::INFINITY, 2_147_483_648.0] {
            assert!(counter.incr(bad).unwrap_err().is_invalid_argument(), "{bad}");
        }
        assert_eq!(counter.incr(2_147_483_647.0).unwrap_err(), BridgeError::Halted(Breach::Gas));
        assert_eq!(counter.count(), 2_147_483_647);
    }

    #[test]
    fn test_incr_refused_after_breach() {
        let bridge = bridge_with(Arc::new(MemLedger::default()), 5);
        let counter = bridge.instructions();
        assert!(counter.incr(6.0).is_err());
        assert!(counter.incr(1.0).is_err());
        assert_eq!(counter.count(), 6);
    }
}

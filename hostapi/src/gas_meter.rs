//! Fail-closed gas meter shared between the guest worker and its supervisor.
//!
//! The worker thread charges; the supervising thread only reads. Every field
//! is atomic so the supervisor observes charges without locking the worker.
//!
//! Unlike a plain counter, the meter latches once the budget is breached:
//! the breaching charge is recorded, every later charge is refused and not
//! added, and an overflowing charge saturates instead of wrapping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::HostError;

/// Gas meter with a mutable limit and a latching exhaustion flag.
#[derive(Debug, Default)]
pub struct GasMeter {
    limit: AtomicU64,
    consumed: AtomicU64,
    exhausted: AtomicBool,
}

impl GasMeter {
    /// Create a new gas meter with the given limit.
    pub fn new(limit: u64) -> Self {
        Self {
            limit: AtomicU64::new(limit),
            consumed: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Zero the counter, clear the latch, and install a new limit.
    pub fn reset(&self, limit: u64) {
        self.limit.store(limit, Ordering::SeqCst);
        self.consumed.store(0, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
    }

    /// Charge gas and return the new total.
    ///
    /// Returns `Err(OutOfGas)` when this charge breaches the limit (the
    /// charge is still recorded), when the meter was already exhausted (the
    /// charge is refused), or when the sum would overflow (the counter
    /// saturates at `u64::MAX`).
    pub fn charge(&self, amount: u64) -> Result<u64, HostError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(HostError::OutOfGas);
        }
        let limit = self.limit.load(Ordering::SeqCst);
        let mut current = self.consumed.load(Ordering::SeqCst);
        loop {
            let (next, overflow) = match current.checked_add(amount) {
                Some(v) => (v, false),
                None => (u64::MAX, true),
            };
            match self.consumed.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if overflow || next > limit {
                        self.exhausted.store(true, Ordering::SeqCst);
                        return Err(HostError::OutOfGas);
                    }
                    return Ok(next);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the total gas consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Returns the remaining gas before the limit is reached.
    pub fn remaining(&self) -> u64 {
        self.limit().saturating_sub(self.consumed())
    }

    /// Returns the gas limit.
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::SeqCst)
    }

    /// Returns true once a charge has breached the limit or overflowed.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }
}

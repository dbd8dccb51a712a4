//! Gas and memory governor.
//!
//! Wraps the host-side [`GasMeter`] with the memory ceiling and the heap
//! samples published by the engine. The worker charges and records; the
//! supervisor polls `over_gas`/`over_memory`, which only load atomics.
//!
//! A breach found while charging or sampling also posts
//! [`RunEvent::Breach`] to the supervisor so it need not wait for the next
//! poll tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use gasvm_hostapi::{GasMeter, HostError};

use crate::controller::RunEvent;
use crate::engine::AllocatorGauge;
use crate::value::{ErrorKind, Resource};

/// Why the supervisor stopped (or would stop) a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Breach {
    Gas,
    Memory,
    Deadline,
}

impl Breach {
    pub fn message(self) -> &'static str {
        match self {
            Self::Gas => "out of gas",
            Self::Memory => "out of memory",
            Self::Deadline => "execution killed: deadline exceeded",
        }
    }

    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::Gas => ErrorKind::ResourceExceeded(Resource::Gas),
            Self::Memory => ErrorKind::ResourceExceeded(Resource::Memory),
            Self::Deadline => ErrorKind::DeadlineExceeded,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Gas => 1,
            Self::Memory => 2,
            Self::Deadline => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Gas),
            2 => Some(Self::Memory),
            3 => Some(Self::Deadline),
            _ => None,
        }
    }
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Per-sandbox cost counter and memory ceiling.
#[derive(Debug)]
pub struct Governor {
    meter: GasMeter,
    mem_limit: AtomicU64,
    heap: AtomicU64,
    gauge: Arc<AllocatorGauge>,
    charges: AtomicU64,
    check_interval: AtomicU64,
    probe_due: AtomicBool,
    memory_latch: AtomicBool,
    halted: AtomicU8,
    alarm: Mutex<Option<Sender<RunEvent>>>,
}

impl Governor {
    pub fn new(gauge: Arc<AllocatorGauge>, gas_limit: u64, mem_limit: u64, check_interval: u64) -> Self {
        Self {
            meter: GasMeter::new(gas_limit),
            mem_limit: AtomicU64::new(mem_limit),
            heap: AtomicU64::new(0),
            gauge,
            charges: AtomicU64::new(0),
            check_interval: AtomicU64::new(check_interval.max(1)),
            probe_due: AtomicBool::new(false),
            memory_latch: AtomicBool::new(false),
            halted: AtomicU8::new(0),
            alarm: Mutex::new(None),
        }
    }

    /// Start a new execution: zero gas, clear latches, rebase the gauge.
    pub fn reset(&self, gas_limit: u64, mem_limit: u64, check_interval: u64) {
        self.meter.reset(gas_limit);
        self.mem_limit.store(mem_limit, Ordering::SeqCst);
        self.heap.store(0, Ordering::SeqCst);
        self.gauge.rebase();
        self.charges.store(0, Ordering::SeqCst);
        self.check_interval.store(check_interval.max(1), Ordering::SeqCst);
        self.probe_due.store(false, Ordering::SeqCst);
        self.memory_latch.store(false, Ordering::SeqCst);
        self.halted.store(0, Ordering::SeqCst);
    }

    /// Add `amount` to gas used.
    ///
    /// Every `check_interval`-th call flags a heap sample as due.
    pub fn charge(&self, amount: u64) -> Result<u64, HostError> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.check_interval.load(Ordering::SeqCst) == 0 {
            self.probe_due.store(true, Ordering::SeqCst);
        }
        let result = self.meter.charge(amount);
        if result.is_err() {
            self.raise_alarm();
        }
        result
    }

    /// Returns true once, after a heap sample became due.
    pub fn take_probe_due(&self) -> bool {
        self.probe_due.swap(false, Ordering::SeqCst)
    }

    /// Publish an engine heap sample.
    ///
    /// Returns false (and latches `over_memory`) when the sample plus the
    /// allocator high-water exceeds the ceiling, or once already latched.
    pub fn record_heap(&self, bytes: u64) -> bool {
        if self.memory_latch.load(Ordering::SeqCst) {
            return false;
        }
        if bytes.saturating_add(self.gauge.peak()) > self.mem_limit() {
            self.latch_memory();
            return false;
        }
        self.heap.store(bytes, Ordering::SeqCst);
        true
    }

    /// Publish an allocator reading into the instance high-water gauge.
    pub fn record_allocator(&self, bytes: u64) {
        self.gauge.record(bytes);
        if self.over_memory() {
            self.latch_memory();
        }
    }

    fn latch_memory(&self) {
        if !self.memory_latch.swap(true, Ordering::SeqCst) {
            self.raise_alarm();
        }
    }

    pub fn over_gas(&self) -> bool {
        self.meter.is_exhausted() || self.meter.consumed() > self.meter.limit()
    }

    pub fn over_memory(&self) -> bool {
        self.memory_latch.load(Ordering::SeqCst)
            || self.heap_bytes().saturating_add(self.gauge.peak()) > self.mem_limit()
    }

    /// The first breach that applies, gas before memory.
    pub fn breach(&self) -> Option<Breach> {
        if self.over_gas() {
            Some(Breach::Gas)
        } else if self.over_memory() {
            Some(Breach::Memory)
        } else {
            None
        }
    }

    /// Record that the supervisor killed the run.
    pub fn halt(&self, reason: Breach) {
        let _ = self
            .halted
            .compare_exchange(0, reason.code(), Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Why host calls must be refused, if they must.
    pub fn halt_reason(&self) -> Option<Breach> {
        Breach::from_code(self.halted.load(Ordering::SeqCst)).or_else(|| self.breach())
    }

    pub(crate) fn arm(&self, alarm: Sender<RunEvent>) {
        *self.alarm.lock().unwrap_or_else(PoisonError::into_inner) = Some(alarm);
    }

    pub(crate) fn disarm(&self) {
        self.alarm.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn raise_alarm(&self) {
        let alarm = self.alarm.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = alarm.as_ref() {
            let _ = tx.send(RunEvent::Breach);
        }
    }

    pub fn gas_used(&self) -> u64 {
        self.meter.consumed()
    }

    pub fn gas_limit(&self) -> u64 {
        self.meter.limit()
    }

    pub fn remaining(&self) -> u64 {
        self.meter.remaining()
    }

    pub fn mem_limit(&self) -> u64 {
        self.mem_limit.load(Ordering::SeqCst)
    }

    pub fn heap_bytes(&self) -> u64 {
        self.heap.load(Ordering::SeqCst)
    }

    pub fn allocator_peak(&self) -> u64 {
        self.gauge.peak()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn governor(gas_limit: u64, mem_limit: u64) -> Governor {
        Governor::new(Arc::new(AllocatorGauge::default()), gas_limit, mem_limit, 10)
    }

    #[test]
    fn test_gas_limit_zero_breaches_on_first_charge() {
        let gov = governor(0, 1000);
        assert!(!gov.over_gas());
        assert!(gov.charge(7).is_err());
        assert!(gov.over_gas());
        assert_eq!(gov.gas_used(), 7);
        assert_eq!(gov.breach(), Some(Breach::Gas));
    }

    #[test]
    fn test_queries_do_not_mutate() {
        let gov = governor(100, 1000);
        gov.charge(40).unwrap();
        for _ in 0..3 {
            assert!(!gov.over_gas());
            assert!(!gov.over_memory());
            assert_eq!(gov.gas_used(), 40);
            assert_eq!(gov.remaining(), 60);
        }
    }

    #[test]
    fn test_probe_due_every_interval() {
        let gov = Governor::new(Arc::new(AllocatorGauge::default()), 1000, 1000, 3);
        gov.charge(1).unwrap();
        gov.charge(1).unwrap();
        assert!(!gov.take_probe_due());
        gov.charge(1).unwrap();
        assert!(gov.take_probe_due());
        assert!(!gov.take_probe_due(), "flag is consumed");
    }

    #[test]
    fn test_heap_over_limit_latches() {
        let gov = governor(1000, 1000);
        assert!(gov.record_heap(600));
        assert!(!gov.over_memory());
        assert!(!gov.record_heap(2000));
        assert!(gov.over_memory());
        // A later small sample does not clear the latch.
        assert!(!gov.record_heap(10));
        assert!(gov.over_memory());
    }

    #[test]
    fn test_heap_and_allocator_are_combined() {
        let gov = governor(1000, 1000);
        gov.record_heap(600);
        gov.record_allocator(300);
        assert!(!gov.over_memory());
        gov.record_allocator(500);
        assert!(gov.over_memory());
    }

    #[test]
    fn test_reset_clears_everything() {
        let gauge = Arc::new(AllocatorGauge::default());
        let gov = Governor::new(gauge.clone(), 10, 100, 10);
        gov.charge(50).unwrap_err();
        gov.record_heap(500);
        gov.halt(Breach::Deadline);

        gov.reset(20, 200, 10);
        assert_eq!(gov.gas_used(), 0);
        assert_eq!(gov.gas_limit(), 20);
        assert_eq!(gov.mem_limit(), 200);
        assert!(!gov.over_gas());
        assert!(!gov.over_memory());
        assert_eq!(gov.halt_reason(), None);
        assert_eq!(gauge.peak(), 0);
    }

    #[test]
    fn test_halt_reason_prefers_recorded_kill() {
        let gov = governor(10, 100);
        gov.halt(Breach::Deadline);
        gov.charge(50).unwrap_err();
        assert_eq!(gov.halt_reason(), Some(Breach::Deadline));
    }

    #[test]
    fn test_breach_raises_alarm_once_armed() {
        let gov = governor(10, 100);
        let (tx, rx) = mpsc::channel();
        gov.charge(5).unwrap();
        gov.arm(tx);
        assert!(rx.try_recv().is_err());
        gov.charge(50).unwrap_err();
        assert!(matches!(rx.try_recv(), Ok(RunEvent::Breach)));
        gov.disarm();
    }

    #[test]
    fn test_messages() {
        assert_eq!(Breach::Gas.to_string(), "out of gas");
        assert_eq!(Breach::Memory.to_string(), "out of memory");
        assert_eq!(
            Breach::Deadline.to_string(),
            "execution killed: deadline exceeded"
        );
    }
}

//! The seam between the controller and an embedded script engine.
//!
//! A [`ScriptEngine`] is one engine runtime (an [`EngineInstance`]'s payload).
//! It creates one [`GuestContext`] per sandbox. The controller only ever
//! compiles, runs, and interrupts through these traits.
//!
//! [`EngineInstance`]: crate::EngineInstance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::capability::Bridge;
use crate::config::EngineConfig;
use crate::diagnostic::Diagnostic;
use crate::error::SandboxError;
use crate::process::StartupSnapshot;

/// An embedded engine runtime.
pub trait ScriptEngine: Sized + Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Whether guest source must be UTF-8 text.
    const TEXT_SOURCE: bool;

    type Context: GuestContext;

    fn new(snapshot: &StartupSnapshot, config: &EngineConfig) -> Result<Self, SandboxError>;

    /// Create an isolated context whose host calls go through `bridge`.
    fn new_context(&self, bridge: Arc<Bridge>) -> Result<Self::Context, SandboxError>;

    /// Allocator high-water gauge shared by every context of this runtime.
    fn allocator_gauge(&self) -> Arc<AllocatorGauge>;
}

/// One isolated execution context.
///
/// `compile` and `run` are called on the worker thread; `interrupt` is called
/// from the supervisor while `run` is in progress.
pub trait GuestContext: Send + Sync {
    type Script: Send;

    fn compile(&self, tag: &str, source: &[u8]) -> Result<Self::Script, GuestFailure>;

    fn run(&self, script: Self::Script, ticket: RunTicket) -> Result<GuestValue, GuestFailure>;

    /// Ask the engine to stop the run identified by `ticket` at its next
    /// checkpoint. Stale tickets are ignored.
    fn interrupt(&self, ticket: RunTicket);
}

/// A value produced by guest code, already converted to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestValue {
    pub data: String,
    pub is_json: bool,
}

impl GuestValue {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            is_json: false,
        }
    }

    pub fn json(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            is_json: true,
        }
    }
}

/// Why a compile or run did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestFailure {
    Compile(Diagnostic),
    Exception(Diagnostic),
    /// The engine's own allocator ceiling was hit.
    OutOfMemory,
    /// The run was stopped by [`GuestContext::interrupt`].
    Interrupted,
    Internal(String),
}

/// Unique id of one execution, used to target interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunTicket(u64);

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

impl RunTicket {
    pub fn next() -> Self {
        Self(NEXT_TICKET.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Interrupt flag polled by an engine's checkpoint hook.
///
/// The hook fires only when the ticket currently running equals the ticket
/// most recently killed, so a kill aimed at a finished run cannot stop the
/// next one.
#[derive(Debug, Default)]
pub struct InterruptSignal {
    running: AtomicU64,
    killed: AtomicU64,
}

impl InterruptSignal {
    /// Mark `ticket` as running until the guard drops.
    pub fn enter(&self, ticket: RunTicket) -> RunGuard<'_> {
        self.running.store(ticket.0, Ordering::SeqCst);
        RunGuard { signal: self }
    }

    pub fn kill(&self, ticket: RunTicket) {
        self.killed.store(ticket.0, Ordering::SeqCst);
    }

    pub fn is_killed(&self, ticket: RunTicket) -> bool {
        self.killed.load(Ordering::SeqCst) == ticket.0
    }

    /// Called from the engine's checkpoint hook.
    pub fn should_interrupt(&self) -> bool {
        let running = self.running.load(Ordering::SeqCst);
        running != 0 && self.killed.load(Ordering::SeqCst) == running
    }
}

/// Clears the running ticket on drop.
#[derive(Debug)]
pub struct RunGuard<'a> {
    signal: &'a InterruptSignal,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.signal.running.store(0, Ordering::SeqCst);
    }
}

/// High-water mark of an engine runtime's allocator.
///
/// Shared by every sandbox on one instance, so under concurrent use it is an
/// upper bound rather than a per-sandbox figure.
#[derive(Debug, Default)]
pub struct AllocatorGauge {
    peak: AtomicU64,
}

impl AllocatorGauge {
    pub fn record(&self, bytes: u64) {
        self.peak.fetch_max(bytes, Ordering::SeqCst);
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    /// Start a new measurement window.
    pub fn rebase(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_are_unique() {
        let a = RunTicket::next();
        let b = RunTicket::next();
        assert_ne!(a, b);
        assert_ne!(a.get(), 0);
    }

    #[test]
    fn test_interrupt_only_hits_running_ticket() {
        let signal = InterruptSignal::default();
        let first = RunTicket::next();
        let second = RunTicket::next();

        signal.kill(first);
        assert!(!signal.should_interrupt(), "nothing running yet");

        {
            let _guard = signal.enter(second);
            assert!(!signal.should_interrupt(), "stale kill must not hit a new run");
            signal.kill(second);
            assert!(signal.should_interrupt());
        }
        assert!(!signal.should_interrupt(), "guard cleared the running ticket");
        assert!(signal.is_killed(second));
    }

    #[test]
    fn test_gauge_keeps_peak_until_rebased() {
        let gauge = AllocatorGauge::default();
        gauge.record(10);
        gauge.record(4);
        assert_eq!(gauge.peak(), 10);
        gauge.rebase();
        assert_eq!(gauge.peak(), 0);
    }
}

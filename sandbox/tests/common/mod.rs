//! Shared test helpers for integration tests.
//!
//! One `EngineProcess` per test binary, fresh engine instances per test, and
//! sandbox factories over an in-memory ledger.

#![allow(dead_code)]

use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

use gasvm_hostapi::{CostTable, HostBindings, MemLedger};
use gasvm_sandbox::{
    Deadline, EngineConfig, EngineInstance, EngineProcess, QuickJs, Sandbox, ScriptEngine,
    ValueTuple, Wasm,
};
use tracing_subscriber::EnvFilter;

/// Contract name the test ledgers execute as.
pub const CONTRACT: &str = "token";

/// Gas limit large enough for any test script that is not about gas.
pub const AMPLE_GAS: u64 = 10_000_000;

static PROCESS: OnceLock<EngineProcess> = OnceLock::new();
static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The process handle shared by every test in this binary.
pub fn process() -> &'static EngineProcess {
    init_tracing();
    PROCESS.get_or_init(|| EngineProcess::initialize().expect("engine process initializes"))
}

// ── Engine instances ──

pub fn instance<E: ScriptEngine>(config: EngineConfig) -> EngineInstance<'static, E> {
    let process = process();
    process
        .new_engine_instance::<E>(process.startup_snapshot(), config)
        .expect("engine instance")
}

pub fn quickjs() -> EngineInstance<'static, QuickJs> {
    instance(EngineConfig::default())
}

pub fn wasm() -> EngineInstance<'static, Wasm> {
    instance(EngineConfig::default())
}

// ── Ledgers ──

pub fn ledger() -> Arc<MemLedger> {
    Arc::new(MemLedger::new(CONTRACT))
}

/// A ledger where every call costs exactly `price`.
pub fn flat_ledger(price: u64) -> Arc<MemLedger> {
    Arc::new(MemLedger::new(CONTRACT).with_costs(CostTable::flat(price)))
}

// ── Sandboxes ──

pub fn sandbox<'i, E: ScriptEngine>(
    instance: &'i EngineInstance<'static, E>,
    ledger: &Arc<MemLedger>,
    gas_limit: u64,
) -> Sandbox<'i, E> {
    let mut sandbox =
        Sandbox::create(instance, HostBindings::with_ledger(ledger.clone())).expect("sandbox");
    sandbox.set_gas_limit(gas_limit);
    sandbox
}

pub fn far_deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

/// Run `source` in a fresh QuickJS sandbox over `ledger`.
pub fn run_js_with(ledger: &Arc<MemLedger>, source: &str, gas_limit: u64) -> ValueTuple {
    let instance = quickjs();
    let mut sandbox = sandbox(&instance, ledger, gas_limit);
    sandbox.execute(source, far_deadline())
}

/// Run `source` in a fresh QuickJS sandbox with ample gas.
pub fn run_js(source: &str) -> ValueTuple {
    run_js_with(&ledger(), source, AMPLE_GAS)
}

/// Run a WAT module in a fresh Wasm sandbox over `ledger`.
pub fn run_wat_with(ledger: &Arc<MemLedger>, wat: &str, gas_limit: u64) -> ValueTuple {
    let instance = wasm();
    let mut sandbox = sandbox(&instance, ledger, gas_limit);
    sandbox.execute(wat, far_deadline())
}

pub fn run_wat(wat: &str) -> ValueTuple {
    run_wat_with(&ledger(), wat, AMPLE_GAS)
}

/// Assert the run completed and return its value.
#[track_caller]
pub fn expect_value(result: &ValueTuple) -> String {
    match result.value() {
        Some(value) => value.to_string(),
        None => panic!(
            "expected a value, got {:?}: {}",
            result.error_kind(),
            result.error().unwrap_or_default()
        ),
    }
}

/// Assert the run failed and return its error text.
#[track_caller]
pub fn expect_error(result: &ValueTuple) -> String {
    match result.error() {
        Some(error) => error.to_string(),
        None => panic!("expected an error, got value {:?}", result.value()),
    }
}

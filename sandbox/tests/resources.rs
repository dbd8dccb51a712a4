//! Resource enforcement integration tests.
//!
//! Memory ceilings and wall-clock deadlines on both backends, and recovery of
//! a sandbox after its run was killed.

mod common;

use std::time::{Duration, Instant};

use gasvm_sandbox::{Deadline, ErrorKind, Resource};

use common::*;

const SPIN_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "main") (result i32)
        (loop $spin (br $spin))
        (i32.const 0)))
"#;

// ── Test: an allocating loop hits the memory ceiling ──

#[test]
fn test_js_memory_ceiling_kills() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);
    sandbox.set_mem_limit(8 * 1024 * 1024);

    let source = r#"
        var hoard = [];
        while (true) {
            hoard.push('x'.repeat(4096) + hoard.length);
        }
    "#;
    let result = sandbox.execute(source, far_deadline());

    assert_eq!(
        result.error_kind(),
        Some(ErrorKind::ResourceExceeded(Resource::Memory))
    );
    assert_eq!(result.error(), Some("out of memory"));
}

// ── Test: a retained object graph hits the ceiling and the sandbox recovers ──

#[test]
fn test_js_object_graph_ceiling_then_recovers() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);
    sandbox.set_mem_limit(20_000_000);

    let source = "var hoard = [];\nfor (var i = 0; i < 10000000; i++) { hoard.push({ x: i }); }\nhoard.length";
    for _ in 0..2 {
        let result = sandbox.execute(source, far_deadline());
        assert_eq!(
            result.error_kind(),
            Some(ErrorKind::ResourceExceeded(Resource::Memory))
        );
        assert_eq!(result.error(), Some("out of memory"));
    }

    // The hoard is gone; capabilities still work.
    let after = sandbox.execute("storage.put('k', 'v'); typeof hoard", far_deadline());
    assert_eq!(expect_value(&after), "undefined");
    assert_eq!(ledger.value(CONTRACT, b"k"), Some(b"v".to_vec()));
    assert_eq!(expect_value(&sandbox.execute("'after'", far_deadline())), "after");
}

// ── Test: one oversized allocation is out of memory, not an exception ──

#[test]
fn test_js_single_large_allocation() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);
    sandbox.set_mem_limit(4 * 1024 * 1024);

    let result = sandbox.execute("var big = 'x'.repeat(64 * 1024 * 1024); big.length", far_deadline());
    assert_eq!(
        result.error_kind(),
        Some(ErrorKind::ResourceExceeded(Resource::Memory))
    );
    assert_eq!(expect_value(&sandbox.execute("1 + 1", far_deadline())), "2");
}

// ── Test: modest allocations stay under the ceiling ──

#[test]
fn test_js_memory_under_ceiling() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);
    sandbox.set_mem_limit(64 * 1024 * 1024);

    let source = r#"
        var parts = [];
        for (var i = 0; i < 1000; i++) { parts.push('item' + i); }
        parts.length
    "#;
    assert_eq!(expect_value(&sandbox.execute(source, far_deadline())), "1000");
}

// ── Test: an infinite loop is killed at the deadline ──

#[test]
fn test_js_infinite_loop_deadline() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);

    let started = Instant::now();
    let result = sandbox.execute("while (true) {}", Deadline::after(Duration::from_millis(100)));
    let elapsed = started.elapsed();

    assert_eq!(result.error_kind(), Some(ErrorKind::DeadlineExceeded));
    assert_eq!(result.error(), Some("execution killed: deadline exceeded"));
    assert_eq!(result.gas_used(), 0);
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

// ── Test: catching inside the loop does not survive the kill ──

#[test]
fn test_js_kill_is_not_catchable() {
    let source = r#"
        while (true) {
            try { while (true) {} } catch (e) {}
        }
    "#;
    let instance = quickjs();
    let mut sandbox = sandbox(&instance, &ledger(), AMPLE_GAS);
    let result = sandbox.execute(source, Deadline::after(Duration::from_millis(50)));
    assert_eq!(result.error_kind(), Some(ErrorKind::DeadlineExceeded));
}

// ── Test: a killed sandbox keeps working ──

#[test]
fn test_sandbox_usable_after_kill() {
    let instance = quickjs();
    let ledger = ledger();
    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);

    let killed = sandbox.execute(
        "storage.put('before', '1'); while (true) {}",
        Deadline::after(Duration::from_millis(50)),
    );
    assert_eq!(killed.error_kind(), Some(ErrorKind::DeadlineExceeded));
    assert!(killed.gas_used() > 0);
    // Host effects made before the kill stay.
    assert_eq!(ledger.value(CONTRACT, b"before"), Some(b"1".to_vec()));

    let next = sandbox.execute("storage.get('before')", far_deadline());
    assert_eq!(expect_value(&next), "1");
}

// ── Test: gas kill of a loop that charges ──

#[test]
fn test_js_charging_loop_runs_out_of_gas() {
    let result = run_js_with(
        &ledger(),
        "while (true) { instruction_counter.incr(1000); }",
        1_000_000,
    );
    assert_eq!(
        result.error_kind(),
        Some(ErrorKind::ResourceExceeded(Resource::Gas))
    );
    assert!(result.gas_used() > 1_000_000);
}

// ── Test: Wasm infinite loop is killed at the deadline ──

#[test]
fn test_wasm_infinite_loop_deadline() {
    let instance = wasm();
    let mut sandbox = sandbox(&instance, &ledger(), AMPLE_GAS);

    let result = sandbox.execute(SPIN_WAT, Deadline::after(Duration::from_millis(100)));
    assert_eq!(result.error_kind(), Some(ErrorKind::DeadlineExceeded));

    // The same sandbox runs the next module normally.
    let next = sandbox.execute(
        r#"(module (memory (export "memory") 1) (func (export "main") (result i32) (i32.const 9)))"#,
        far_deadline(),
    );
    assert_eq!(expect_value(&next), "9");
}

// ── Test: Wasm growth past the page ceiling is refused ──

#[test]
fn test_wasm_grow_past_page_ceiling_fails() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func (export "main") (result i32)
            (memory.grow (i32.const 5000))))
    "#;
    let result = run_wat(wat);
    assert_eq!(expect_value(&result), "-1");
}

// ── Test: Wasm growth past the sandbox ceiling kills the run ──

#[test]
fn test_wasm_grow_past_mem_limit_kills() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func (export "main") (result i32)
            (drop (memory.grow (i32.const 100)))
            (i32.const 1)))
    "#;
    let instance = wasm();
    let mut sandbox = sandbox(&instance, &ledger(), AMPLE_GAS);
    sandbox.set_mem_limit(1024 * 1024);

    let result = sandbox.execute(wat, far_deadline());
    assert_eq!(
        result.error_kind(),
        Some(ErrorKind::ResourceExceeded(Resource::Memory))
    );
}

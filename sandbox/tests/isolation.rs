//! Isolation integration tests.
//!
//! Sandboxes do not see each other, guests cannot generate code from
//! strings, and process-wide state is initialized once.

mod common;

use std::thread;

use gasvm_sandbox::{EngineProcess, ErrorKind, SandboxError};

use common::*;

// ── Test: globals do not leak between sandboxes ──

#[test]
fn test_sandboxes_do_not_share_globals() {
    let instance = quickjs();
    let ledger = ledger();
    let mut first = sandbox(&instance, &ledger, AMPLE_GAS);
    let mut second = sandbox(&instance, &ledger, AMPLE_GAS);

    assert_eq!(
        expect_value(&first.execute("var secret = 'a'; secret", far_deadline())),
        "a"
    );
    assert_eq!(
        expect_value(&second.execute("typeof secret", far_deadline())),
        "undefined"
    );
    assert_eq!(expect_value(&first.execute("secret", far_deadline())), "a");
}

// ── Test: sandboxes have distinct ids ──

#[test]
fn test_sandbox_ids_are_unique() {
    let instance = quickjs();
    let ledger = ledger();
    let first = sandbox(&instance, &ledger, AMPLE_GAS);
    let second = sandbox(&instance, &ledger, AMPLE_GAS);
    assert_ne!(first.id(), second.id());
}

// ── Test: destroying a sandbox leaves the instance usable ──

#[test]
fn test_destroy_releases_one_sandbox() {
    let instance = quickjs();
    let ledger = ledger();
    let mut kept = sandbox(&instance, &ledger, AMPLE_GAS);
    let mut doomed = sandbox(&instance, &ledger, AMPLE_GAS);
    assert_eq!(expect_value(&doomed.execute("var x = 1; x", far_deadline())), "1");
    assert_eq!(expect_value(&kept.execute("var x = 2; x", far_deadline())), "2");

    doomed.destroy();

    assert_eq!(expect_value(&kept.execute("x", far_deadline())), "2");
    let mut fresh = sandbox(&instance, &ledger, AMPLE_GAS);
    assert_eq!(expect_value(&fresh.execute("typeof x", far_deadline())), "undefined");
}

// ── Test: no string code generation ──

#[test]
fn test_eval_and_function_are_gone() {
    let source = r#"
        JSON.stringify([
            typeof eval,
            typeof Function,
            typeof (function () {}).constructor,
            typeof (() => 1).constructor,
            typeof _native_require,
            typeof _native_throw_site,
        ])
    "#;
    let result = run_js(source);
    assert_eq!(
        expect_value(&result),
        r#"["undefined","undefined","undefined","undefined","undefined","undefined"]"#
    );
}

// ── Test: reaching for the constructor fails ──

#[test]
fn test_function_constructor_is_unreachable() {
    let result = run_js("(function () {}).constructor('return 1')()");
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).contains("TypeError"));
}

// ── Test: guest code runs in strict mode ──

#[test]
fn test_strict_mode() {
    let source = r#"
        var name = '';
        try { undeclared = 1; } catch (e) { name = e.name; }
        name
    "#;
    assert_eq!(expect_value(&run_js(source)), "ReferenceError");
}

// ── Test: a failing sandbox does not disturb its neighbour ──

#[test]
fn test_host_failures_stay_in_their_sandbox() {
    let instance = quickjs();
    let ledger = ledger();
    let mut failing = sandbox(&instance, &ledger, AMPLE_GAS);
    let mut healthy = sandbox(&instance, &ledger, AMPLE_GAS);

    let failed = failing.execute("blockchain.call('nobody', 'x', '[]')", far_deadline());
    assert_eq!(failed.error_kind(), Some(ErrorKind::GuestException));

    let ok = healthy.execute("storage.put('k', 'v'); storage.get('k')", far_deadline());
    assert_eq!(expect_value(&ok), "v");
}

// ── Test: instances on separate threads run independently ──

#[test]
fn test_parallel_instances() {
    let results: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                scope.spawn(move || {
                    let instance = quickjs();
                    let ledger = ledger();
                    let mut sandbox = sandbox(&instance, &ledger, AMPLE_GAS);
                    let source = format!(
                        "var total = 0; for (var i = 0; i < 1000; i++) {{ total += {n}; }} total"
                    );
                    expect_value(&sandbox.execute(source, far_deadline()))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results, vec!["0", "1000", "2000", "3000"]);
}

// ── Test: one process handle at a time ──

#[test]
fn test_process_initializes_once() {
    let _shared = process();
    assert!(matches!(
        EngineProcess::initialize(),
        Err(SandboxError::AlreadyInitialized)
    ));
}

// ── Test: both engines coexist in one process ──

#[test]
fn test_quickjs_and_wasm_side_by_side() {
    let js = run_js("'js'");
    let wasm = run_wat(
        r#"(module (memory (export "memory") 1) (func (export "main") (result i32) (i32.const 7)))"#,
    );
    assert_eq!(expect_value(&js), "js");
    assert_eq!(expect_value(&wasm), "7");
}

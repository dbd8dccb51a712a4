//! Wasm backend integration tests.
//!
//! Module validation, result passing, capability imports with
//! length-prefixed results, gas and guest exceptions.

mod common;

use gasvm_sandbox::{ErrorKind, Resource};

use common::*;

// ── Test: main's numeric return is the value ──

#[test]
fn test_main_return_value() {
    let result = run_wat(
        r#"(module (memory (export "memory") 1) (func (export "main") (result i32) (i32.const 42)))"#,
    );
    assert_eq!(result.value(), Some("42"));
    assert!(!result.is_json());
    assert_eq!(result.gas_used(), 0);
}

// ── Test: other numeric returns and no return ──

#[test]
fn test_main_return_types() {
    let cases = [
        ("(result i64) (i64.const -7)", "-7"),
        ("(result f64) (f64.const 1.5)", "1.5"),
        ("", ""),
    ];
    for (body, expected) in cases {
        let wat = format!(
            r#"(module (memory (export "memory") 1) (func (export "main") {body}))"#
        );
        assert_eq!(expect_value(&run_wat(&wat)), expected, "{body}");
    }
}

// ── Test: set_result and set_result_json ──

#[test]
fn test_set_result() {
    let text = r#"
        (module
          (import "env" "set_result" (func $set_result (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "hello")
          (func (export "main") (result i32)
            (call $set_result (i32.const 0) (i32.const 5))
            (i32.const 99)))
    "#;
    let result = run_wat(text);
    assert_eq!(result.value(), Some("hello"));
    assert!(!result.is_json());

    let json = r#"
        (module
          (import "env" "set_result_json" (func $set_result_json (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "{\"ok\":true}")
          (func (export "main")
            (call $set_result_json (i32.const 0) (i32.const 11))))
    "#;
    let result = run_wat(json);
    assert_eq!(result.value(), Some(r#"{"ok":true}"#));
    assert!(result.is_json());
}

// ── Test: malformed JSON results are exceptions ──

#[test]
fn test_set_result_json_rejects_bad_json() {
    let wat = r#"
        (module
          (import "env" "set_result_json" (func $set_result_json (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "{nope")
          (func (export "main")
            (call $set_result_json (i32.const 0) (i32.const 5))))
    "#;
    let result = run_wat(wat);
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).contains("invalid JSON"));
}

// ── Test: storage round trip through imports ──

#[test]
fn test_storage_imports() {
    let wat = r#"
        (module
          (import "storage" "put" (func $put (param i32 i32 i32 i32 i32 i32) (result i64)))
          (import "storage" "get" (func $get (param i32 i32 i32 i32) (result i64)))
          (import "env" "set_result" (func $set_result (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "greeting")
          (data (i32.const 16) "hello")
          (func (export "main")
            (local $ptr i32)
            (drop (call $put
              (i32.const 0) (i32.const 8)
              (i32.const 16) (i32.const 5)
              (i32.const 0) (i32.const 0)))
            (local.set $ptr (i32.wrap_i64
              (call $get (i32.const 0) (i32.const 8) (i32.const 0) (i32.const 0))))
            (call $set_result
              (i32.add (local.get $ptr) (i32.const 4))
              (i32.load (local.get $ptr)))))
    "#;
    let ledger = ledger();
    let result = run_wat_with(&ledger, wat, AMPLE_GAS);

    assert_eq!(expect_value(&result), "hello");
    assert_eq!(ledger.value(CONTRACT, b"greeting"), Some(b"hello".to_vec()));
    assert_eq!(
        result.gas_used(),
        gasvm_hostapi::gas::storage_put(8, 5) + gasvm_hostapi::gas::storage_get(8)
    );
}

// ── Test: missing keys and booleans encode as integers ──

#[test]
fn test_scalar_results() {
    let wat = r#"
        (module
          (import "storage" "get" (func $get (param i32 i32 i32 i32) (result i64)))
          (import "storage" "has" (func $has (param i32 i32 i32 i32) (result i64)))
          (memory (export "memory") 1)
          (data (i32.const 0) "absent")
          (func (export "main") (result i64)
            (i64.add
              (call $get (i32.const 0) (i32.const 6) (i32.const 0) (i32.const 0))
              (i64.mul
                (call $has (i32.const 0) (i32.const 6) (i32.const 0) (i32.const 0))
                (i64.const 10)))))
    "#;
    assert_eq!(expect_value(&run_wat(wat)), "-1");
}

// ── Test: JSON host results can be passed straight through ──

#[test]
fn test_block_info_import() {
    let wat = r#"
        (module
          (import "blockchain" "blockInfo" (func $info (result i64)))
          (import "env" "set_result_json" (func $json (param i32 i32)))
          (memory (export "memory") 1)
          (func (export "main")
            (local $ptr i32)
            (local.set $ptr (i32.wrap_i64 (call $info)))
            (call $json
              (i32.add (local.get $ptr) (i32.const 4))
              (i32.load (local.get $ptr)))))
    "#;
    let result = run_wat(wat);
    assert!(result.is_json());
    let info: serde_json::Value = serde_json::from_str(&expect_value(&result)).unwrap();
    assert_eq!(info["number"], 1);
}

// ── Test: env.throw is a guest exception ──

#[test]
fn test_env_throw() {
    let wat = r#"
        (module
          (import "env" "throw" (func $throw (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "insufficient balance")
          (func (export "main")
            (call $throw (i32.const 0) (i32.const 20))))
    "#;
    let result = run_wat(wat);
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).contains("insufficient balance"));
}

// ── Test: host errors trap with their message ──

#[test]
fn test_host_error_traps() {
    let wat = r#"
        (module
          (import "storage" "put" (func $put (param i32 i32 i32 i32 i32 i32) (result i64)))
          (memory (export "memory") 1)
          (func (export "main")
            (drop (call $put
              (i32.const 0) (i32.const 0)
              (i32.const 0) (i32.const 1)
              (i32.const 0) (i32.const 0)))))
    "#;
    let result = run_wat(wat);
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).contains("key is empty"));
}

// ── Test: out-of-bounds pointers are rejected ──

#[test]
fn test_out_of_bounds_argument() {
    let wat = r#"
        (module
          (import "env" "set_result" (func $set_result (param i32 i32)))
          (memory (export "memory") 1)
          (func (export "main")
            (call $set_result (i32.const 0x7fffff00) (i32.const 1024))))
    "#;
    let result = run_wat(wat);
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).contains("out of bounds"));
}

// ── Test: a plain trap is reported ──

#[test]
fn test_unreachable_trap() {
    let result = run_wat(r#"(module (memory (export "memory") 1) (func (export "main") unreachable))"#);
    assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
    assert!(expect_error(&result).starts_with("wasm trap"));
}

// ── Test: modules outside the guest ABI fail to compile ──

#[test]
fn test_validation_failures() {
    let cases = [
        r#"(module (func (export "main")))"#,
        r#"(module (memory (export "memory") 1))"#,
        r#"(module (memory (export "memory") 1) (func (export "main") (param i32)))"#,
        r#"(module
             (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
             (memory (export "memory") 1)
             (func (export "main")))"#,
        r#"(module
             (import "os" "exec" (func))
             (memory (export "memory") 1)
             (func (export "main")))"#,
        "(module (this is not wat",
    ];
    for wat in cases {
        let result = run_wat(wat);
        assert_eq!(result.error_kind(), Some(ErrorKind::Compile), "{wat}");
        assert_eq!(result.gas_used(), 0);
    }
}

// ── Test: wrong import signatures fail to link ──

#[test]
fn test_import_signature_mismatch() {
    let wat = r#"
        (module
          (import "storage" "get" (func $get (param i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "main")))
    "#;
    let result = run_wat(wat);
    assert_eq!(result.error_kind(), Some(ErrorKind::Compile));
}

// ── Test: instruction counting charges gas ──

#[test]
fn test_instruction_imports() {
    let wat = r#"
        (module
          (import "instruction" "incr" (func $incr (param i64) (result i64)))
          (import "instruction" "count" (func $count (result i64)))
          (memory (export "memory") 1)
          (func (export "main") (result i64)
            (drop (call $incr (i64.const 50)))
            (drop (call $incr (i64.const 25)))
            (call $count)))
    "#;
    let result = run_wat(wat);
    assert_eq!(expect_value(&result), "75");
    assert_eq!(result.gas_used(), 75);
}

// ── Test: running past the gas limit kills the module ──

#[test]
fn test_wasm_out_of_gas() {
    let wat = r#"
        (module
          (import "instruction" "incr" (func $incr (param i64) (result i64)))
          (memory (export "memory") 1)
          (func (export "main")
            (loop $spend
              (drop (call $incr (i64.const 10)))
              (br $spend))))
    "#;
    let result = run_wat_with(&ledger(), wat, 1_000);
    assert_eq!(
        result.error_kind(),
        Some(ErrorKind::ResourceExceeded(Resource::Gas))
    );
    assert_eq!(result.error(), Some("out of gas"));
    assert!(result.gas_used() > 1_000);
}

// ── Test: binary modules are accepted ──

#[test]
fn test_binary_module() {
    let bytes = wat_to_binary();
    let instance = wasm();
    let mut sandbox = sandbox(&instance, &ledger(), AMPLE_GAS);
    let result = sandbox.execute(bytes, far_deadline());
    assert_eq!(expect_value(&result), "5");
}

/// `(module (memory (export "memory") 1) (func (export "main") (result i32) (i32.const 5)))`
fn wat_to_binary() -> Vec<u8> {
    vec![
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic, version
        0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7f, // type: () -> i32
        0x03, 0x02, 0x01, 0x00, // func 0: type 0
        0x05, 0x03, 0x01, 0x00, 0x01, // memory: min 1
        0x07, 0x11, 0x02, // exports
        0x06, b'm', b'e', b'm', b'o', b'r', b'y', 0x02, 0x00, // "memory"
        0x04, b'm', b'a', b'i', b'n', 0x00, 0x00, // "main"
        0x0a, 0x06, 0x01, 0x04, 0x00, 0x41, 0x05, 0x0b, // code: i32.const 5
    ]
}

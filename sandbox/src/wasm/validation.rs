//! Guest module ABI checks, run before a module is linked.
//!
//! 1. `memory` is exported
//! 2. `main` is exported, takes no params, returns at most one number
//! 3. Imports come only from the capability modules and `env`
//! 4. No WASI, and every import is a function

use wasmtime::{ExternType, Module, ValType};

use crate::error::SandboxError;

/// Import modules a guest may link against.
pub const ALLOWED_IMPORT_MODULES: &[&str] = &["storage", "blockchain", "crypto", "instruction", "env"];

fn is_numeric(vt: &ValType) -> bool {
    matches!(vt, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
}

/// Validate that a compiled module fits the guest ABI.
pub fn validate_module(module: &Module) -> Result<(), SandboxError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), SandboxError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(SandboxError::ValidationError(
            "module must export 'memory'".into(),
        ));
    }

    let main = module
        .exports()
        .find(|e| e.name() == "main")
        .ok_or_else(|| SandboxError::ValidationError("missing required export: main".into()))?;
    let func_ty = match main.ty() {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(SandboxError::ValidationError(
                "export 'main' must be a function".into(),
            ))
        }
    };

    if func_ty.params().len() != 0 {
        return Err(SandboxError::ValidationError(format!(
            "export 'main' must take no params, got {}",
            func_ty.params().len()
        )));
    }
    let results: Vec<ValType> = func_ty.results().collect();
    if results.len() > 1 || !results.iter().all(is_numeric) {
        return Err(SandboxError::ValidationError(
            "export 'main' must return nothing or one number".into(),
        ));
    }

    Ok(())
}

fn validate_imports(module: &Module) -> Result<(), SandboxError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(SandboxError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if !ALLOWED_IMPORT_MODULES.contains(&module_name) {
            return Err(SandboxError::ValidationError(format!(
                "import from unknown module '{}': {}",
                module_name,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(SandboxError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn check(wat: &str) -> Result<(), SandboxError> {
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        validate_module(&module)
    }

    #[test]
    fn test_minimal_module() {
        check(
            r#"(module
                (memory (export "memory") 1)
                (func (export "main") (result i32) i32.const 7))"#,
        )
        .unwrap();
        check(
            r#"(module
                (memory (export "memory") 1)
                (func (export "main")))"#,
        )
        .unwrap();
    }

    #[test]
    fn test_reject_missing_main() {
        let err = check(r#"(module (memory (export "memory") 1))"#).unwrap_err();
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn test_reject_main_with_params() {
        let err = check(
            r#"(module
                (memory (export "memory") 1)
                (func (export "main") (param i32)))"#,
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::ValidationError(_)));
    }

    #[test]
    fn test_reject_missing_memory() {
        let err = check(r#"(module (func (export "main")))"#).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_reject_wasi_import() {
        let err = check(
            r#"(module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
                (func (export "main")))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("WASI"));
    }

    #[test]
    fn test_accept_capability_import() {
        check(
            r#"(module
                (import "storage" "get" (func (param i32 i32 i32 i32) (result i64)))
                (import "env" "log" (func (param i32 i32)))
                (memory (export "memory") 1)
                (func (export "main")))"#,
        )
        .unwrap();
    }

    #[test]
    fn test_reject_unknown_module_and_global_import() {
        assert!(check(
            r#"(module
                (import "os" "exit" (func (param i32)))
                (memory (export "memory") 1)
                (func (export "main")))"#,
        )
        .is_err());
        assert!(check(
            r#"(module
                (import "env" "g" (global i32))
                (memory (export "memory") 1)
                (func (export "main")))"#,
        )
        .is_err());
    }
}

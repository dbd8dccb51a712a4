//! Host function registration via the Wasmtime linker.
//!
//! Every capability method is importable as `<object>.<method>` with one
//! `(ptr i32, len i32)` pair per argument and an `i64` result. Each import:
//! 1. Reads its arguments out of guest memory
//! 2. Dispatches through the sandbox's bridge (which charges gas)
//! 3. Encodes the result, writing strings into the host region
//!
//! Argument and host errors are recorded as the guest's exception and trap.

use gasvm_hostapi::TransferBuffer;
use tracing::trace;
use wasmtime::{Caller, Engine, FuncType, Linker, Memory, Val, ValType};

use super::memory;
use super::GuestState;
use crate::capability::{BridgeError, HostValue, Method};
use crate::engine::GuestValue;
use crate::error::SandboxError;

/// Result value for a `null` capability return.
pub const NULL_RESULT: i64 = -1;

fn get_memory(caller: &mut Caller<'_, GuestState>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

/// Record `error` as the guest's exception and turn it into a trap.
fn raise(caller: &mut Caller<'_, GuestState>, error: BridgeError) -> anyhow::Error {
    let message = error.to_string();
    caller.data_mut().thrown = Some(message.clone());
    anyhow::anyhow!(message)
}

fn read_arg(
    caller: &mut Caller<'_, GuestState>,
    memory: &Memory,
    what: &str,
    ptr: i32,
    len: i32,
) -> anyhow::Result<Vec<u8>> {
    match memory::read_bytes(memory.data(&*caller), ptr, len) {
        Ok(bytes) => Ok(bytes),
        Err(e) => Err(raise(
            caller,
            BridgeError::InvalidArgument(format!("{}: {}", what, e)),
        )),
    }
}

fn read_text(
    caller: &mut Caller<'_, GuestState>,
    memory: &Memory,
    what: &str,
    ptr: i32,
    len: i32,
) -> anyhow::Result<String> {
    let bytes = read_arg(caller, memory, what, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| {
        raise(
            caller,
            BridgeError::InvalidArgument(format!("{}: not valid UTF-8", what)),
        )
    })
}

fn require_memory(caller: &mut Caller<'_, GuestState>) -> anyhow::Result<Memory> {
    get_memory(caller).ok_or_else(|| anyhow::anyhow!("module has no memory export"))
}

/// Register every guest import with the linker.
pub fn register_host_functions(
    linker: &mut Linker<GuestState>,
    engine: &Engine,
) -> Result<(), SandboxError> {
    register_capabilities(linker, engine)?;
    register_instruction(linker)?;
    register_env(linker)?;
    Ok(())
}

// ── Capabilities ──

fn register_capabilities(
    linker: &mut Linker<GuestState>,
    engine: &Engine,
) -> Result<(), SandboxError> {
    for &method in Method::ALL {
        let params = vec![ValType::I32; method.max_args() * 2];
        let ty = FuncType::new(engine, params, [ValType::I64]);
        linker.func_new(
            method.object(),
            method.name(),
            ty,
            move |mut caller: Caller<'_, GuestState>, params: &[Val], results: &mut [Val]| {
                let memory = require_memory(&mut caller)?;
                let what = method.qualified();

                let mut args = Vec::with_capacity(method.max_args());
                for pair in params.chunks_exact(2) {
                    let ptr = pair[0].i32().unwrap_or(-1);
                    let len = pair[1].i32().unwrap_or(-1);
                    let bytes = read_arg(&mut caller, &memory, &what, ptr, len)?;
                    args.push(TransferBuffer::new(bytes));
                }

                let bridge = caller.data().bridge.clone();
                let value = match bridge.dispatch(method, args) {
                    Ok(value) => value,
                    Err(e) => return Err(raise(&mut caller, e)),
                };
                results[0] = Val::I64(encode(&mut caller, &memory, value)?);
                Ok(())
            },
        )?;
    }
    Ok(())
}

/// Encode a capability result as the import's `i64` return value.
fn encode(
    caller: &mut Caller<'_, GuestState>,
    memory: &Memory,
    value: HostValue,
) -> anyhow::Result<i64> {
    match value {
        HostValue::Unit => Ok(0),
        HostValue::Null => Ok(NULL_RESULT),
        HostValue::Bool(b) => Ok(i64::from(b)),
        HostValue::Number(n) => Ok(i64::try_from(n).unwrap_or(i64::MAX)),
        HostValue::Str(buf) => {
            let bytes = match buf.encode_prefixed() {
                Ok(bytes) => bytes,
                Err(e) => return Err(raise(caller, BridgeError::InvalidArgument(e.to_string()))),
            };
            let ptr = memory::alloc_and_write(&mut *caller, memory, &bytes)?;
            trace!(ptr, len = bytes.len(), "wrote host buffer");
            Ok(i64::from(ptr))
        }
    }
}

// ── Instruction counter ──

fn register_instruction(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        "instruction",
        "incr",
        |mut caller: Caller<'_, GuestState>, n: i64| -> anyhow::Result<i64> {
            let bridge = caller.data().bridge.clone();
            match bridge.instructions().incr(n as f64) {
                Ok(total) => Ok(i64::try_from(total).unwrap_or(i64::MAX)),
                Err(e) => Err(raise(&mut caller, e)),
            }
        },
    )?;
    linker.func_wrap(
        "instruction",
        "count",
        |caller: Caller<'_, GuestState>| -> i64 {
            let used = caller.data().bridge.instructions().count();
            i64::try_from(used).unwrap_or(i64::MAX)
        },
    )?;
    Ok(())
}

// ── env: results, exceptions, logs ──

fn register_env(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        "env",
        "set_result",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let memory = require_memory(&mut caller)?;
            let text = read_text(&mut caller, &memory, "env.set_result", ptr, len)?;
            caller.data_mut().result = Some(GuestValue::text(text));
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "set_result_json",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let memory = require_memory(&mut caller)?;
            let text = read_text(&mut caller, &memory, "env.set_result_json", ptr, len)?;
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&text) {
                return Err(raise(
                    &mut caller,
                    BridgeError::InvalidArgument(format!("env.set_result_json: invalid JSON: {}", e)),
                ));
            }
            caller.data_mut().result = Some(GuestValue::json(text));
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "throw",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let memory = require_memory(&mut caller)?;
            let bytes = read_arg(&mut caller, &memory, "env.throw", ptr, len)?;
            let message = String::from_utf8_lossy(&bytes).into_owned();
            caller.data_mut().thrown = Some(message.clone());
            Err(anyhow::anyhow!(message))
        },
    )?;

    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let memory = require_memory(&mut caller)?;
            let bytes = read_arg(&mut caller, &memory, "env.log", ptr, len)?;
            caller
                .data()
                .bridge
                .log(&String::from_utf8_lossy(&bytes));
            Ok(())
        },
    )?;

    Ok(())
}

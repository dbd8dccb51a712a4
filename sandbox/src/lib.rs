//! `gasvm-sandbox` — metered, cancellable sandbox for smart-contract scripts.
//!
//! This crate runs untrusted guest code (JavaScript on QuickJS, or Wasm on
//! Wasmtime) with host capabilities for storage, ledger, and crypto. It
//! enforces:
//!
//! - **Gas metering:** every host call and self-reported instruction is charged
//! - **Memory ceiling:** sampled engine heap plus allocator high-water mark
//! - **Deadlines:** wall-clock kill from a supervising thread
//! - **Capability isolation:** guests reach the host only through the bridge
//! - **No string codegen:** `eval` and `Function` are gone after the prelude
//!
//! The entry points are [`EngineProcess::initialize`], then
//! [`EngineProcess::new_engine_instance`], [`Sandbox::create`] and
//! [`Sandbox::execute`].

pub mod capability;
pub mod config;
pub mod controller;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod governor;
pub mod modules;
pub mod process;
pub mod quickjs;
pub mod sandbox;
pub mod value;
pub mod wasm;

pub use capability::{Bridge, BridgeError, HostValue, Method};
pub use config::{EngineConfig, SandboxConfig};
pub use controller::{execute, ExecutionState};
pub use diagnostic::Diagnostic;
pub use engine::{GuestContext, ScriptEngine};
pub use error::SandboxError;
pub use governor::Breach;
pub use process::{EngineInstance, EngineProcess, StartupSnapshot};
pub use quickjs::QuickJs;
pub use sandbox::Sandbox;
pub use value::{Deadline, ErrorKind, Payload, Resource, ValueTuple};
pub use wasm::Wasm;

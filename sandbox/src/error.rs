//! Sandbox error types.
//!
//! `SandboxError` covers construction and lifecycle failures only. Anything
//! that goes wrong while guest code runs is reported inside the
//! [`ValueTuple`](crate::ValueTuple) returned by `execute`.

use gasvm_hostapi::HostError;

/// Top-level error type for the sandbox crate.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// `EngineProcess::initialize` was called while a process handle is alive.
    #[error("engine process already initialized")]
    AlreadyInitialized,

    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// QuickJS runtime or context setup failed.
    #[error("quickjs error: {0}")]
    QuickJs(String),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Host API error.
    #[error("host error: {0}")]
    HostError(#[from] HostError),

    /// Memory operation failed (out-of-bounds, grow failure).
    #[error("memory error: {0}")]
    MemoryError(String),

    /// `require` found neither a file nor a bundled module.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// A caller-supplied argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading a module from disk failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rquickjs::Error> for SandboxError {
    fn from(e: rquickjs::Error) -> Self {
        Self::QuickJs(e.to_string())
    }
}

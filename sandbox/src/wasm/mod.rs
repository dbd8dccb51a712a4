//! Wasmtime engine backend.
//!
//! One [`Engine`] per engine instance. Each sandbox owns a [`Linker`] with the
//! capability imports registered, and each run gets a fresh [`Store`] and
//! instance. Termination is by epoch interruption: the supervisor bumps the
//! engine epoch and the store's deadline callback traps if its ticket was
//! killed.

pub mod linker;
pub mod memory;
pub mod validation;

use std::sync::Arc;

use tracing::{debug, trace};
use wasmtime::{
    Config, Engine, InstancePre, Linker, Module, ResourceLimiter, Store, UpdateDeadline, Val,
};

use crate::capability::Bridge;
use crate::config::EngineConfig;
use crate::diagnostic::Diagnostic;
use crate::engine::{
    AllocatorGauge, GuestContext, GuestFailure, GuestValue, InterruptSignal, RunTicket,
    ScriptEngine,
};
use crate::error::SandboxError;
use crate::governor::Governor;
use crate::process::StartupSnapshot;
use memory::{HostAllocator, PAGE_SIZE};

/// Table growth ceiling, in elements.
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Per-run state held in the Wasmtime `Store`.
pub struct GuestState {
    pub bridge: Arc<Bridge>,
    pub limiter: MemoryLimiter,
    pub host_alloc: HostAllocator,
    /// Set by `env.set_result` / `env.set_result_json`.
    pub result: Option<GuestValue>,
    /// Set by `env.throw` or a failed import; becomes the exception message.
    pub thrown: Option<String>,
}

/// Reports linear-memory growth to the governor and refuses it past the
/// ceiling.
pub struct MemoryLimiter {
    governor: Arc<Governor>,
    max_bytes: usize,
}

impl MemoryLimiter {
    pub fn new(governor: Arc<Governor>, max_pages: u64) -> Self {
        Self {
            governor,
            max_bytes: usize::try_from(max_pages)
                .unwrap_or(usize::MAX)
                .saturating_mul(PAGE_SIZE),
        }
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.max_bytes {
            trace!(current, desired, "memory growth past page ceiling refused");
            return Ok(false);
        }
        Ok(self.governor.record_heap(desired as u64))
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

/// The Wasm engine runtime.
#[derive(Clone)]
pub struct Wasm {
    engine: Engine,
    gauge: Arc<AllocatorGauge>,
    host_alloc_pages: u64,
    max_memory_pages: u64,
}

impl std::fmt::Debug for Wasm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wasm")
            .field("host_alloc_pages", &self.host_alloc_pages)
            .field("max_memory_pages", &self.max_memory_pages)
            .finish_non_exhaustive()
    }
}

/// Create a Wasmtime engine with deterministic configuration.
fn create_engine() -> Result<Engine, SandboxError> {
    let mut wasm_config = Config::new();

    wasm_config.epoch_interruption(true);

    wasm_config.wasm_threads(false);
    wasm_config.wasm_simd(false);
    wasm_config.wasm_relaxed_simd(false);
    wasm_config.wasm_multi_memory(false);
    wasm_config.cranelift_nan_canonicalization(true);

    Ok(Engine::new(&wasm_config)?)
}

impl ScriptEngine for Wasm {
    const NAME: &'static str = "wasm";
    const TEXT_SOURCE: bool = false;

    type Context = WasmContext;

    fn new(_snapshot: &StartupSnapshot, config: &EngineConfig) -> Result<Self, SandboxError> {
        let engine = create_engine()?;
        debug!(
            max_memory_pages = config.max_memory_pages,
            host_alloc_pages = config.host_alloc_pages,
            "wasm engine created"
        );
        Ok(Self {
            engine,
            gauge: Arc::new(AllocatorGauge::default()),
            host_alloc_pages: config.host_alloc_pages,
            max_memory_pages: config.max_memory_pages,
        })
    }

    fn new_context(&self, bridge: Arc<Bridge>) -> Result<WasmContext, SandboxError> {
        let mut linker = Linker::new(&self.engine);
        linker::register_host_functions(&mut linker, &self.engine)?;
        Ok(WasmContext {
            engine: self.engine.clone(),
            linker,
            signal: Arc::new(InterruptSignal::default()),
            bridge,
            host_alloc_pages: self.host_alloc_pages,
            max_memory_pages: self.max_memory_pages,
        })
    }

    fn allocator_gauge(&self) -> Arc<AllocatorGauge> {
        self.gauge.clone()
    }
}

/// A validated, pre-linked module.
pub struct WasmScript {
    pre: InstancePre<GuestState>,
    tag: String,
}

/// A sandbox's linker and interrupt signal.
pub struct WasmContext {
    engine: Engine,
    linker: Linker<GuestState>,
    signal: Arc<InterruptSignal>,
    bridge: Arc<Bridge>,
    host_alloc_pages: u64,
    max_memory_pages: u64,
}

impl GuestContext for WasmContext {
    type Script = WasmScript;

    fn compile(&self, tag: &str, source: &[u8]) -> Result<Self::Script, GuestFailure> {
        let compile_error =
            |message: String| GuestFailure::Compile(Diagnostic::new(message).with_tag(tag));

        let module = Module::new(&self.engine, source)
            .map_err(|e| compile_error(format!("invalid module: {:#}", e)))?;
        validation::validate_module(&module).map_err(|e| compile_error(e.to_string()))?;
        let pre = self
            .linker
            .instantiate_pre(&module)
            .map_err(|e| compile_error(format!("link error: {:#}", e)))?;
        Ok(WasmScript {
            pre,
            tag: tag.to_string(),
        })
    }

    fn run(&self, script: Self::Script, ticket: RunTicket) -> Result<GuestValue, GuestFailure> {
        let governor = self.bridge.governor().clone();
        let state = GuestState {
            bridge: self.bridge.clone(),
            limiter: MemoryLimiter::new(governor.clone(), self.max_memory_pages),
            host_alloc: HostAllocator::default(),
            result: None,
            thrown: None,
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.limiter);

        // Arm the deadline before checking for an early kill so a kill that
        // lands in between still trips the callback.
        store.set_epoch_deadline(1);
        let signal = self.signal.clone();
        store.epoch_deadline_callback(move |_| {
            if signal.is_killed(ticket) {
                Err(anyhow::anyhow!("execution interrupted"))
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let _run = self.signal.enter(ticket);
        if self.signal.is_killed(ticket) {
            return Err(GuestFailure::Interrupted);
        }

        match self.call_main(&mut store, &script.pre) {
            Ok(value) => Ok(value),
            Err(error) => {
                if self.signal.is_killed(ticket) || governor.breach().is_some() {
                    return Err(GuestFailure::Interrupted);
                }
                let diagnostic = match store.data_mut().thrown.take() {
                    Some(message) => Diagnostic::new(message),
                    None => Diagnostic::new(format!("wasm trap: {}", error.root_cause())).with_stack(
                        error
                            .downcast_ref::<wasmtime::WasmBacktrace>()
                            .map(|bt| bt.to_string()),
                    ),
                };
                Err(GuestFailure::Exception(diagnostic.with_tag(&script.tag)))
            }
        }
    }

    fn interrupt(&self, ticket: RunTicket) {
        self.signal.kill(ticket);
        self.engine.increment_epoch();
    }
}

impl WasmContext {
    fn call_main(
        &self,
        store: &mut Store<GuestState>,
        pre: &InstancePre<GuestState>,
    ) -> anyhow::Result<GuestValue> {
        let instance = pre.instantiate(&mut *store)?;
        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or_else(|| anyhow::anyhow!("module has no memory export"))?;

        let base_pages = memory.size(&*store);
        memory.grow(&mut *store, self.host_alloc_pages)?;
        store.data_mut().host_alloc = HostAllocator::new(
            usize::try_from(base_pages)? * PAGE_SIZE,
            usize::try_from(self.host_alloc_pages)? * PAGE_SIZE,
        );

        let main = instance
            .get_func(&mut *store, "main")
            .ok_or_else(|| anyhow::anyhow!("module has no main export"))?;
        let mut results = vec![Val::I32(0); main.ty(&*store).results().len()];
        main.call(&mut *store, &[], &mut results)?;

        if let Some(value) = store.data_mut().result.take() {
            return Ok(value);
        }
        let text = match results.first() {
            Some(Val::I32(n)) => n.to_string(),
            Some(Val::I64(n)) => n.to_string(),
            Some(Val::F32(bits)) => f32::from_bits(*bits).to_string(),
            Some(Val::F64(bits)) => f64::from_bits(*bits).to_string(),
            _ => String::new(),
        };
        Ok(GuestValue::text(text))
    }
}

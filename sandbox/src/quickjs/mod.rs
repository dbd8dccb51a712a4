//! QuickJS engine backend.
//!
//! One [`Runtime`] per engine instance, one [`Context`] per sandbox. The
//! runtime lock serializes runs on an instance, so the interrupt signal and
//! the "current governor" slot are per-instance and keyed by run ticket.

mod host;
mod throw_sites;

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::{qjs, CatchResultExt, CaughtError, Context, Ctx, Module, Runtime, Value};
use tracing::{debug, trace, warn};

use crate::capability::Bridge;
use crate::config::EngineConfig;
use crate::diagnostic::Diagnostic;
use crate::engine::{
    AllocatorGauge, GuestContext, GuestFailure, GuestValue, InterruptSignal, RunGuard, RunTicket,
    ScriptEngine,
};
use crate::error::SandboxError;
use crate::governor::{Breach, Governor};
use crate::process::StartupSnapshot;

/// Interrupt-handler calls between heap samples taken from the handler.
const HANDLER_PROBE_EVERY: u64 = 64;

/// Compiles served by one scratch context before it is replaced. Declared
/// modules stay alive until their context is freed.
const SCRATCH_RECYCLE: u32 = 32;

/// A failure with the allocator this close to its cap is out of memory,
/// whatever the engine managed to throw.
const CEILING_SLACK: u64 = 256 * 1024;

/// State shared between the runtime's interrupt handler and its contexts.
#[derive(Default)]
struct Shared {
    signal: InterruptSignal,
    gauge: Arc<AllocatorGauge>,
    active: Mutex<Option<Arc<Governor>>>,
    raw_runtime: AtomicUsize,
    ticks: AtomicU64,
    scratch: Mutex<Option<Scratch>>,
    throw_site: Mutex<Option<ThrowSite>>,
}

/// Parse-only context, reused across compiles on one instance.
struct Scratch {
    context: Context,
    uses: u32,
}

/// Last `throw` statement executed in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ThrowSite {
    module: Option<String>,
    line: u32,
}

/// Runtime-wide allocator figures.
#[derive(Debug, Clone, Copy)]
struct Usage {
    used: u64,
    malloc: u64,
}

impl Shared {
    fn activate(&self, ticket: RunTicket, governor: Arc<Governor>) -> Active<'_> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(governor);
        self.throw_site
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Active {
            shared: self,
            _run: self.signal.enter(ticket),
        }
    }

    fn active_governor(&self) -> Option<Arc<Governor>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_interrupt(&self) -> bool {
        if self.signal.should_interrupt() {
            return true;
        }
        if self.ticks.fetch_add(1, Ordering::Relaxed) % HANDLER_PROBE_EVERY != 0 {
            return false;
        }
        match self.active_governor() {
            Some(governor) => !self.sample(&governor),
            None => false,
        }
    }

    /// Take a heap sample if one is due after a charge.
    fn probe_if_due(&self, governor: &Governor) {
        if governor.take_probe_due() {
            self.sample(governor);
        }
    }

    /// Publish the runtime's memory usage. Returns false once over the ceiling.
    ///
    /// Must be called with the runtime lock held.
    fn sample(&self, governor: &Governor) -> bool {
        let Some(usage) = self.measure() else {
            return true;
        };
        governor.record_allocator(usage.malloc.saturating_sub(usage.used));
        let ok = governor.record_heap(usage.used);
        trace!(heap = usage.used, malloc = usage.malloc, ok, "quickjs heap sample");
        ok
    }

    /// Must be called with the runtime lock held.
    fn measure(&self) -> Option<Usage> {
        let raw = self.raw_runtime.load(Ordering::SeqCst) as *mut qjs::JSRuntime;
        if raw.is_null() {
            return None;
        }
        // SAFETY: `raw` belongs to the runtime that owns this handler and the
        // caller holds that runtime's lock.
        let usage = unsafe {
            let mut usage = MaybeUninit::<qjs::JSMemoryUsage>::zeroed();
            qjs::JS_ComputeMemoryUsage(raw, usage.as_mut_ptr());
            usage.assume_init()
        };
        Some(Usage {
            used: u64::try_from(usage.memory_used_size).unwrap_or(0),
            malloc: u64::try_from(usage.malloc_size).unwrap_or(0),
        })
    }

    fn record_throw(&self, line: u32, module: Option<String>) {
        *self.throw_site.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ThrowSite { module, line });
    }

    fn take_throw_site(&self) -> Option<ThrowSite> {
        self.throw_site
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Forget the scratch context, freeing the modules it declared.
    fn drop_scratch(&self) {
        let stale = self
            .scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(stale);
    }
}

/// Marks a run as current for the interrupt handler until dropped.
struct Active<'a> {
    shared: &'a Shared,
    _run: RunGuard<'a>,
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// The QuickJS engine runtime.
pub struct QuickJs {
    runtime: Runtime,
    shared: Arc<Shared>,
    prelude: &'static str,
    heap_hard_limit: usize,
}

impl std::fmt::Debug for QuickJs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickJs").finish_non_exhaustive()
    }
}

impl ScriptEngine for QuickJs {
    const NAME: &'static str = "quickjs";
    const TEXT_SOURCE: bool = true;

    type Context = QuickJsContext;

    fn new(snapshot: &StartupSnapshot, config: &EngineConfig) -> Result<Self, SandboxError> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(config.heap_hard_limit);
        runtime.set_max_stack_size(config.max_stack_size);

        let shared = Arc::new(Shared::default());
        {
            let probe = Context::base(&runtime)?;
            let raw = probe.with(|ctx| {
                // SAFETY: the context pointer is live for the duration of `with`.
                unsafe { qjs::JS_GetRuntime(ctx.as_raw().as_ptr()) }
            });
            shared.raw_runtime.store(raw as usize, Ordering::SeqCst);
        }

        let handler = shared.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || handler.on_interrupt())));

        debug!(
            heap_hard_limit = config.heap_hard_limit,
            max_stack_size = config.max_stack_size,
            "quickjs runtime created"
        );
        Ok(Self {
            runtime,
            shared,
            prelude: snapshot.prelude(),
            heap_hard_limit: config.heap_hard_limit,
        })
    }

    fn new_context(&self, bridge: Arc<Bridge>) -> Result<QuickJsContext, SandboxError> {
        let context = build_context(&self.runtime, &bridge, &self.shared, self.prelude)?;
        Ok(QuickJsContext {
            context: Mutex::new(context),
            runtime: self.runtime.clone(),
            shared: self.shared.clone(),
            bridge,
            prelude: self.prelude,
            heap_hard_limit: self.heap_hard_limit,
        })
    }

    fn allocator_gauge(&self) -> Arc<AllocatorGauge> {
        self.shared.gauge.clone()
    }
}

/// A full context with capability globals installed and the prelude run.
fn build_context(
    runtime: &Runtime,
    bridge: &Arc<Bridge>,
    shared: &Arc<Shared>,
    prelude: &str,
) -> Result<Context, SandboxError> {
    let context = Context::full(runtime)?;
    context.with(|ctx| -> Result<(), SandboxError> {
        host::install(&ctx, bridge, shared)
            .catch(&ctx)
            .map_err(|e| SandboxError::QuickJs(format!("installing globals: {}", e)))?;
        ctx.eval::<Value, _>(prelude)
            .catch(&ctx)
            .map_err(|e| SandboxError::QuickJs(format!("evaluating prelude: {}", e)))?;
        Ok(())
    })?;
    Ok(context)
}

/// A sandbox's QuickJS context with its capability globals installed.
pub struct QuickJsContext {
    context: Mutex<Context>,
    runtime: Runtime,
    shared: Arc<Shared>,
    bridge: Arc<Bridge>,
    prelude: &'static str,
    heap_hard_limit: usize,
}

impl QuickJsContext {
    /// Allocator cap for a run: a quarter above the sandbox's memory
    /// ceiling, so heap samples see the breach before allocations fail.
    fn ceiling(&self) -> usize {
        let mem_limit = self.bridge.governor().mem_limit();
        usize::try_from(mem_limit.saturating_add(mem_limit / 4))
            .unwrap_or(usize::MAX)
            .min(self.heap_hard_limit)
    }

    fn current(&self) -> Context {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parse `source` as a module in the instance's scratch context.
    fn parse(&self, tag: &str, source: &str) -> Result<(), GuestFailure> {
        let mut slot = self.shared.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(true, |s| s.uses >= SCRATCH_RECYCLE) {
            drop(slot.take());
            let context = Context::full(&self.runtime)
                .map_err(|e| GuestFailure::Internal(format!("scratch context: {}", e)))?;
            *slot = Some(Scratch { context, uses: 0 });
        }
        let Some(scratch) = slot.as_mut() else {
            return Err(GuestFailure::Internal("scratch context missing".to_string()));
        };
        scratch.uses += 1;
        scratch.context.with(|ctx| {
            Module::declare(ctx.clone(), tag, source)
                .catch(&ctx)
                .map(drop)
                .map_err(|caught| match describe(caught, tag, source, None) {
                    GuestFailure::Exception(diag) => GuestFailure::Compile(diag),
                    other => other,
                })
        })
    }

    /// Replace the context after a memory kill. Guest globals and the
    /// module cache are lost; capability globals are reinstalled.
    ///
    /// Must be called without the runtime lock held.
    fn recover(&self) {
        self.shared.drop_scratch();
        match build_context(&self.runtime, &self.bridge, &self.shared, self.prelude) {
            Ok(fresh) => {
                let stale = std::mem::replace(
                    &mut *self.context.lock().unwrap_or_else(PoisonError::into_inner),
                    fresh,
                );
                drop(stale);
            }
            Err(e) => warn!(sandbox = %self.bridge.id(), error = %e, "quickjs context rebuild failed"),
        }
        self.runtime.run_gc();
        debug!(sandbox = %self.bridge.id(), "quickjs context rebuilt after memory kill");
    }
}

/// Source that parsed cleanly.
#[derive(Debug)]
pub struct QuickJsScript {
    tag: String,
    /// Text as submitted, for diagnostics.
    source: String,
    /// Text that runs, with throw sites marked.
    code: String,
}

impl GuestContext for QuickJsContext {
    type Script = QuickJsScript;

    fn compile(&self, tag: &str, source: &[u8]) -> Result<QuickJsScript, GuestFailure> {
        let source = std::str::from_utf8(source).map_err(|_| {
            GuestFailure::Compile(Diagnostic::new("source is not valid UTF-8").with_tag(tag))
        })?;

        let marked = throw_sites::instrument(source, None);
        let code = if marked.len() == source.len() {
            self.parse(tag, source)?;
            marked
        } else if self.parse(tag, &marked).is_ok() {
            marked
        } else {
            // Report errors against the text as written.
            self.parse(tag, source)?;
            debug!(tag, "throw-site marking skipped");
            source.to_string()
        };

        Ok(QuickJsScript {
            tag: tag.to_string(),
            source: source.to_string(),
            code,
        })
    }

    fn run(&self, script: QuickJsScript, ticket: RunTicket) -> Result<GuestValue, GuestFailure> {
        let governor = self.bridge.governor().clone();
        let ceiling = self.ceiling();
        self.runtime.set_memory_limit(ceiling);

        let outcome = self.current().with(|ctx| {
            let _active = self.shared.activate(ticket, governor.clone());
            if self.shared.signal.is_killed(ticket) {
                return Err(GuestFailure::Interrupted);
            }

            let mut options = EvalOptions::default();
            options.strict = true;
            options.global = true;
            let outcome = ctx
                .eval_with_options::<Value, _>(script.code.as_str(), options)
                .catch(&ctx)
                .and_then(|value| to_guest_value(&ctx, value));
            self.shared.sample(&governor);

            outcome.map_err(|caught| {
                let exhausted = self
                    .shared
                    .measure()
                    .is_some_and(|usage| usage.malloc.saturating_add(CEILING_SLACK) >= ceiling as u64);
                if self.shared.signal.is_killed(ticket) || governor.breach().is_some() {
                    GuestFailure::Interrupted
                } else if exhausted {
                    GuestFailure::OutOfMemory
                } else {
                    let site = self.shared.take_throw_site();
                    describe(caught, &script.tag, &script.source, site)
                }
            })
        });

        self.runtime.set_memory_limit(self.heap_hard_limit);
        if matches!(outcome, Err(GuestFailure::OutOfMemory)) || governor.breach() == Some(Breach::Memory) {
            self.recover();
        }
        outcome
    }

    fn interrupt(&self, ticket: RunTicket) {
        self.shared.signal.kill(ticket);
    }
}

/// Convert a completion value to text.
fn to_guest_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<GuestValue, CaughtError<'js>> {
    if value.is_undefined() {
        return Ok(GuestValue::text(""));
    }
    if value.is_string() || value.is_number() || value.is_bool() {
        let Coerced(text) = value.get::<Coerced<String>>().catch(ctx)?;
        return Ok(GuestValue::text(text));
    }
    match ctx.json_stringify(value.clone()).catch(ctx)? {
        Some(json) => Ok(GuestValue::json(json.to_string().catch(ctx)?)),
        // functions and symbols have no JSON form
        None => {
            let Coerced(text) = value.get::<Coerced<String>>().catch(ctx)?;
            Ok(GuestValue::text(text))
        }
    }
}

/// Turn a caught JS error into a guest failure with a diagnostic.
///
/// Thrown non-`Error` values carry no location of their own; `site` is the
/// last throw statement the run executed.
fn describe(
    caught: CaughtError<'_>,
    tag: &str,
    source: &str,
    site: Option<ThrowSite>,
) -> GuestFailure {
    match caught {
        CaughtError::Exception(exception) => {
            let message = exception.message().unwrap_or_default();
            if message.contains("out of memory") {
                return GuestFailure::OutOfMemory;
            }
            let object = exception.as_object();
            let name = object
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .filter(|n| !n.is_empty());
            let head = match name {
                Some(name) if message.is_empty() => name,
                Some(name) => format!("{}: {}", name, message),
                None => message,
            };
            let line = object.get::<_, Option<u32>>("lineNumber").ok().flatten();
            let column = object.get::<_, Option<u32>>("columnNumber").ok().flatten();
            GuestFailure::Exception(
                Diagnostic::new(head)
                    .with_tag(tag)
                    .with_location(line, column)
                    .with_stack(exception.stack())
                    .with_source(source),
            )
        }
        CaughtError::Value(value) => {
            let text = value
                .get::<Coerced<String>>()
                .map(|Coerced(text)| text)
                .unwrap_or_else(|_| "exception".to_string());
            let diag = Diagnostic::new(format!("Uncaught {}", text)).with_tag(tag);
            GuestFailure::Exception(match site {
                Some(ThrowSite {
                    module: Some(module),
                    line,
                }) => diag.with_tag(&module).with_location(Some(line), None),
                Some(ThrowSite { module: None, line }) => {
                    diag.with_location(Some(line), None).with_source(source)
                }
                None => diag,
            })
        }
        CaughtError::Error(rquickjs::Error::Allocation) => GuestFailure::OutOfMemory,
        CaughtError::Error(e) => GuestFailure::Internal(e.to_string()),
    }
}

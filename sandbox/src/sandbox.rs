//! The sandbox: one isolated guest context plus its governor and bridge.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gasvm_hostapi::{HostBindings, SandboxId, TransferBuffer};
use tracing::debug;

use crate::capability::Bridge;
use crate::config::SandboxConfig;
use crate::controller;
use crate::engine::ScriptEngine;
use crate::error::SandboxError;
use crate::governor::Governor;
use crate::modules::ModuleResolver;
use crate::process::EngineInstance;
use crate::value::{Deadline, ValueTuple};

static NEXT_SANDBOX: AtomicU64 = AtomicU64::new(1);

/// Unit of isolation. Borrows its engine instance.
///
/// Configuration setters take `&mut self`, as does [`execute`](Self::execute),
/// so a sandbox cannot be reconfigured or re-entered while a run is in flight.
pub struct Sandbox<'i, E: ScriptEngine> {
    id: SandboxId,
    context: E::Context,
    governor: Arc<Governor>,
    bridge: Arc<Bridge>,
    config: SandboxConfig,
    worker_stack_size: usize,
    _instance: PhantomData<&'i E>,
}

impl<'i, E: ScriptEngine> Sandbox<'i, E> {
    /// Create a sandbox with default configuration.
    ///
    /// The gas limit starts at zero; set a real one before executing
    /// anything that calls the host.
    pub fn create(
        instance: &'i EngineInstance<'_, E>,
        bindings: HostBindings,
    ) -> Result<Self, SandboxError> {
        Self::with_config(instance, bindings, SandboxConfig::default())
    }

    pub fn with_config(
        instance: &'i EngineInstance<'_, E>,
        bindings: HostBindings,
        config: SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let id = SandboxId(NEXT_SANDBOX.fetch_add(1, Ordering::Relaxed));
        let engine = instance.engine();
        let governor = Arc::new(Governor::new(
            engine.allocator_gauge(),
            config.gas_limit,
            config.mem_limit,
            config.memory_check_interval,
        ));
        let modules = ModuleResolver::new(instance.snapshot().clone(), config.module_path.clone());
        let bridge = Arc::new(Bridge::new(id, governor.clone(), bindings, modules));
        let context = engine.new_context(bridge.clone())?;
        debug!(sandbox = %id, engine = E::NAME, "sandbox created");
        Ok(Self {
            id,
            context,
            governor,
            bridge,
            config,
            worker_stack_size: instance.config().worker_stack_size,
            _instance: PhantomData,
        })
    }

    pub fn id(&self) -> SandboxId {
        self.id
    }

    pub fn set_gas_limit(&mut self, limit: u64) {
        self.config.gas_limit = limit;
    }

    pub fn gas_limit(&self) -> u64 {
        self.config.gas_limit
    }

    pub fn set_mem_limit(&mut self, limit: u64) {
        self.config.mem_limit = limit;
    }

    pub fn mem_limit(&self) -> u64 {
        self.config.mem_limit
    }

    pub fn set_module_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.bridge.set_module_path(Some(path.clone()));
        self.config.module_path = Some(path);
    }

    pub fn module_path(&self) -> Option<PathBuf> {
        self.config.module_path.clone()
    }

    /// Gas used by the most recent execution.
    pub fn gas_used(&self) -> u64 {
        self.governor.gas_used()
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `source` to completion, failure, or kill.
    pub fn execute(&mut self, source: impl Into<TransferBuffer>, deadline: Deadline) -> ValueTuple {
        controller::execute(self, source.into(), deadline)
    }

    /// Tear down the context and release the capability handles.
    ///
    /// Teardown lives in `Drop`; this names it at call sites.
    pub fn destroy(self) {
        drop(self);
    }

    pub(crate) fn context(&self) -> &E::Context {
        &self.context
    }

    pub(crate) fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    pub(crate) fn worker_stack_size(&self) -> usize {
        self.worker_stack_size
    }
}

impl<E: ScriptEngine> Drop for Sandbox<'_, E> {
    fn drop(&mut self) {
        debug!(sandbox = %self.id, gas_used = self.governor.gas_used(), "sandbox destroyed");
    }
}

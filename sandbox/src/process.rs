//! Process-wide engine state and engine instances.
//!
//! [`EngineProcess`] is the one-per-process handle: it builds the startup
//! snapshot (guest prelude plus bundled modules) and hands out
//! [`EngineInstance`]s. Instances borrow the process, and sandboxes borrow
//! their instance, so teardown order is enforced by the compiler.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::engine::ScriptEngine;
use crate::error::SandboxError;

static LIVE: AtomicBool = AtomicBool::new(false);

const PRELUDE: &str = include_str!("js/prelude.js");

const BUNDLED: &[(&str, &str)] = &[
    ("assert", include_str!("js/assert.js")),
    ("json", include_str!("js/json.js")),
];

#[derive(Debug)]
struct SnapshotData {
    prelude: &'static str,
    modules: BTreeMap<&'static str, &'static str>,
}

/// The prelude and bundled guest modules, shared by every instance.
#[derive(Debug, Clone)]
pub struct StartupSnapshot {
    inner: Arc<SnapshotData>,
}

impl StartupSnapshot {
    pub(crate) fn bundled() -> Self {
        Self {
            inner: Arc::new(SnapshotData {
                prelude: PRELUDE,
                modules: BUNDLED.iter().copied().collect(),
            }),
        }
    }

    /// Script evaluated in every new context before guest code.
    pub fn prelude(&self) -> &'static str {
        self.inner.prelude
    }

    /// Source of the bundled module `name`.
    pub fn module(&self, name: &str) -> Option<&'static str> {
        self.inner.modules.get(name).copied()
    }

    pub fn module_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.modules.keys().copied()
    }
}

/// Handle proving process-wide engine state is initialized.
#[derive(Debug)]
pub struct EngineProcess {
    snapshot: StartupSnapshot,
}

impl EngineProcess {
    /// Initialize process-wide state.
    ///
    /// Fails with `AlreadyInitialized` while another handle is alive.
    pub fn initialize() -> Result<Self, SandboxError> {
        if LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SandboxError::AlreadyInitialized);
        }
        let snapshot = StartupSnapshot::bundled();
        info!(
            modules = snapshot.inner.modules.len(),
            "engine process initialized"
        );
        Ok(Self { snapshot })
    }

    pub fn startup_snapshot(&self) -> StartupSnapshot {
        self.snapshot.clone()
    }

    /// Build an engine runtime of type `E`.
    pub fn new_engine_instance<E: ScriptEngine>(
        &self,
        snapshot: StartupSnapshot,
        config: EngineConfig,
    ) -> Result<EngineInstance<'_, E>, SandboxError> {
        let engine = E::new(&snapshot, &config)?;
        info!(engine = E::NAME, "engine instance created");
        Ok(EngineInstance {
            engine,
            snapshot,
            config,
            _process: PhantomData,
        })
    }

    /// Release process-wide state; `initialize` may be called again.
    pub fn dispose(self) {}
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        LIVE.store(false, Ordering::SeqCst);
        info!("engine process disposed");
    }
}

/// One engine runtime. Hosts any number of sandboxes.
pub struct EngineInstance<'p, E: ScriptEngine> {
    engine: E,
    snapshot: StartupSnapshot,
    config: EngineConfig,
    _process: PhantomData<&'p EngineProcess>,
}

impl<E: ScriptEngine> EngineInstance<'_, E> {
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn snapshot(&self) -> &StartupSnapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tear the runtime down. Sandboxes borrow the instance, so none can be
    /// alive here.
    pub fn dispose(self) {
        info!(engine = E::NAME, "engine instance disposed");
    }
}

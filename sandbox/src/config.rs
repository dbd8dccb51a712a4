//! Sandbox and engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default memory ceiling: 100 MB of engine heap plus allocator high-water.
pub const DEFAULT_MEM_LIMIT: u64 = 100_000_000;

/// Per-sandbox configuration.
///
/// `gas_limit`, `mem_limit`, and `module_path` can also be changed on a live
/// [`Sandbox`](crate::Sandbox) between executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Gas budget per execution. Zero means any charge breaches it.
    pub gas_limit: u64,

    /// Memory ceiling in bytes.
    pub mem_limit: u64,

    /// Directory searched by `require` before the bundled modules.
    pub module_path: Option<PathBuf>,

    /// How often the supervisor re-checks limits when nothing wakes it.
    pub poll_interval: Duration,

    /// Sample the engine heap every this many charges.
    pub memory_check_interval: u64,

    /// Kill latency above this is logged as a warning.
    pub kill_grace: Duration,

    /// Largest accepted guest source in bytes.
    pub max_source_len: usize,

    /// File name used in diagnostics.
    pub source_tag: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            gas_limit: 0,
            mem_limit: DEFAULT_MEM_LIMIT,
            module_path: None,
            poll_interval: Duration::from_micros(500),
            memory_check_interval: 10,
            kill_grace: Duration::from_millis(50),
            max_source_len: 1024 * 1024,
            source_tag: "contract.js".into(),
        }
    }
}

/// Per-instance engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// QuickJS allocator ceiling, a backstop above any sandbox `mem_limit`.
    pub heap_hard_limit: usize,

    /// Maximum guest stack size in bytes.
    pub max_stack_size: usize,

    /// Pages reserved after instantiation for host-written buffers (Wasm).
    pub host_alloc_pages: u64,

    /// Linear-memory ceiling in 64 KiB pages (Wasm).
    pub max_memory_pages: u64,

    /// Native stack of the worker thread that runs guest code.
    pub worker_stack_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heap_hard_limit: 1 << 30,       // 1 GiB
            max_stack_size: 1024 * 1024,    // 1 MiB
            host_alloc_pages: 4,            // 256 KiB
            max_memory_pages: 1600,         // 100 MiB
            worker_stack_size: 8 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.gas_limit, 0);
        assert_eq!(config.mem_limit, 100_000_000);
        assert_eq!(config.poll_interval, Duration::from_micros(500));
        assert_eq!(config.memory_check_interval, 10);
        assert!(config.module_path.is_none());
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.host_alloc_pages, 4);
        assert_eq!(config.max_memory_pages * 65536, 104_857_600);
        assert!(config.worker_stack_size > config.max_stack_size);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"gas_limit": 5000, "module_path": "/srv/lib"}"#).unwrap();
        assert_eq!(config.gas_limit, 5000);
        assert_eq!(config.module_path, Some(PathBuf::from("/srv/lib")));
        assert_eq!(config.mem_limit, DEFAULT_MEM_LIMIT);
        assert_eq!(config.source_tag, "contract.js");
    }
}

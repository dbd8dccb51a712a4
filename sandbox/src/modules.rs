//! `require` resolution: search path on disk first, then bundled modules.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::SandboxError;
use crate::process::StartupSnapshot;

/// Resolves guest module names to CommonJS source text.
#[derive(Debug)]
pub struct ModuleResolver {
    search_path: RwLock<Option<PathBuf>>,
    snapshot: StartupSnapshot,
}

impl ModuleResolver {
    pub fn new(snapshot: StartupSnapshot, search_path: Option<PathBuf>) -> Self {
        Self {
            search_path: RwLock::new(search_path),
            snapshot,
        }
    }

    pub fn search_path(&self) -> Option<PathBuf> {
        self.search_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_search_path(&self, path: Option<PathBuf>) {
        *self.search_path.write().unwrap_or_else(PoisonError::into_inner) = path;
    }

    /// Load the source of module `name`.
    pub fn load(&self, name: &str) -> Result<String, SandboxError> {
        validate_name(name)?;

        if let Some(dir) = self.search_path() {
            match read_module(&dir, name) {
                Ok(source) => {
                    debug!(module = name, dir = %dir.display(), "module loaded from disk");
                    return Ok(source);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(SandboxError::Io(e)),
            }
        }

        self.snapshot
            .module(name)
            .map(str::to_string)
            .ok_or_else(|| SandboxError::ModuleNotFound(name.to_string()))
    }
}

fn read_module(dir: &Path, name: &str) -> io::Result<String> {
    std::fs::read_to_string(dir.join(format!("{}.js", name)))
}

/// Names are `[A-Za-z0-9_.-]+` and never `..`-relative.
pub fn validate_name(name: &str) -> Result<(), SandboxError> {
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if name.is_empty() || !valid_chars || name.starts_with('.') || name.contains("..") {
        return Err(SandboxError::InvalidArgument(format!(
            "invalid module name: {:?}",
            name
        )));
    }
    Ok(())
}

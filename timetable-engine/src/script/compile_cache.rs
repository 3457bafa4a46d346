//! Process-level compile cache for provider scripts.
//!
//! Scripts are read fresh from disk on every run; what may be reused is the
//! compiled form, keyed by the file's modified time. A touched file misses
//! the cache and is recompiled, so hot-reloaded scripts take effect on the
//! next job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::sync::Cache as MokaCache;
use rhai::{AST, Engine};
use tracing::debug;

use super::error::ScriptError;

/// Cache key: script path plus its modified time at compile.
type CompileKey = (PathBuf, SystemTime);

/// Default maximum number of cached compilations.
const DEFAULT_MAX_CAPACITY: u64 = 256;

/// Default lifetime of a cached compilation.
const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Shared cache of compiled scripts.
///
/// Safe to share across jobs: entries are immutable `Arc<AST>`s and the
/// modified-time key guarantees a changed file is never served stale.
pub struct CompiledScriptCache {
    cache: MokaCache<CompileKey, Arc<AST>>,
}

impl CompiledScriptCache {
    /// Create a cache with default capacity and TTL.
    pub fn new() -> Self {
        let cache = MokaCache::builder()
            .max_capacity(DEFAULT_MAX_CAPACITY)
            .time_to_live(DEFAULT_TTL)
            .build();
        Self { cache }
    }

    /// Load and compile a script file, reusing the cached compilation when
    /// the file has not changed since.
    pub fn load(&self, path: &Path) -> Result<Arc<AST>, ScriptError> {
        let modified = file_modified(path)?;
        let key = (path.to_path_buf(), modified);

        if let Some(ast) = self.cache.get(&key) {
            return Ok(ast);
        }

        let source = std::fs::read_to_string(path).map_err(|e| ScriptError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        debug!(path = %path.display(), "compiling script");
        let engine = Engine::new();
        let ast = engine.compile(&source).map_err(|e| ScriptError::Syntax {
            path: path.to_path_buf(),
            line: e.1.line(),
            message: e.to_string(),
        })?;

        let ast = Arc::new(ast);
        self.cache.insert(key, Arc::clone(&ast));
        Ok(ast)
    }

    /// Number of cached compilations (for monitoring).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for CompiledScriptCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a file's modified time.
pub fn file_modified(path: &Path) -> Result<SystemTime, ScriptError> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| ScriptError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

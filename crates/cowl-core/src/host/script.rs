//! Script compilation, execution and source fetching.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::HostValue;
use crate::sandbox::{AmbientScope, SandboxError, SandboxScope};

/// Default number of compiled units kept by a [`ScriptCache`].
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// A compiled script, identified by the BLAKE3 digest of its source.
#[derive(Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    name: String,
    source: Arc<str>,
    digest: [u8; 32],
}

impl CompiledUnit {
    /// Wraps `source` under `name` (usually the URL it came from).
    #[must_use]
    pub fn new(name: impl Into<String>, source: &str) -> Self {
        Self {
            name: name.into(),
            digest: *blake3::hash(source.as_bytes()).as_bytes(),
            source: Arc::from(source),
        }
    }

    /// The unit's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// BLAKE3 digest of the source.
    #[must_use]
    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Hex form of [`CompiledUnit::digest`].
    #[must_use]
    pub fn digest_hex(&self) -> String {
        blake3::Hash::from(self.digest).to_hex().to_string()
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("name", &self.name)
            .field("digest", &self.digest_hex())
            .field("len", &self.source.len())
            .finish()
    }
}

/// Runs script units.
///
/// The executor is the only code that sees sandboxed scripts. It reaches the
/// runtime exclusively through the scope it is handed.
pub trait ScriptExecutor {
    /// Compiles `source`. The default keeps the text as is.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Execution`] if the source does not compile.
    fn compile(&mut self, name: &str, source: &str) -> Result<CompiledUnit, SandboxError> {
        Ok(CompiledUnit::new(name, source))
    }

    /// Runs `unit` inside a sandbox.
    ///
    /// # Errors
    ///
    /// Returns the uncaught exception value thrown by the script.
    fn execute(
        &mut self,
        scope: &mut SandboxScope<'_>,
        unit: &CompiledUnit,
    ) -> Result<(), HostValue>;

    /// Runs `unit` in an embedding context, as `import` does.
    ///
    /// # Errors
    ///
    /// Returns the uncaught exception value. The default refuses to run.
    fn execute_ambient(
        &mut self,
        scope: &mut AmbientScope<'_>,
        unit: &CompiledUnit,
    ) -> Result<(), HostValue> {
        let _ = scope;
        Err(HostValue::from(format!(
            "executor cannot run '{}' outside a sandbox",
            unit.name()
        )))
    }
}

/// Fetching a source failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct FetchError {
    /// Why the fetch failed.
    pub reason: String,
}

impl FetchError {
    /// Creates a fetch error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Retrieves script text by URL.
///
/// The runtime only calls it for `http`/`https` URLs that passed the flow
/// check.
pub trait SourceFetcher {
    /// Returns the text at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the resource cannot be retrieved.
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError>;
}

/// Fetcher for runtimes without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFetch;

impl SourceFetcher for NoFetch {
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        Err(FetchError::new(format!("network access is disabled ({url})")))
    }
}

/// Fetcher serving sources from a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    sources: HashMap<String, String>,
    requests: Vec<String>,
}

impl StaticSources {
    /// An empty source map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `source` under `url`.
    #[must_use]
    pub fn with(mut self, url: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(url.into(), source.into());
        self
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

impl SourceFetcher for StaticSources {
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        self.requests.push(url.to_string());
        self.sources
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::new("404 not found"))
    }
}

/// Compiled units keyed by URL.
#[derive(Debug, Clone)]
pub struct ScriptCache {
    entries: HashMap<String, CompiledUnit>,
    capacity: usize,
}

impl ScriptCache {
    /// A cache holding at most `capacity` units.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// The unit cached for `url`.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<&CompiledUnit> {
        self.entries.get(url)
    }

    /// Caches `unit` for `url`. A full cache only accepts replacements.
    pub fn insert(&mut self, url: &str, unit: CompiledUnit) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(url) {
            debug!(url, capacity = self.capacity, "script cache full, not caching");
            return;
        }
        self.entries.insert(url.to_string(), unit);
    }

    /// Number of cached units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached unit.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

//! Collaborators the runtime delegates to.
//!
//! The runtime owns labels and flow checks. Everything that touches a real
//! script engine, the network or an event loop sits behind a trait here:
//!
//! - [`ScriptExecutor`] compiles and runs script units;
//! - [`SourceFetcher`] retrieves script text by URL;
//! - [`StructuredClone`] copies values across context boundaries;
//! - [`EventDispatcher`] invokes registered handlers.
//!
//! [`HostServices`] bundles one of each.

mod clone;
mod events;
mod script;
mod value;

pub use clone::{CloneError, JsonStructuredClone, MAX_CLONE_BYTES, StructuredClone};
pub use events::{
    DispatchError, EventDispatcher, EventKind, EventTarget, LoggingDispatcher, RecordingDispatcher,
    SandboxEvent,
};
pub use script::{
    CompiledUnit, DEFAULT_CACHE_CAPACITY, FetchError, NoFetch, ScriptCache, ScriptExecutor,
    SourceFetcher, StaticSources,
};
pub use value::{HostValue, PortableBuffer};

use crate::config::FetchConfig;

/// The collaborators a [`SandboxRuntime`](crate::sandbox::SandboxRuntime)
/// runs with.
pub struct HostServices {
    pub(crate) executor: Box<dyn ScriptExecutor>,
    pub(crate) fetcher: Box<dyn SourceFetcher>,
    pub(crate) cloner: Box<dyn StructuredClone>,
    pub(crate) dispatcher: Box<dyn EventDispatcher>,
}

impl HostServices {
    /// Services around `executor`, with no network access, JSON structured
    /// clone and log-only event delivery.
    #[must_use]
    pub fn new(executor: impl ScriptExecutor + 'static) -> Self {
        Self {
            executor: Box::new(executor),
            fetcher: Box::new(NoFetch),
            cloner: Box::new(JsonStructuredClone::default()),
            dispatcher: Box::new(LoggingDispatcher),
        }
    }

    /// Like [`HostServices::new`], with the structured clone size limit taken
    /// from `config`.
    #[must_use]
    pub fn configured(executor: impl ScriptExecutor + 'static, config: &FetchConfig) -> Self {
        Self::new(executor).with_cloner(JsonStructuredClone::with_limit(config.max_clone_bytes))
    }

    /// Replaces the source fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    /// Replaces the structured clone implementation.
    #[must_use]
    pub fn with_cloner(mut self, cloner: impl StructuredClone + 'static) -> Self {
        self.cloner = Box::new(cloner);
        self
    }

    /// Replaces the event dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: impl EventDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

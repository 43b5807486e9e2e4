//! The sandbox runtime.
//!
//! [`SandboxRuntime`] owns the label state of every context and sandbox it
//! knows about and mediates every operation between them. Embedding contexts
//! are registered with [`SandboxRuntime::create_context`] (or loaded from
//! configuration); sandboxes are created by a context, which becomes their
//! owner.
//!
//! Operations initiated by the embedding fail loudly on a policy denial.
//! Writes into a sandbox that is already running fail silently instead: the
//! denial is logged and the operation has no effect, so the caller learns
//! nothing about the sandbox's state.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::scope::{AmbientScope, SandboxScope};
use super::unit::{DoneHandlers, PendingResult, ReadMode, SandboxState, SandboxedContext};
use super::{ContextId, ContextPolicy, SandboxError};
use crate::config::{ConfigError, ContextConfig, CowlConfig, FetchConfig};
use crate::guard::{guard_read, guard_write};
use crate::host::{CompiledUnit, HostServices, HostValue, ScriptCache};
use crate::label::{Label, Principal};
use crate::labeled::{LabeledStore, LabeledValue};
use crate::privilege::Privilege;

/// How a scheduled unit finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleOutcome {
    /// The unit ran to completion.
    Completed,
    /// The unit threw; the exception is now the sandbox's error result.
    Threw,
}

/// Label state and lifecycle of contexts and sandboxes.
///
/// Single-threaded: a runtime belongs to one logical thread and performs no
/// locking.
#[derive(Debug)]
pub struct SandboxRuntime {
    host: HostServices,
    contexts: HashMap<ContextId, ContextPolicy>,
    sandboxes: HashMap<ContextId, SandboxedContext>,
    next_id: u64,
    cache: ScriptCache,
    fetch: FetchConfig,
    labeled: LabeledStore,
}

impl SandboxRuntime {
    /// A runtime with default fetch settings.
    #[must_use]
    pub fn new(host: HostServices) -> Self {
        Self::with_fetch_config(host, FetchConfig::default())
    }

    /// A runtime using the `[fetch]` settings of `config`. Contexts are not
    /// loaded; see [`SandboxRuntime::load_contexts`].
    #[must_use]
    pub fn with_config(host: HostServices, config: &CowlConfig) -> Self {
        Self::with_fetch_config(host, config.fetch.clone())
    }

    fn with_fetch_config(host: HostServices, fetch: FetchConfig) -> Self {
        Self {
            host,
            contexts: HashMap::new(),
            sandboxes: HashMap::new(),
            next_id: 1,
            cache: ScriptCache::with_capacity(fetch.cache_capacity),
            fetch,
            labeled: LabeledStore::new(),
        }
    }

    fn allocate(&mut self) -> ContextId {
        let id = ContextId::new(self.next_id);
        self.next_id += 1;
        id
    }

    // =========================================================================
    // Contexts
    // =========================================================================

    /// Registers an embedding context for `origin`, with labeling off.
    pub fn create_context(&mut self, origin: Principal) -> ContextId {
        self.insert_context(ContextPolicy::unlabeled(origin))
    }

    /// Registers an embedding context with the given label state.
    pub fn insert_context(&mut self, policy: ContextPolicy) -> ContextId {
        let id = self.allocate();
        debug!(context = %id, origin = %policy.origin(), kind = %policy.kind(), "context registered");
        self.contexts.insert(id, policy);
        id
    }

    /// Registers a context described by configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the entry is invalid.
    pub fn create_context_from_config(
        &mut self,
        config: &ContextConfig,
    ) -> Result<ContextId, ConfigError> {
        Ok(self.insert_context(config.to_policy()?))
    }

    /// Registers every context named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for the first invalid entry; no
    /// context is registered in that case.
    pub fn load_contexts(
        &mut self,
        config: &CowlConfig,
    ) -> Result<BTreeMap<String, ContextId>, ConfigError> {
        let policies = config
            .contexts
            .iter()
            .map(|(name, entry)| {
                entry
                    .to_policy()
                    .map(|policy| (name.clone(), policy))
                    .map_err(|e| ConfigError::Validation(format!("contexts.{name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(policies
            .into_iter()
            .map(|(name, policy)| (name, self.insert_context(policy)))
            .collect())
    }

    /// Error for an id that is not a live sandbox.
    ///
    /// Ids are never reused and contexts are never removed, so an issued id
    /// that is neither a context nor a live sandbox was a destroyed sandbox.
    /// No per-sandbox tombstone is kept.
    fn missing(&self, id: ContextId) -> SandboxError {
        if self.contexts.contains_key(&id) {
            SandboxError::NotASandbox { id }
        } else if (1..self.next_id).contains(&id.get()) {
            SandboxError::Destroyed { id }
        } else {
            SandboxError::UnknownContext { id }
        }
    }

    /// Label state of a context or of a sandbox's inner context.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Destroyed`] or
    /// [`SandboxError::UnknownContext`].
    pub fn context(&self, id: ContextId) -> Result<&ContextPolicy, SandboxError> {
        if let Some(policy) = self.contexts.get(&id) {
            return Ok(policy);
        }
        match self.sandboxes.get(&id) {
            Some(sandbox) => Ok(sandbox.policy()),
            None => Err(self.missing(id)),
        }
    }

    /// Mutable label state of an embedding context.
    ///
    /// Only embedding contexts are returned. Sandboxes change their own
    /// labels through their [`SandboxScope`].
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Destroyed`] or
    /// [`SandboxError::UnknownContext`].
    pub fn context_mut(&mut self, id: ContextId) -> Result<&mut ContextPolicy, SandboxError> {
        if !self.contexts.contains_key(&id) {
            return Err(if self.sandboxes.contains_key(&id) {
                SandboxError::configuration(format!("{id} is a sandbox"))
            } else {
                self.missing(id)
            });
        }
        self.contexts
            .get_mut(&id)
            .ok_or(SandboxError::UnknownContext { id })
    }

    /// A sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Destroyed`], [`SandboxError::NotASandbox`] or
    /// [`SandboxError::UnknownContext`].
    pub fn sandbox(&self, id: ContextId) -> Result<&SandboxedContext, SandboxError> {
        self.sandboxes.get(&id).ok_or_else(|| self.missing(id))
    }

    /// Number of live sandboxes.
    #[must_use]
    pub fn sandbox_count(&self) -> usize {
        self.sandboxes.len()
    }

    /// The script cache.
    #[must_use]
    pub const fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    /// Enabled-for-labeling view of `id`, for creator and fetch checks.
    fn enabled_policy(&mut self, id: ContextId) -> Result<&ContextPolicy, SandboxError> {
        if let Some(policy) = self.contexts.get_mut(&id) {
            policy.enable_sandbox_mode();
        }
        self.context(id)
    }

    // =========================================================================
    // Sandbox lifecycle
    // =========================================================================

    /// Creates a sandbox owned by `creator`, labeled `(privacy, trust)`.
    ///
    /// Labeling is enabled on the creator if needed. The creator must be able
    /// to write data at the sandbox's label.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the label is below the
    /// creator's current label or above its clearance.
    pub fn create_sandbox(
        &mut self,
        creator: ContextId,
        privacy: Label,
        trust: Label,
    ) -> Result<ContextId, SandboxError> {
        let policy = self.enabled_policy(creator)?;
        let decision = guard_write(policy, &privacy, &trust, policy.privileges());
        if let Some(reason) = decision.deny_reason() {
            warn!(
                operation = "create_sandbox",
                creator = %creator,
                %privacy,
                %reason,
                "flow denied"
            );
            return Err(SandboxError::denied("create_sandbox", reason));
        }

        let id = self.allocate();
        info!(sandbox = %id, creator = %creator, %privacy, %trust, "sandbox created");
        self.sandboxes
            .insert(id, SandboxedContext::new(id, creator, privacy, trust));
        Ok(id)
    }

    /// Creates a sandbox at `privacy` and the creator's current trust label.
    ///
    /// # Errors
    ///
    /// See [`SandboxRuntime::create_sandbox`].
    pub fn create_sandbox_with_privacy(
        &mut self,
        creator: ContextId,
        privacy: Label,
    ) -> Result<ContextId, SandboxError> {
        let trust = self
            .enabled_policy(creator)?
            .trust()
            .cloned()
            .unwrap_or_default();
        self.create_sandbox(creator, privacy, trust)
    }

    /// Creates a sandbox at the creator's current labels.
    ///
    /// # Errors
    ///
    /// See [`SandboxRuntime::create_sandbox`].
    pub fn create_sandbox_at_current(
        &mut self,
        creator: ContextId,
    ) -> Result<ContextId, SandboxError> {
        let policy = self.enabled_policy(creator)?;
        let privacy = policy.privacy().cloned().unwrap_or_default();
        let trust = policy.trust().cloned().unwrap_or_default();
        self.create_sandbox(creator, privacy, trust)
    }

    /// Compiles `source` and runs it in the sandbox on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`SandboxRuntime::schedule_unit`]; compile failures surface as
    /// [`SandboxError::Execution`].
    pub fn schedule(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        source: &str,
    ) -> Result<ScheduleOutcome, SandboxError> {
        self.sandbox(sandbox)?;
        let unit = self
            .host
            .executor
            .compile(&format!("sandbox:{sandbox}"), source)?;
        self.schedule_unit(caller, sandbox, &unit)
    }

    /// Runs a compiled unit in the sandbox on behalf of `caller`.
    ///
    /// The first schedule seeds the sandbox's current labels from the
    /// caller's; the caller's label must flow into the sandbox. Later
    /// schedules only check that the caller may write into the sandbox.
    ///
    /// An exception thrown by the unit is not an error here: it becomes the
    /// sandbox's error result and is reported as [`ScheduleOutcome::Threw`].
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the caller may not run code
    /// in the sandbox, or a lookup error for unknown or destroyed ids.
    pub fn schedule_unit(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        unit: &CompiledUnit,
    ) -> Result<ScheduleOutcome, SandboxError> {
        let caller_view = self.context(caller)?.clone();
        let Some(target) = self.sandboxes.get_mut(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        match target.state() {
            SandboxState::Clean => target.activate(&caller_view)?,
            SandboxState::Active => target.gate_schedule(&caller_view)?,
        }
        self.run(sandbox, unit)
    }

    fn run(&mut self, id: ContextId, unit: &CompiledUnit) -> Result<ScheduleOutcome, SandboxError> {
        let Some(mut sandbox) = self.sandboxes.remove(&id) else {
            return Err(self.missing(id));
        };
        let owner_id = sandbox.owner();
        let contexts = &mut self.contexts;
        let sandboxes = &mut self.sandboxes;
        let labeled = &mut self.labeled;
        let host = &mut self.host;

        debug!(sandbox = %id, unit = unit.name(), "running unit");
        let executed = {
            let owner = policy_entry(contexts, sandboxes, owner_id);
            let mut scope = SandboxScope::new(
                &mut sandbox,
                owner,
                labeled,
                &*host.cloner,
                &mut *host.dispatcher,
            );
            host.executor.execute(&mut scope, unit)
        };

        let outcome = match executed {
            Ok(()) => ScheduleOutcome::Completed,
            Err(exception) => {
                debug!(sandbox = %id, unit = unit.name(), "unit threw");
                let error = host
                    .cloner
                    .transfer(&exception)
                    .unwrap_or_else(|e| HostValue::from(e.reason()));
                sandbox.set_result(PendingResult::Error(error));
                let owner = policy_entry(contexts, sandboxes, owner_id);
                sandbox.dispatch_result(owner, &mut *host.dispatcher);
                ScheduleOutcome::Threw
            },
        };
        sandboxes.insert(id, sandbox);
        Ok(outcome)
    }

    /// Fetches and compiles the script at `url` on behalf of `caller`.
    ///
    /// Only `http`/`https` URLs allowed by the fetch configuration are
    /// fetched, and only if the caller's label may flow to the URL's origin.
    /// With `cache` set, a previously compiled unit is reused and a newly
    /// fetched one stored.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Fetch`] for disallowed URLs and failed fetches
    /// and [`SandboxError::PolicyDenied`] if fetching would leak information.
    pub fn fetch_unit(
        &mut self,
        caller: ContextId,
        url: &str,
        cache: bool,
    ) -> Result<CompiledUnit, SandboxError> {
        if cache {
            if let Some(unit) = self.cache.get(url) {
                debug!(url, "script cache hit");
                return Ok(unit.clone());
            }
        }
        if !self.fetch.allows(url) {
            return Err(SandboxError::fetch(url, "scheme must be one of the allowed schemes"));
        }
        let origin = Label::from_principal(Principal::origin(url)?);

        let policy = self.enabled_policy(caller)?;
        let decision = guard_write(policy, &origin, &Label::public(), policy.privileges());
        if let Some(reason) = decision.deny_reason() {
            warn!(operation = "fetch", url, %reason, "fetching would leak information");
            return Err(SandboxError::denied("fetch", reason));
        }

        let text = self
            .host
            .fetcher
            .fetch_text(url)
            .map_err(|e| SandboxError::fetch(url, e.reason))?;
        let unit = self.host.executor.compile(url, &text)?;
        if cache {
            self.cache.insert(url, unit.clone());
        }
        Ok(unit)
    }

    /// Fetches the script at `url` and schedules it in the sandbox.
    ///
    /// # Errors
    ///
    /// See [`SandboxRuntime::fetch_unit`] and
    /// [`SandboxRuntime::schedule_unit`].
    pub fn schedule_uri(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        url: &str,
        cache: bool,
    ) -> Result<ScheduleOutcome, SandboxError> {
        self.sandbox(sandbox)?;
        let unit = self.fetch_unit(caller, url, cache)?;
        self.schedule_unit(caller, sandbox, &unit)
    }

    /// Fetches the script at `url` and runs it in the embedding context `ctx`
    /// itself.
    ///
    /// # Errors
    ///
    /// See [`SandboxRuntime::fetch_unit`]; a thrown exception surfaces as
    /// [`SandboxError::Execution`].
    pub fn import(&mut self, ctx: ContextId, url: &str, cache: bool) -> Result<(), SandboxError> {
        let unit = self.fetch_unit(ctx, url, cache)?;
        let Some(policy) = self.contexts.get_mut(&ctx) else {
            return Err(self.missing(ctx));
        };
        let mut scope = AmbientScope::new(ctx, policy);
        self.host
            .executor
            .execute_ambient(&mut scope, &unit)
            .map_err(|exception| {
                SandboxError::execution(format!("{} threw {exception}", unit.name()))
            })
    }

    /// Posts `value` into the sandbox, replacing any pending message.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the caller may not write to
    /// a clean sandbox, and [`SandboxError::Serialization`] if the value
    /// cannot be cloned. A denied post to an active sandbox is a logged
    /// no-op.
    pub fn post_message(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        value: &HostValue,
    ) -> Result<(), SandboxError> {
        let caller_view = self.context(caller)?.clone();
        let Some(target) = self.sandboxes.get_mut(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        if !target.gate_write("post_message", &caller_view)? {
            return Ok(());
        }

        target.clear_message();
        let copy = self
            .host
            .cloner
            .transfer(value)
            .map_err(|e| SandboxError::serialization(e.reason()))?;
        target.set_message(copy);
        target.dispatch_message(&mut *self.host.dispatcher);
        Ok(())
    }

    /// Gives the sandbox `privilege`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the caller may not write to
    /// a clean sandbox. A denied grant to an active sandbox is a logged
    /// no-op.
    pub fn grant(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        privilege: &Privilege,
    ) -> Result<(), SandboxError> {
        let caller_view = self.context(caller)?.clone();
        let Some(target) = self.sandboxes.get_mut(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        if target.gate_write("grant", &caller_view)? {
            target.policy_mut().own(privilege);
            debug!(sandbox = %sandbox, %privilege, "privilege granted");
        }
        Ok(())
    }

    /// Exposes `value` to the sandbox under `name`.
    ///
    /// # Errors
    ///
    /// Same gate as [`SandboxRuntime::post_message`].
    pub fn attach(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        name: impl Into<String>,
        value: HostValue,
    ) -> Result<(), SandboxError> {
        let caller_view = self.context(caller)?.clone();
        let Some(target) = self.sandboxes.get_mut(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        if target.gate_write("attach", &caller_view)? {
            target.attach(name.into(), value);
        }
        Ok(())
    }

    /// Registers owner-side result handlers and delivers any pending result
    /// to `caller`, raising its label if needed.
    ///
    /// # Errors
    ///
    /// Returns a lookup error for unknown or destroyed ids.
    pub fn on_done(
        &mut self,
        caller: ContextId,
        sandbox: ContextId,
        handlers: DoneHandlers,
    ) -> Result<(), SandboxError> {
        self.enabled_policy(caller)?;
        let Some(mut target) = self.sandboxes.remove(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        target.register_done_handlers(handlers);
        let reader = policy_entry(&mut self.contexts, &mut self.sandboxes, caller);
        target.dispatch_result(reader, &mut *self.host.dispatcher);
        self.sandboxes.insert(sandbox, target);
        Ok(())
    }

    /// Reads the sandbox's result slot as `reader`.
    ///
    /// Labeling is enabled on the reader if needed. The read is checked
    /// against the sandbox's static labels whether or not a result is
    /// pending. In [`ReadMode::Taint`] the reader's label is raised if its
    /// clearance allows. A sandbox reading its own slot is checked against
    /// its own label state like any other reader.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the reader may not observe
    /// the sandbox, or a lookup error for unknown or destroyed ids.
    pub fn get_result(
        &mut self,
        reader: ContextId,
        sandbox: ContextId,
        mode: ReadMode,
    ) -> Result<PendingResult, SandboxError> {
        self.sandbox(sandbox)?;
        self.enabled_policy(reader)?;
        let Some(mut target) = self.sandboxes.remove(&sandbox) else {
            return Err(self.missing(sandbox));
        };
        let privacy = target.privacy().clone();
        let trust = target.trust().clone();
        let policy = if reader == sandbox {
            Some(target.policy_mut())
        } else {
            policy_entry(&mut self.contexts, &mut self.sandboxes, reader)
        };
        let checked = match policy {
            Some(policy) => {
                let privs = policy.privileges().clone();
                let decision =
                    guard_read(policy, &privacy, &trust, &privs, mode == ReadMode::Taint);
                match decision.deny_reason() {
                    None => Ok(target.pending_result().clone()),
                    Some(reason) => {
                        warn!(operation = "get_result", sandbox = %sandbox, %reason, "flow denied");
                        Err(SandboxError::denied("get_result", reason))
                    },
                }
            },
            None => Err(self.missing(reader)),
        };
        self.sandboxes.insert(sandbox, target);
        checked
    }

    /// Releases the sandbox. Destroying twice is a no-op; every other later
    /// operation on it fails with [`SandboxError::Destroyed`].
    pub fn destroy(&mut self, sandbox: ContextId) {
        if self.sandboxes.remove(&sandbox).is_some() {
            info!(sandbox = %sandbox, "sandbox destroyed");
        }
    }

    // =========================================================================
    // Labeled values
    // =========================================================================

    /// Labels `value` on behalf of the embedding context `ctx`.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::create`].
    pub fn label_value(
        &mut self,
        ctx: ContextId,
        value: HostValue,
        privacy: Label,
        trust: Label,
    ) -> Result<LabeledValue, SandboxError> {
        let policy = self.enabled_policy(ctx)?;
        LabeledValue::create(policy, value, privacy, trust)
    }

    /// Reads a labeled value as the embedding context `ctx`.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::read`].
    pub fn unlabel(
        &mut self,
        ctx: ContextId,
        labeled: &LabeledValue,
    ) -> Result<HostValue, SandboxError> {
        let policy = self.context_mut(ctx)?;
        policy.enable_sandbox_mode();
        labeled.read(policy).cloned()
    }

    /// Keeps `labeled` in the runtime and returns the handle scripts carry
    /// in its place.
    pub fn seal(&mut self, labeled: LabeledValue) -> HostValue {
        self.labeled.seal(labeled)
    }

    /// Resolves a handle issued by this runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] for anything that is not a
    /// handle issued by this runtime.
    pub fn unseal(&self, handle: &HostValue) -> Result<LabeledValue, SandboxError> {
        self.labeled.open(handle).cloned()
    }
}

/// Label state for `id` among embedding contexts and live sandboxes.
fn policy_entry<'a>(
    contexts: &'a mut HashMap<ContextId, ContextPolicy>,
    sandboxes: &'a mut HashMap<ContextId, SandboxedContext>,
    id: ContextId,
) -> Option<&'a mut ContextPolicy> {
    match contexts.get_mut(&id) {
        Some(policy) => Some(policy),
        None => sandboxes.get_mut(&id).map(SandboxedContext::policy_mut),
    }
}

//! The state of one sandbox.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ContextId, ContextPolicy, SandboxError};
use crate::guard::{DenyReason, guard_read, guard_write_only};
use crate::host::{EventDispatcher, EventKind, EventTarget, HostValue, SandboxEvent};
use crate::label::Label;

/// Lifecycle state of a sandbox. Destruction is tracked by the runtime, which
/// drops the record entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    /// Created but never scheduled; the sandbox has no current labels.
    Clean,
    /// Scheduled at least once; current labels are seeded.
    Active,
}

impl SandboxState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single result slot. A later `done`/`fail` overwrites an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PendingResult {
    /// Nothing has been reported yet.
    #[default]
    None,
    /// The sandbox reported a value.
    Value(HostValue),
    /// The sandbox failed or threw.
    Error(HostValue),
}

impl PendingResult {
    /// `true` if nothing is pending.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The reported value or error, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&HostValue> {
        match self {
            Self::None => None,
            Self::Value(v) | Self::Error(v) => Some(v),
        }
    }
}

/// How [`get_result`](super::SandboxRuntime::get_result) treats a reader
/// whose label does not cover the sandbox's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Deny the read.
    #[default]
    Strict,
    /// Raise the reader's label if its clearance allows.
    Taint,
}

/// Owner-side handlers registered with
/// [`on_done`](super::SandboxRuntime::on_done).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DoneHandlers {
    /// Receives `message` events for value results.
    pub message: bool,
    /// Receives `error` events for error results. Error results wait until
    /// `message` is registered too.
    pub error: bool,
}

impl DoneHandlers {
    /// A success handler only.
    #[must_use]
    pub const fn message_only() -> Self {
        Self {
            message: true,
            error: false,
        }
    }

    /// Both success and error handlers.
    #[must_use]
    pub const fn with_error() -> Self {
        Self {
            message: true,
            error: true,
        }
    }
}

/// An isolated execution unit with fixed labels.
#[derive(Debug)]
pub struct SandboxedContext {
    id: ContextId,
    owner: ContextId,
    static_privacy: Label,
    static_trust: Label,
    policy: ContextPolicy,
    state: SandboxState,
    result: PendingResult,
    result_dispatched: bool,
    message: Option<HostValue>,
    owner_handlers: DoneHandlers,
    inner_onmessage: bool,
    attachments: BTreeMap<String, HostValue>,
}

impl SandboxedContext {
    pub(crate) fn new(id: ContextId, owner: ContextId, privacy: Label, trust: Label) -> Self {
        Self {
            id,
            owner,
            policy: ContextPolicy::for_sandbox(&privacy, &trust),
            static_privacy: privacy,
            static_trust: trust,
            state: SandboxState::Clean,
            result: PendingResult::None,
            result_dispatched: false,
            message: None,
            owner_handlers: DoneHandlers::default(),
            inner_onmessage: false,
            attachments: BTreeMap::new(),
        }
    }

    /// The sandbox's identifier.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// The context that created the sandbox.
    #[must_use]
    pub const fn owner(&self) -> ContextId {
        self.owner
    }

    /// Static privacy label, fixed at creation.
    #[must_use]
    pub const fn privacy(&self) -> &Label {
        &self.static_privacy
    }

    /// Static trust label, fixed at creation.
    #[must_use]
    pub const fn trust(&self) -> &Label {
        &self.static_trust
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SandboxState {
        self.state
    }

    /// Label state of the sandbox's inner context.
    #[must_use]
    pub const fn policy(&self) -> &ContextPolicy {
        &self.policy
    }

    pub(crate) fn policy_mut(&mut self) -> &mut ContextPolicy {
        &mut self.policy
    }

    pub(crate) const fn pending_result(&self) -> &PendingResult {
        &self.result
    }

    pub(crate) const fn message(&self) -> Option<&HostValue> {
        self.message.as_ref()
    }

    pub(crate) fn attachment(&self, name: &str) -> Option<&HostValue> {
        self.attachments.get(name)
    }

    /// First schedule: seeds the current labels from the caller's.
    ///
    /// The caller's label must flow into the sandbox, modulo the caller's
    /// privileges. On failure the sandbox stays clean.
    pub(crate) fn activate(&mut self, caller: &ContextPolicy) -> Result<(), SandboxError> {
        let (Some(privacy), Some(trust)) = (caller.privacy(), caller.trust()) else {
            return Err(self.refuse("schedule", DenyReason::MissingLabels));
        };
        let privs = caller.privileges().as_label();
        if !self.static_privacy.subsumes(privs, privacy) || !trust.subsumes(privs, &self.static_trust)
        {
            return Err(self.refuse("schedule", DenyReason::BelowCurrentLabel));
        }

        self.policy.seed(privacy.clone(), trust.clone());
        self.policy.refine();
        self.state = SandboxState::Active;
        debug!(sandbox = %self.id, "sandbox activated");
        Ok(())
    }

    /// Gate for writes into the sandbox by `caller`.
    ///
    /// Returns `Ok(true)` if the write may proceed. A denial is an error while
    /// the sandbox is clean and a logged no-op (`Ok(false)`) once it is
    /// active.
    pub(crate) fn gate_write(
        &self,
        operation: &'static str,
        caller: &ContextPolicy,
    ) -> Result<bool, SandboxError> {
        let decision = guard_write_only(
            caller,
            &self.static_privacy,
            &self.static_trust,
            caller.privileges(),
        );
        let Some(reason) = decision.deny_reason() else {
            return Ok(true);
        };
        match self.state {
            SandboxState::Clean => Err(self.refuse(operation, reason)),
            SandboxState::Active => {
                warn!(
                    operation,
                    sandbox = %self.id,
                    %reason,
                    "flow denied, dropping silently"
                );
                Ok(false)
            },
        }
    }

    /// Gate for scheduling into an active sandbox.
    pub(crate) fn gate_schedule(&self, caller: &ContextPolicy) -> Result<(), SandboxError> {
        let decision = guard_write_only(
            caller,
            &self.static_privacy,
            &self.static_trust,
            caller.privileges(),
        );
        match decision.deny_reason() {
            None => Ok(()),
            Some(reason) => Err(self.refuse("schedule", reason)),
        }
    }

    fn refuse(&self, operation: &'static str, reason: DenyReason) -> SandboxError {
        warn!(operation, sandbox = %self.id, %reason, "flow denied");
        SandboxError::denied(operation, reason)
    }

    pub(crate) fn set_result(&mut self, result: PendingResult) {
        self.result = result;
        self.result_dispatched = false;
    }

    pub(crate) fn register_done_handlers(&mut self, handlers: DoneHandlers) {
        self.owner_handlers = handlers;
    }

    /// Delivers the pending result to the owner-side handler.
    ///
    /// Nothing happens unless a result is pending, the matching handler is
    /// registered, the result has not been delivered yet and `reader` may
    /// observe the sandbox's static label (raising its label if needed).
    pub(crate) fn dispatch_result(
        &mut self,
        reader: Option<&mut ContextPolicy>,
        dispatcher: &mut dyn EventDispatcher,
    ) {
        if self.result_dispatched {
            return;
        }
        let (kind, payload) = match &self.result {
            PendingResult::None => return,
            PendingResult::Value(v) => (EventKind::Message, v),
            PendingResult::Error(v) => (EventKind::Error, v),
        };
        // An error result is only delivered once both handlers exist.
        let registered = match kind {
            EventKind::Message => self.owner_handlers.message,
            EventKind::Error => self.owner_handlers.message && self.owner_handlers.error,
        };
        if !registered {
            return;
        }
        let Some(reader) = reader else {
            return;
        };

        let privs = reader.privileges().clone();
        let decision = guard_read(reader, &self.static_privacy, &self.static_trust, &privs, true);
        if let Some(reason) = decision.deny_reason() {
            warn!(
                operation = "dispatch_result",
                sandbox = %self.id,
                %reason,
                "result delivery suppressed"
            );
            return;
        }

        let event = SandboxEvent {
            sandbox: self.id,
            target: EventTarget::Owner,
            kind,
            payload: payload.clone(),
        };
        self.result_dispatched = true;
        if let Err(e) = dispatcher.dispatch(&event) {
            warn!(sandbox = %self.id, error = %e, "result delivery failed");
        }
    }

    pub(crate) fn clear_message(&mut self) {
        self.message = None;
    }

    pub(crate) fn set_message(&mut self, value: HostValue) {
        self.message = Some(value);
    }

    pub(crate) fn register_inner_onmessage(&mut self) {
        self.inner_onmessage = true;
    }

    /// Delivers the pending message to the inner handler, if registered.
    pub(crate) fn dispatch_message(&self, dispatcher: &mut dyn EventDispatcher) {
        if !self.inner_onmessage {
            return;
        }
        let Some(message) = &self.message else {
            return;
        };
        let event = SandboxEvent {
            sandbox: self.id,
            target: EventTarget::Inner,
            kind: EventKind::Message,
            payload: message.clone(),
        };
        if let Err(e) = dispatcher.dispatch(&event) {
            warn!(sandbox = %self.id, error = %e, "message delivery failed");
        }
    }

    pub(crate) fn attach(&mut self, name: String, value: HostValue) {
        self.attachments.insert(name, value);
    }
}

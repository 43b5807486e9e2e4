//! What running code can reach.
//!
//! A [`SandboxScope`] is the complete set of entry points a
//! [`ScriptExecutor`](crate::host::ScriptExecutor) may use while running a
//! unit inside a sandbox. It borrows the sandbox, its owner's label state, the
//! labeled value store and the clone/dispatch collaborators for the duration
//! of one `execute` call.

use tracing::debug;

use super::unit::{PendingResult, SandboxedContext};
use super::{ContextId, ContextPolicy, SandboxError};
use crate::host::{EventDispatcher, HostValue, StructuredClone};
use crate::label::Label;
use crate::labeled::{LabeledStore, LabeledValue};
use crate::privilege::Privilege;

/// Capability table handed to code running inside a sandbox.
pub struct SandboxScope<'a> {
    sandbox: &'a mut SandboxedContext,
    owner: Option<&'a mut ContextPolicy>,
    labeled: &'a mut LabeledStore,
    cloner: &'a dyn StructuredClone,
    dispatcher: &'a mut dyn EventDispatcher,
}

impl<'a> SandboxScope<'a> {
    pub(crate) fn new(
        sandbox: &'a mut SandboxedContext,
        owner: Option<&'a mut ContextPolicy>,
        labeled: &'a mut LabeledStore,
        cloner: &'a dyn StructuredClone,
        dispatcher: &'a mut dyn EventDispatcher,
    ) -> Self {
        Self {
            sandbox,
            owner,
            labeled,
            cloner,
            dispatcher,
        }
    }

    /// The running sandbox.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.sandbox.id()
    }

    fn transfer(&self, value: &HostValue) -> Result<HostValue, SandboxError> {
        self.cloner
            .transfer(value)
            .map_err(|e| SandboxError::serialization(e.reason()))
    }

    /// Reports `value` as the sandbox's result and notifies the owner.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] if the value cannot be cloned.
    pub fn done(&mut self, value: &HostValue) -> Result<(), SandboxError> {
        let copy = self.transfer(value)?;
        self.sandbox.set_result(PendingResult::Value(copy));
        self.sandbox
            .dispatch_result(self.owner.as_deref_mut(), &mut *self.dispatcher);
        Ok(())
    }

    /// Reports `value` as the sandbox's error and notifies the owner.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] if the value cannot be cloned.
    pub fn fail(&mut self, value: &HostValue) -> Result<(), SandboxError> {
        let copy = self.transfer(value)?;
        self.sandbox.set_result(PendingResult::Error(copy));
        self.sandbox
            .dispatch_result(self.owner.as_deref_mut(), &mut *self.dispatcher);
        Ok(())
    }

    /// Registers the inner message handler and delivers any pending message.
    pub fn set_onmessage(&mut self) {
        self.sandbox.register_inner_onmessage();
        self.sandbox.dispatch_message(&mut *self.dispatcher);
    }

    /// The last message posted into the sandbox.
    #[must_use]
    pub fn message(&self) -> Option<&HostValue> {
        self.sandbox.message()
    }

    /// A capability attached by the owner.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<&HostValue> {
        self.sandbox.attachment(name)
    }

    /// Current privacy label of the sandbox.
    #[must_use]
    pub fn privacy_label(&self) -> Option<&Label> {
        self.sandbox.policy().privacy()
    }

    /// Current trust label of the sandbox.
    #[must_use]
    pub fn trust_label(&self) -> Option<&Label> {
        self.sandbox.policy().trust()
    }

    /// Privacy clearance; the sandbox's static privacy label.
    #[must_use]
    pub fn privacy_clearance(&self) -> Option<&Label> {
        self.sandbox.policy().privacy_clearance()
    }

    /// Trust clearance; the sandbox's static trust label.
    #[must_use]
    pub fn trust_clearance(&self) -> Option<&Label> {
        self.sandbox.policy().trust_clearance()
    }

    /// Raises the sandbox's privacy label.
    ///
    /// # Errors
    ///
    /// See [`ContextPolicy::set_privacy_label`].
    pub fn set_privacy_label(&mut self, label: Label) -> Result<(), SandboxError> {
        self.sandbox.policy_mut().set_privacy_label(label)
    }

    /// Lowers the sandbox's trust label.
    ///
    /// # Errors
    ///
    /// See [`ContextPolicy::set_trust_label`].
    pub fn set_trust_label(&mut self, label: Label) -> Result<(), SandboxError> {
        self.sandbox.policy_mut().set_trust_label(label)
    }

    /// Privileges the sandbox owns.
    #[must_use]
    pub fn privileges(&self) -> &Privilege {
        self.sandbox.policy().privileges()
    }

    /// Adds a privilege the sandbox holds a reference to, e.g. one minted
    /// with [`Privilege::fresh`].
    pub fn own(&mut self, privilege: &Privilege) {
        self.sandbox.policy_mut().own(privilege);
    }

    /// Labels `value` on behalf of the sandbox.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::create`].
    pub fn label_value(
        &self,
        value: HostValue,
        privacy: Label,
        trust: Label,
    ) -> Result<LabeledValue, SandboxError> {
        LabeledValue::create(self.sandbox.policy(), value, privacy, trust)
    }

    /// Reads a labeled value, raising the sandbox's label up to its static
    /// labels if needed.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::read`].
    pub fn unlabel(&mut self, labeled: &LabeledValue) -> Result<HostValue, SandboxError> {
        let id = self.sandbox.id();
        let value = labeled.read(self.sandbox.policy_mut())?.clone();
        debug!(sandbox = %id, "labeled value read inside sandbox");
        Ok(value)
    }

    /// Hands `labeled` to the runtime and returns a handle that can be passed
    /// to other contexts.
    pub fn seal(&mut self, labeled: LabeledValue) -> HostValue {
        self.labeled.seal(labeled)
    }

    /// Resolves a handle from [`SandboxScope::seal`] or
    /// [`SandboxRuntime::seal`](super::SandboxRuntime::seal).
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] for anything that is not a
    /// handle issued by this runtime.
    pub fn unseal(&self, handle: &HostValue) -> Result<LabeledValue, SandboxError> {
        self.labeled.open(handle).cloned()
    }
}

impl std::fmt::Debug for SandboxScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxScope")
            .field("sandbox", &self.sandbox.id())
            .field("has_owner", &self.owner.is_some())
            .finish_non_exhaustive()
    }
}

/// What code running outside any sandbox can reach during
/// [`import`](super::SandboxRuntime::import).
#[derive(Debug)]
pub struct AmbientScope<'a> {
    id: ContextId,
    policy: &'a mut ContextPolicy,
}

impl<'a> AmbientScope<'a> {
    pub(crate) fn new(id: ContextId, policy: &'a mut ContextPolicy) -> Self {
        Self { id, policy }
    }

    /// The importing context.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Label state of the importing context.
    #[must_use]
    pub fn policy(&self) -> &ContextPolicy {
        &*self.policy
    }

    /// Mutable label state of the importing context.
    pub fn policy_mut(&mut self) -> &mut ContextPolicy {
        &mut *self.policy
    }

    /// Labels `value` on behalf of the importing context.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::create`].
    pub fn label_value(
        &mut self,
        value: HostValue,
        privacy: Label,
        trust: Label,
    ) -> Result<LabeledValue, SandboxError> {
        self.policy.enable_sandbox_mode();
        LabeledValue::create(&*self.policy, value, privacy, trust)
    }

    /// Reads a labeled value as the importing context.
    ///
    /// # Errors
    ///
    /// See [`LabeledValue::read`].
    pub fn unlabel(&mut self, labeled: &LabeledValue) -> Result<HostValue, SandboxError> {
        labeled.read(&mut *self.policy).cloned()
    }
}

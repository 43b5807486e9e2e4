//! Per-context label state.
//!
//! Every execution context the runtime knows about has a [`ContextPolicy`]:
//! embedding ("sandbox-mode") contexts that opted into labeling, and the inner
//! context of each sandbox. The record holds the context's current labels, its
//! clearance ceilings, its privileges and the network policies derived so far.
//!
//! # Invariants
//!
//! - The current privacy label only rises and the current trust label only
//!   falls, except through an explicit setter checked against privileges.
//! - When a clearance is set, the current label stays within it.
//! - Applied policies only accumulate.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SandboxError;
use crate::label::{Label, Principal};
use crate::policy::{ContentSecurityPolicy, NetworkPolicy, derive_policy};
use crate::privilege::Privilege;

/// Identifier of an execution context or sandbox within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// How a context participates in label enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Labeling has not been enabled; flows are not tracked.
    Unlabeled,
    /// An embedding context that opted into labeling.
    SandboxMode,
    /// The inner context of a sandbox.
    Sandbox,
}

impl ContextKind {
    /// Returns the kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unlabeled => "unlabeled",
            Self::SandboxMode => "sandbox_mode",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label state of one execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPolicy {
    kind: ContextKind,
    origin: Principal,
    principal: Principal,
    privacy: Option<Label>,
    trust: Option<Label>,
    privacy_clearance: Option<Label>,
    trust_clearance: Option<Label>,
    privileges: Privilege,
    applied_policies: Vec<ContentSecurityPolicy>,
}

impl ContextPolicy {
    /// An embedding context for `origin` with labeling not yet enabled.
    #[must_use]
    pub fn unlabeled(origin: Principal) -> Self {
        Self {
            kind: ContextKind::Unlabeled,
            principal: origin.clone(),
            origin,
            privacy: None,
            trust: None,
            privacy_clearance: None,
            trust_clearance: None,
            privileges: Privilege::empty(),
            applied_policies: Vec::new(),
        }
    }

    /// An embedding context for `origin` with labeling enabled.
    #[must_use]
    pub fn sandbox_mode(origin: Principal) -> Self {
        let mut policy = Self::unlabeled(origin);
        policy.enable_sandbox_mode();
        policy
    }

    /// The inner context of a sandbox labeled `(privacy, trust)`.
    ///
    /// The sandbox runs as a fresh unique principal, owns nothing, has no
    /// current labels until first scheduled, and is cleared up to exactly its
    /// static labels.
    #[must_use]
    pub fn for_sandbox(privacy: &Label, trust: &Label) -> Self {
        let principal = Principal::unique();
        Self {
            kind: ContextKind::Sandbox,
            origin: principal.clone(),
            principal,
            privacy: None,
            trust: None,
            privacy_clearance: Some(privacy.clone()),
            trust_clearance: Some(trust.clone()),
            privileges: Privilege::empty(),
            applied_policies: Vec::new(),
        }
    }

    /// Builds a sandbox-mode context from explicit state, as loaded from
    /// configuration. Clearances are checked against the current labels.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Configuration`] if a current label lies outside
    /// its clearance.
    pub fn configured(
        origin: Principal,
        privacy: Label,
        trust: Label,
        privacy_clearance: Option<Label>,
        trust_clearance: Option<Label>,
        privileges: Privilege,
    ) -> Result<Self, SandboxError> {
        if let Some(clearance) = &privacy_clearance {
            if !clearance.implies(&privacy) {
                return Err(SandboxError::configuration(
                    "privacy label is above the privacy clearance",
                ));
            }
        }
        if let Some(clearance) = &trust_clearance {
            if !trust.implies(clearance) {
                return Err(SandboxError::configuration(
                    "trust label is below the trust clearance",
                ));
            }
        }

        let mut policy = Self::sandbox_mode(origin);
        policy.privacy = Some(privacy);
        policy.trust = Some(trust);
        policy.privacy_clearance = privacy_clearance;
        policy.trust_clearance = trust_clearance;
        policy.privileges.own(&privileges);
        policy.refine();
        Ok(policy)
    }

    /// Turns on labeling: public labels, ownership of the context's origin.
    /// Does nothing if labeling is already on.
    pub fn enable_sandbox_mode(&mut self) {
        if self.kind != ContextKind::Unlabeled {
            return;
        }
        self.kind = ContextKind::SandboxMode;
        self.privacy = Some(Label::public());
        self.trust = Some(Label::public());
        self.privileges = Privilege::for_principal(self.origin.clone());
        debug!(origin = %self.origin, "sandbox mode enabled");
    }

    /// How this context participates in enforcement.
    #[must_use]
    pub const fn kind(&self) -> ContextKind {
        self.kind
    }

    /// `true` once labeling is enabled, for either kind.
    #[must_use]
    pub fn is_sandboxed(&self) -> bool {
        self.kind != ContextKind::Unlabeled
    }

    /// `true` for a sandbox's inner context.
    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        self.kind == ContextKind::Sandbox
    }

    /// `true` for an embedding context with labeling enabled.
    #[must_use]
    pub fn is_sandbox_mode(&self) -> bool {
        self.kind == ContextKind::SandboxMode
    }

    /// The origin the context was created for.
    #[must_use]
    pub const fn origin(&self) -> &Principal {
        &self.origin
    }

    /// The principal the context currently runs as. Replaced by a unique
    /// principal once a sandbox-mode context is restricted.
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Current privacy label.
    #[must_use]
    pub const fn privacy(&self) -> Option<&Label> {
        self.privacy.as_ref()
    }

    /// Current trust label.
    #[must_use]
    pub const fn trust(&self) -> Option<&Label> {
        self.trust.as_ref()
    }

    /// Privacy clearance, the ceiling of the privacy label.
    #[must_use]
    pub const fn privacy_clearance(&self) -> Option<&Label> {
        self.privacy_clearance.as_ref()
    }

    /// Trust clearance, the floor of the trust label.
    #[must_use]
    pub const fn trust_clearance(&self) -> Option<&Label> {
        self.trust_clearance.as_ref()
    }

    /// Owned privileges.
    #[must_use]
    pub const fn privileges(&self) -> &Privilege {
        &self.privileges
    }

    /// Content security policies imposed so far, oldest first.
    #[must_use]
    pub fn applied_policies(&self) -> &[ContentSecurityPolicy] {
        &self.applied_policies
    }

    /// The network policy implied by the current labels and privileges.
    #[must_use]
    pub fn network_policy(&self) -> NetworkPolicy {
        self.privacy.as_ref().map_or(NetworkPolicy::Unrestricted, |privacy| {
            derive_policy(privacy, self.privileges.as_label())
        })
    }

    /// Raises the privacy label to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Configuration`] if the context has no current
    /// label, if `label` together with the privileges does not subsume the
    /// current label, or if it exceeds the privacy clearance.
    pub fn set_privacy_label(&mut self, label: Label) -> Result<(), SandboxError> {
        self.enable_sandbox_mode();
        let current = self
            .privacy
            .as_ref()
            .ok_or_else(|| SandboxError::configuration("no current privacy label"))?;
        if !label.subsumes(self.privileges.as_label(), current) {
            return Err(SandboxError::configuration(
                "label is not above the current label",
            ));
        }
        if let Some(clearance) = &self.privacy_clearance {
            if !clearance.implies(&label) {
                return Err(SandboxError::configuration(
                    "label is not below the current clearance",
                ));
            }
        }
        self.privacy = Some(label);
        self.refine();
        Ok(())
    }

    /// Lowers the trust label to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Configuration`] if the context has no current
    /// label, if the current label together with the privileges does not
    /// subsume `label`, or if `label` falls below the trust clearance.
    pub fn set_trust_label(&mut self, label: Label) -> Result<(), SandboxError> {
        self.enable_sandbox_mode();
        let current = self
            .trust
            .as_ref()
            .ok_or_else(|| SandboxError::configuration("no current trust label"))?;
        if !current.subsumes(self.privileges.as_label(), &label) {
            return Err(SandboxError::configuration(
                "label is not below the current label",
            ));
        }
        if let Some(clearance) = &self.trust_clearance {
            if !label.implies(clearance) {
                return Err(SandboxError::configuration(
                    "label is not above the current clearance",
                ));
            }
        }
        self.trust = Some(label);
        Ok(())
    }

    /// Narrows the privacy clearance.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Configuration`] if `clearance` is not below the
    /// existing clearance (modulo privileges) or falls below the current
    /// privacy label.
    pub fn set_privacy_clearance(&mut self, clearance: Label) -> Result<(), SandboxError> {
        self.enable_sandbox_mode();
        if let Some(old) = &self.privacy_clearance {
            if !old.subsumes(self.privileges.as_label(), &clearance) {
                return Err(SandboxError::configuration(
                    "clearance is not below the current clearance",
                ));
            }
        }
        let current = self
            .privacy
            .as_ref()
            .ok_or_else(|| SandboxError::configuration("no current privacy label"))?;
        if !clearance.implies(current) {
            return Err(SandboxError::configuration(
                "clearance is not above the current label",
            ));
        }
        self.privacy_clearance = Some(clearance);
        Ok(())
    }

    /// Narrows the trust clearance.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Configuration`] if `clearance` is not above the
    /// existing clearance (modulo privileges) or rises above the current trust
    /// label.
    pub fn set_trust_clearance(&mut self, clearance: Label) -> Result<(), SandboxError> {
        self.enable_sandbox_mode();
        if let Some(old) = &self.trust_clearance {
            if !clearance.subsumes(self.privileges.as_label(), old) {
                return Err(SandboxError::configuration(
                    "clearance is not above the current clearance",
                ));
            }
        }
        let current = self
            .trust
            .as_ref()
            .ok_or_else(|| SandboxError::configuration("no current trust label"))?;
        if !current.implies(&clearance) {
            return Err(SandboxError::configuration(
                "clearance is not below the current label",
            ));
        }
        self.trust_clearance = Some(clearance);
        Ok(())
    }

    /// Adds `privilege` to the owned privileges and re-derives policies.
    pub fn own(&mut self, privilege: &Privilege) {
        self.enable_sandbox_mode();
        self.privileges.own(privilege);
        self.refine();
    }

    /// Replaces the owned privileges and re-derives policies.
    pub fn set_privileges(&mut self, privileges: Privilege) {
        self.enable_sandbox_mode();
        self.privileges = privileges;
        self.refine();
    }

    /// Joins data labels into the current labels after a tainting read.
    pub(crate) fn raise(&mut self, privacy: &Label, trust: &Label) {
        let raised_privacy = self
            .privacy
            .as_ref()
            .map_or_else(|| privacy.clone(), |current| current.and(privacy));
        let lowered_trust = self
            .trust
            .as_ref()
            .map_or_else(|| trust.clone(), |current| current.or(trust));
        debug!(
            principal = %self.principal,
            clauses = raised_privacy.clause_count(),
            "raised current label after read"
        );
        self.privacy = Some(raised_privacy);
        self.trust = Some(lowered_trust);
        self.refine();
    }

    /// Seeds the current labels of a clean sandbox.
    pub(crate) fn seed(&mut self, privacy: Label, trust: Label) {
        self.privacy = Some(privacy);
        self.trust = Some(trust);
    }

    /// Recomputes the derived network policy from the effective privacy label.
    ///
    /// A restrictive policy is appended (unless identical to the last one) and
    /// a sandbox-mode context gives up its origin principal for a fresh unique
    /// one. Sandboxes keep their principal.
    pub fn refine(&mut self) -> NetworkPolicy {
        let policy = self.network_policy();
        let Some(csp) = policy.content_security_policy() else {
            return policy;
        };

        if self.kind == ContextKind::SandboxMode {
            self.principal = Principal::unique();
        }
        if self.applied_policies.last() != Some(&csp) {
            debug!(
                kind = %self.kind,
                policy = %csp,
                "appending derived content security policy"
            );
            self.applied_policies.push(csp);
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l(expr: &str) -> Label {
        expr.parse().unwrap()
    }

    fn origin(url: &str) -> Principal {
        Principal::origin(url).unwrap()
    }

    #[test]
    fn enable_sets_public_labels_and_owns_origin() {
        let mut ctx = ContextPolicy::unlabeled(origin("https://a.example"));
        assert!(!ctx.is_sandboxed());
        assert!(ctx.privacy().is_none());

        ctx.enable_sandbox_mode();
        assert!(ctx.is_sandbox_mode());
        assert_eq!(ctx.privacy(), Some(&Label::public()));
        assert_eq!(ctx.trust(), Some(&Label::public()));
        assert_eq!(ctx.privileges().as_label(), &l("(https://a.example)"));
        assert!(ctx.privacy_clearance().is_none());
    }

    #[test]
    fn enable_is_idempotent() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(https://b.example)")).unwrap();
        ctx.enable_sandbox_mode();
        assert_eq!(ctx.privacy(), Some(&l("(https://b.example)")));
    }

    #[test]
    fn sandbox_is_cleared_to_static_labels() {
        let ctx = ContextPolicy::for_sandbox(&l("(a)"), &l("(b)"));
        assert!(ctx.is_sandbox());
        assert!(ctx.principal().is_unique());
        assert_eq!(ctx.privacy_clearance(), Some(&l("(a)")));
        assert_eq!(ctx.trust_clearance(), Some(&l("(b)")));
        assert!(ctx.privacy().is_none());
        assert!(ctx.privileges().is_empty());
    }

    #[test]
    fn privacy_label_only_rises() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(b) & (c)")).unwrap();
        assert!(ctx.set_privacy_label(l("(b)")).is_err());
        ctx.set_privacy_label(l("(b) & (c) & (d)")).unwrap();
    }

    #[test]
    fn privileges_allow_lowering_owned_clauses() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(https://a.example) & (b)")).unwrap();
        ctx.set_privacy_label(l("(b)")).unwrap();
        assert_eq!(ctx.privacy(), Some(&l("(b)")));
    }

    #[test]
    fn privacy_label_bounded_by_clearance() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_clearance(l("(b) & (c)")).unwrap();
        ctx.set_privacy_label(l("(b)")).unwrap();
        assert!(ctx.set_privacy_label(l("(b) & (c) & (d)")).is_err());
    }

    #[test]
    fn trust_label_only_falls() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privileges(Privilege::for_principal(Principal::new("b").unwrap()));
        ctx.set_trust_label(l("(b)")).unwrap();
        ctx.set_privileges(Privilege::empty());
        ctx.set_trust_label(l("(b | c)")).unwrap();
        assert!(ctx.set_trust_label(l("(b)")).is_err());
    }

    #[test]
    fn privacy_clearance_only_narrows() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privileges(Privilege::empty());
        ctx.set_privacy_clearance(l("(b) & (c)")).unwrap();
        ctx.set_privacy_clearance(l("(b)")).unwrap();
        assert!(ctx.set_privacy_clearance(l("(b) & (c)")).is_err());
        assert_eq!(ctx.privacy_clearance(), Some(&l("(b)")));
    }

    #[test]
    fn privacy_clearance_cannot_drop_below_current_label() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(b) & (c)")).unwrap();
        assert!(ctx.set_privacy_clearance(l("(b)")).is_err());
    }

    #[test]
    fn trust_clearance_must_stay_below_current_trust() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        assert!(ctx.set_trust_clearance(l("(b)")).is_err());
        ctx.set_trust_clearance(Label::public()).unwrap();
    }

    #[test]
    fn refine_appends_allow_list_and_replaces_principal() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(https://b.example)")).unwrap();
        assert!(ctx.principal().is_unique());
        assert_eq!(ctx.applied_policies().len(), 1);
        assert_eq!(
            ctx.network_policy(),
            NetworkPolicy::AllowOrigins(vec![origin("https://b.example")])
        );
    }

    #[test]
    fn refine_does_nothing_for_owned_labels() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(https://a.example)")).unwrap();
        assert_eq!(ctx.principal(), &origin("https://a.example"));
        assert!(ctx.applied_policies().is_empty());
    }

    #[test]
    fn refine_does_not_duplicate_policies() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privacy_label(l("(b) & (c)")).unwrap();
        ctx.refine();
        ctx.set_privacy_label(l("(b) & (c) & (d)")).unwrap();
        assert_eq!(ctx.applied_policies().len(), 1);
    }

    #[test]
    fn sandbox_keeps_principal_on_refine() {
        let mut ctx = ContextPolicy::for_sandbox(&l("(b) & (c)"), &Label::public());
        let principal = ctx.principal().clone();
        ctx.seed(l("(b) & (c)"), Label::public());
        ctx.refine();
        assert_eq!(ctx.principal(), &principal);
        assert_eq!(ctx.applied_policies().len(), 1);
    }

    #[test]
    fn configured_rejects_label_outside_clearance() {
        let err = ContextPolicy::configured(
            origin("https://a.example"),
            l("(b) & (c)"),
            Label::public(),
            Some(l("(b)")),
            None,
            Privilege::empty(),
        );
        assert!(matches!(err, Err(SandboxError::Configuration { .. })));
    }

    #[test]
    fn raise_joins_privacy_and_disjoins_trust() {
        let mut ctx = ContextPolicy::sandbox_mode(origin("https://a.example"));
        ctx.set_privileges(Privilege::for_principal(Principal::new("t").unwrap()));
        ctx.set_trust_label(l("(t)")).unwrap();
        ctx.raise(&l("(b)"), &l("(u)"));
        assert_eq!(ctx.privacy(), Some(&l("(b)")));
        assert_eq!(ctx.trust(), Some(&l("(t | u)")));
    }
}

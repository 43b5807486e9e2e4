//! Flow checks between contexts and labeled data.
//!
//! Every cross-context operation is decided by one of four functions:
//!
//! - [`guard_write`]: may a context produce data (or create a sandbox)
//!   labeled `(privacy, trust)`? The label must lie between the context's
//!   current label and its clearance.
//! - [`guard_write_only`]: the gate for already-running sandboxes. Only the
//!   caller's current label is compared with the sandbox's static labels.
//! - [`guard_read`]: may a context observe data labeled `(privacy, trust)`?
//!   With taint allowed, a context whose clearance accommodates the data has
//!   its current label raised instead of being denied.
//! - [`check_read`]: the non-mutating form of the read check.
//!
//! Guards never fail. They return a [`GuardDecision`] and leave it to the
//! call site to turn a denial into an error or a silent drop.
//!
//! # Lattice Directions
//!
//! Privacy flows upward: data may move to a context whose privacy label
//! implies the data's. Trust flows downward: data may move to a context whose
//! trust label is implied by the data's. Privileges discharge clauses on both
//! sides.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::label::Label;
use crate::privilege::Privilege;
use crate::sandbox::{ContextKind, ContextPolicy, SandboxError};

// =============================================================================
// Decisions
// =============================================================================

/// Why a flow was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DenyReason {
    /// The acting context has not enabled labeling.
    NotSandboxed,
    /// A current label or a required clearance is unset.
    MissingLabels,
    /// The target label is not above the acting context's current label.
    BelowCurrentLabel,
    /// The target label exceeds the acting context's clearance.
    AboveClearance,
    /// The reader's label does not cover the data and raising is not allowed.
    TaintNotAllowed,
    /// Raising the reader's label would exceed its clearance.
    TaintAboveClearance,
}

impl DenyReason {
    /// Short human-readable description.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotSandboxed => "context is not sandboxed",
            Self::MissingLabels => "missing labels",
            Self::BelowCurrentLabel => "label not above current label",
            Self::AboveClearance => "label above clearance",
            Self::TaintNotAllowed => "does not subsume, taint not allowed",
            Self::TaintAboveClearance => "raising the label would exceed clearance",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a flow check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum GuardDecision {
    /// The flow is permitted as is.
    Allow,
    /// The flow is permitted and the reader's current label was raised.
    AllowTainted,
    /// The flow is refused.
    Deny(DenyReason),
}

impl GuardDecision {
    /// `true` for [`GuardDecision::Allow`] and [`GuardDecision::AllowTainted`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Deny(_))
    }

    /// The denial reason, if refused.
    #[must_use]
    pub const fn deny_reason(self) -> Option<DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow | Self::AllowTainted => None,
        }
    }

    /// Converts a denial into [`SandboxError::PolicyDenied`] for `operation`.
    ///
    /// # Errors
    ///
    /// Returns the policy denial if the decision is [`GuardDecision::Deny`].
    pub fn into_result(self, operation: &'static str) -> Result<(), SandboxError> {
        match self {
            Self::Deny(reason) => Err(SandboxError::denied(operation, reason)),
            Self::Allow | Self::AllowTainted => Ok(()),
        }
    }
}

impl fmt::Display for GuardDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::AllowTainted => f.write_str("allow (label raised)"),
            Self::Deny(reason) => write!(f, "deny: {reason}"),
        }
    }
}

// =============================================================================
// Checks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearanceFault {
    Missing,
    Exceeded,
}

/// Whether `(privacy, trust)` lies within the context's clearance.
///
/// A sandbox-mode context treats an unset clearance dimension as unbounded;
/// a sandbox without clearance is refused.
fn within_clearance(
    ctx: &ContextPolicy,
    privacy: &Label,
    trust: &Label,
    privs: &Label,
) -> Result<(), ClearanceFault> {
    let (privacy_ok, trust_ok) = match ctx.kind() {
        ContextKind::Unlabeled => return Err(ClearanceFault::Missing),
        ContextKind::SandboxMode => (
            ctx.privacy_clearance()
                .is_none_or(|clearance| clearance.subsumes(privs, privacy)),
            ctx.trust_clearance()
                .is_none_or(|clearance| trust.subsumes(privs, clearance)),
        ),
        ContextKind::Sandbox => {
            let (Some(privacy_clearance), Some(trust_clearance)) =
                (ctx.privacy_clearance(), ctx.trust_clearance())
            else {
                return Err(ClearanceFault::Missing);
            };
            (
                privacy_clearance.subsumes(privs, privacy),
                trust.subsumes(privs, trust_clearance),
            )
        },
    };

    if privacy_ok && trust_ok {
        Ok(())
    } else {
        Err(ClearanceFault::Exceeded)
    }
}

/// Compares the acting context's current label with a target label.
fn above_current(
    ctx: &ContextPolicy,
    privacy: &Label,
    trust: &Label,
    privs: &Label,
) -> Result<(), DenyReason> {
    if !ctx.is_sandboxed() {
        return Err(DenyReason::NotSandboxed);
    }
    let (Some(current_privacy), Some(current_trust)) = (ctx.privacy(), ctx.trust()) else {
        return Err(DenyReason::MissingLabels);
    };
    if privacy.subsumes(privs, current_privacy) && current_trust.subsumes(privs, trust) {
        Ok(())
    } else {
        Err(DenyReason::BelowCurrentLabel)
    }
}

/// May `ctx`, owning `privs`, write data labeled `(privacy, trust)`?
///
/// The label must be at or above the context's current label and within its
/// clearance. Nothing is mutated.
#[must_use]
pub fn guard_write(
    ctx: &ContextPolicy,
    privacy: &Label,
    trust: &Label,
    privs: &Privilege,
) -> GuardDecision {
    let privs = privs.as_label();
    if let Err(reason) = above_current(ctx, privacy, trust, privs) {
        return GuardDecision::Deny(reason);
    }
    match within_clearance(ctx, privacy, trust, privs) {
        Ok(()) => GuardDecision::Allow,
        Err(ClearanceFault::Missing) => GuardDecision::Deny(DenyReason::MissingLabels),
        Err(ClearanceFault::Exceeded) => GuardDecision::Deny(DenyReason::AboveClearance),
    }
}

/// May `caller`, owning `privs`, send into a running sandbox labeled
/// `(target_privacy, target_trust)`?
///
/// Only the caller's current label is checked. The sandbox's clearance is its
/// static label, which the target label already is.
#[must_use]
pub fn guard_write_only(
    caller: &ContextPolicy,
    target_privacy: &Label,
    target_trust: &Label,
    privs: &Privilege,
) -> GuardDecision {
    match above_current(caller, target_privacy, target_trust, privs.as_label()) {
        Ok(()) => GuardDecision::Allow,
        Err(reason) => GuardDecision::Deny(reason),
    }
}

/// The reader's effective current labels. A context without labeling reads
/// as its own principal with public trust and may never be tainted.
fn reader_labels(reader: &ContextPolicy) -> Option<(Label, Label)> {
    if !reader.is_sandboxed() {
        return Some((Label::from_principal(reader.principal().clone()), Label::public()));
    }
    Some((reader.privacy()?.clone(), reader.trust()?.clone()))
}

/// May `reader`, owning `privs`, observe data labeled `(privacy, trust)`
/// without changing its label?
#[must_use]
pub fn check_read(
    reader: &ContextPolicy,
    privacy: &Label,
    trust: &Label,
    privs: &Privilege,
) -> GuardDecision {
    let Some((current_privacy, current_trust)) = reader_labels(reader) else {
        return GuardDecision::Deny(DenyReason::MissingLabels);
    };
    let privs = privs.as_label();
    if current_privacy.subsumes(privs, privacy) && trust.subsumes(privs, &current_trust) {
        GuardDecision::Allow
    } else {
        GuardDecision::Deny(DenyReason::TaintNotAllowed)
    }
}

/// May `reader`, owning `privs`, observe data labeled `(privacy, trust)`?
///
/// If the reader's label already covers the data the read is allowed. If not,
/// and `allow_taint` is set, the reader's current label is raised to the
/// join with the data label provided the result stays within its clearance.
#[must_use]
pub fn guard_read(
    reader: &mut ContextPolicy,
    privacy: &Label,
    trust: &Label,
    privs: &Privilege,
    allow_taint: bool,
) -> GuardDecision {
    let direct = check_read(reader, privacy, trust, privs);
    if direct.is_allowed() || !reader.is_sandboxed() {
        return direct;
    }
    if !allow_taint {
        return GuardDecision::Deny(DenyReason::TaintNotAllowed);
    }

    match within_clearance(reader, privacy, trust, privs.as_label()) {
        Ok(()) => {
            reader.raise(privacy, trust);
            debug!(kind = %reader.kind(), "read allowed by raising the current label");
            GuardDecision::AllowTainted
        },
        Err(ClearanceFault::Missing) => GuardDecision::Deny(DenyReason::MissingLabels),
        Err(ClearanceFault::Exceeded) => GuardDecision::Deny(DenyReason::TaintAboveClearance),
    }
}

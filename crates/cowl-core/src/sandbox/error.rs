//! Error type for sandbox runtime operations.

use thiserror::Error;

use super::ContextId;
use crate::guard::DenyReason;
use crate::label::LabelError;
use crate::privilege::PrivilegeError;

/// Errors surfaced to the embedding by [`SandboxRuntime`](super::SandboxRuntime)
/// and to sandboxed code through [`SandboxScope`](super::SandboxScope).
///
/// Flow checks themselves never fail; a [`GuardDecision::Deny`] becomes
/// [`SandboxError::PolicyDenied`] only where the operation is
/// embedding-initiated or the sandbox is still clean.
///
/// [`GuardDecision::Deny`]: crate::guard::GuardDecision::Deny
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// A flow check rejected the operation.
    #[error("{operation} denied: {reason}")]
    PolicyDenied {
        /// The operation that was attempted.
        operation: &'static str,
        /// Why the guard refused it.
        reason: DenyReason,
    },

    /// A label argument was missing or could not be interpreted.
    #[error("malformed label: {reason}")]
    MalformedLabel {
        /// What was wrong with it.
        reason: String,
    },

    /// A value could not be cloned across the context boundary.
    #[error("value could not be transferred: {reason}")]
    Serialization {
        /// Why cloning or materializing failed.
        reason: String,
    },

    /// A label, clearance or privilege change violated the lattice rules.
    #[error("invalid label configuration: {reason}")]
    Configuration {
        /// The violated rule.
        reason: String,
    },

    /// The sandbox has been destroyed.
    #[error("sandbox {id} has been destroyed")]
    Destroyed {
        /// The destroyed sandbox.
        id: ContextId,
    },

    /// No context or sandbox with this identifier exists.
    #[error("unknown context {id}")]
    UnknownContext {
        /// The identifier that was looked up.
        id: ContextId,
    },

    /// The operation targets a context that is not a sandbox.
    #[error("context {id} is not a sandbox")]
    NotASandbox {
        /// The identifier that was looked up.
        id: ContextId,
    },

    /// Fetching script source failed.
    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        /// The requested URL.
        url: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// The script executor failed outside of sandboxed code.
    #[error("execution failed: {reason}")]
    Execution {
        /// The executor's message.
        reason: String,
    },

    /// Building a label or principal failed.
    #[error(transparent)]
    Label(#[from] LabelError),

    /// Delegating a privilege failed.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl SandboxError {
    /// Creates a policy denial.
    #[must_use]
    pub const fn denied(operation: &'static str, reason: DenyReason) -> Self {
        Self::PolicyDenied { operation, reason }
    }

    /// Creates a malformed label error.
    #[must_use]
    pub fn malformed_label(reason: impl Into<String>) -> Self {
        Self::MalformedLabel {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`SandboxError::PolicyDenied`].
    #[must_use]
    pub const fn is_policy_denial(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. })
    }

    /// The denial reason, if this is a policy denial.
    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::PolicyDenied { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

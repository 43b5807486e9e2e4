//! # cowl-core
//!
//! Information-flow control for sandboxed script execution.
//!
//! Every execution context carries a *privacy* label (who may learn what it
//! has seen) and a *trust* label (who vouches for what it produces). Labels
//! are conjunctions of disjunctions of principals, kept in canonical form, and
//! data may only flow from a context to one whose labels are at least as
//! restrictive. Privileges let a context declassify on behalf of the
//! principals it owns.
//!
//! ## Core Concepts
//!
//! - [`Label`]: a CNF formula over [`Principal`]s with `and`, `or` and a
//!   privilege-aware `subsumes` order
//! - [`Privilege`]: a label whose clauses its holder may discharge
//! - [`guard`]: pure checks deciding whether a write or read may happen, and
//!   whether a read must raise the reader's label first
//! - [`SandboxRuntime`]: contexts, sandboxes, scheduling, messaging and result
//!   delivery, each gated by a guard
//! - [`policy`]: the network policy implied by a context's label
//! - [`LabeledValue`]: data that carries its own labels between contexts,
//!   passed to scripts as an opaque handle
//!
//! Script engines, networking and event loops stay outside the crate behind
//! the traits in [`host`].
//!
//! ## Example
//!
//! ```rust
//! use cowl_core::{Label, Principal, Privilege};
//!
//! let mail: Label = "(https://mail.example) & (https://contacts.example)".parse()?;
//! let contacts: Label = "(https://contacts.example)".parse()?;
//!
//! // Without privileges, mail data may not flow to a contacts-only context.
//! assert!(!contacts.subsumes(&Label::public(), &mail));
//!
//! // The mail origin can declassify its own clause.
//! let privs = Privilege::for_principal(Principal::origin("https://mail.example")?);
//! assert!(contacts.subsumes(privs.as_label(), &mail));
//! # Ok::<(), cowl_core::label::LabelError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod guard;
pub mod host;
pub mod label;
pub mod labeled;
pub mod policy;
pub mod privilege;
pub mod sandbox;

pub use config::{ConfigError, CowlConfig};
pub use guard::{DenyReason, GuardDecision};
pub use label::{Clause, Label, LabelError, Principal};
pub use labeled::{LabeledStore, LabeledValue};
pub use policy::{ContentSecurityPolicy, NetworkPolicy};
pub use privilege::{Privilege, PrivilegeError};
pub use sandbox::{ContextId, ContextPolicy, SandboxError, SandboxRuntime};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::guard::{DenyReason, GuardDecision, guard_read, guard_write};
    pub use crate::host::{
        CompiledUnit, EventDispatcher, HostServices, HostValue, ScriptExecutor, SourceFetcher,
        StructuredClone,
    };
    pub use crate::label::{Clause, Label, LabelError, Principal};
    pub use crate::labeled::{LabeledStore, LabeledValue};
    pub use crate::privilege::Privilege;
    pub use crate::sandbox::{
        ContextId, ContextPolicy, DoneHandlers, PendingResult, ReadMode, SandboxError,
        SandboxRuntime, SandboxScope,
    };
}

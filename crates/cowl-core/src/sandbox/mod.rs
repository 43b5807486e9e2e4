//! Sandboxes and the runtime that mediates between them.
//!
//! A sandbox is an isolated execution unit with fixed privacy and trust
//! labels. The embedding context that creates it becomes its owner; code runs
//! inside it through a [`ScriptExecutor`](crate::host::ScriptExecutor) that
//! only ever sees a [`SandboxScope`].
//!
//! # Lifecycle
//!
//! ```text
//!     create_sandbox            first schedule
//!   ───────────────► ┌───────┐ ───────────────► ┌────────┐
//!                    │ Clean │                  │ Active │◄──┐
//!                    └───┬───┘                  └───┬────┘   │ schedule
//!                        │ destroy                  │────────┘
//!                        ▼                          │ destroy
//!                  ┌───────────┐                    │
//!                  │ Destroyed │◄───────────────────┘
//!                  └───────────┘
//! ```
//!
//! | State | Write into sandbox denied | Schedule |
//! |-------|---------------------------|----------|
//! | Clean | error | seeds current labels from the caller |
//! | Active | logged no-op | write check against the caller |
//! | Destroyed | [`SandboxError::Destroyed`] | [`SandboxError::Destroyed`] |
//!
//! # Example
//!
//! ```rust
//! use cowl_core::host::{CompiledUnit, HostServices, HostValue, ScriptExecutor};
//! use cowl_core::label::{Label, Principal};
//! use cowl_core::sandbox::{
//!     PendingResult, ReadMode, SandboxError, SandboxRuntime, SandboxScope,
//! };
//!
//! struct Answer;
//!
//! impl ScriptExecutor for Answer {
//!     fn execute(
//!         &mut self,
//!         scope: &mut SandboxScope<'_>,
//!         _unit: &CompiledUnit,
//!     ) -> Result<(), HostValue> {
//!         scope
//!             .done(&HostValue::from(42_i64))
//!             .map_err(|e| HostValue::from(e.to_string()))
//!     }
//! }
//!
//! # fn main() -> Result<(), SandboxError> {
//! let mut runtime = SandboxRuntime::new(HostServices::new(Answer));
//! let page = runtime.create_context(Principal::origin("https://a.example")?);
//! let secret: Label = "(https://b.example)".parse()?;
//!
//! let sandbox = runtime.create_sandbox(page, secret.clone(), Label::public())?;
//! runtime.schedule(page, sandbox, "")?;
//!
//! let result = runtime.get_result(page, sandbox, ReadMode::Taint)?;
//! assert_eq!(result, PendingResult::Value(HostValue::from(42_i64)));
//! assert_eq!(runtime.context(page)?.privacy(), Some(&secret));
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod runtime;
mod scope;
mod unit;

pub use context::{ContextId, ContextKind, ContextPolicy};
pub use error::SandboxError;
pub use runtime::{SandboxRuntime, ScheduleOutcome};
pub use scope::{AmbientScope, SandboxScope};
pub use unit::{DoneHandlers, PendingResult, ReadMode, SandboxState, SandboxedContext};

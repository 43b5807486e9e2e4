//! Shared fixtures for runtime integration tests.
//!
//! [`ScriptedExecutor`] runs "scripts" made of one command per line:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `done <json>` | report a value |
//! | `try_done <json>` | report a value, recording a failure instead of throwing |
//! | `fail <json>` | report an error |
//! | `throw <json>` | throw, ending the unit |
//! | `onmessage` | register the inner message handler |
//! | `echo` | report the pending message, or `null` |
//! | `attachment <name>` | report an attached capability |
//! | `raise <label>` | raise the current privacy label |
//! | `unlabel <name>` | open the labeled handle attached as `<name>` and report its value |
//! | `label <label> <json>` | label a value and report its handle |
//!
//! A failing command throws its error message.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};

use cowl_core::host::{
    CompiledUnit, HostServices, HostValue, JsonStructuredClone, NoFetch, RecordingDispatcher,
    ScriptExecutor, SourceFetcher,
};
use cowl_core::label::{Label, Principal};
use cowl_core::sandbox::{AmbientScope, ContextId, SandboxError, SandboxRuntime, SandboxScope};

/// Executes line scripts and records which units ran.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    ran: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<SandboxError>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the units executed so far, in order.
    pub fn ran(&self) -> Vec<String> {
        self.ran
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failures recorded by `try_done`, in order.
    pub fn errors(&self) -> Vec<SandboxError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_error(&self, err: SandboxError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    fn record(&self, unit: &CompiledUnit) {
        self.ran
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(unit.name().to_string());
    }
}

fn json(arg: &str) -> HostValue {
    serde_json::from_str::<serde_json::Value>(arg)
        .map_or_else(|_| HostValue::from(arg), HostValue::from)
}

fn thrown(err: impl std::fmt::Display) -> HostValue {
    HostValue::from(err.to_string())
}

fn label(arg: &str) -> Result<Label, HostValue> {
    arg.parse().map_err(thrown)
}

/// Splits `"<label> <rest>"` where the label may contain spaces inside
/// parentheses.
fn split_label(arg: &str) -> (&str, &str) {
    let mut depth = 0_i32;
    for (i, c) in arg.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ' ' if depth == 0 => return (&arg[..i], arg[i + 1..].trim()),
            _ => {},
        }
    }
    (arg, "")
}

impl ScriptExecutor for ScriptedExecutor {
    fn execute(
        &mut self,
        scope: &mut SandboxScope<'_>,
        unit: &CompiledUnit,
    ) -> Result<(), HostValue> {
        self.record(unit);
        for line in unit.source().lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "done" => scope.done(&json(arg)).map_err(thrown)?,
                "try_done" => {
                    if let Err(err) = scope.done(&json(arg)) {
                        self.record_error(err);
                    }
                },
                "fail" => scope.fail(&json(arg)).map_err(thrown)?,
                "throw" => return Err(json(arg)),
                "onmessage" => scope.set_onmessage(),
                "echo" => {
                    let message = scope.message().cloned().unwrap_or_else(HostValue::null);
                    scope.done(&message).map_err(thrown)?;
                },
                "attachment" => {
                    let value = scope
                        .attachment(arg)
                        .cloned()
                        .ok_or_else(|| thrown(format!("no attachment {arg}")))?;
                    scope.done(&value).map_err(thrown)?;
                },
                "raise" => scope.set_privacy_label(label(arg)?).map_err(thrown)?,
                "unlabel" => {
                    let carried = scope
                        .attachment(arg)
                        .cloned()
                        .ok_or_else(|| thrown(format!("no attachment {arg}")))?;
                    let labeled = scope.unseal(&carried).map_err(thrown)?;
                    let value = scope.unlabel(&labeled).map_err(thrown)?;
                    scope.done(&value).map_err(thrown)?;
                },
                "label" => {
                    let (privacy, value) = split_label(arg);
                    let labeled = scope
                        .label_value(json(value), label(privacy)?, Label::public())
                        .map_err(thrown)?;
                    let carried = scope.seal(labeled);
                    scope.done(&carried).map_err(thrown)?;
                },
                other => return Err(thrown(format!("unknown command {other}"))),
            }
        }
        Ok(())
    }

    fn execute_ambient(
        &mut self,
        scope: &mut AmbientScope<'_>,
        unit: &CompiledUnit,
    ) -> Result<(), HostValue> {
        self.record(unit);
        for line in unit.source().lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "raise" => scope
                    .policy_mut()
                    .set_privacy_label(label(arg)?)
                    .map_err(thrown)?,
                "throw" => return Err(json(arg)),
                other => return Err(thrown(format!("unknown command {other}"))),
            }
        }
        Ok(())
    }
}

/// A runtime wired to a scripted executor and a recording dispatcher.
pub struct Harness {
    pub runtime: SandboxRuntime,
    pub executor: ScriptedExecutor,
    pub events: RecordingDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fetcher(NoFetch)
    }

    pub fn with_fetcher(fetcher: impl SourceFetcher + 'static) -> Self {
        Self::build(|host| host.with_fetcher(fetcher))
    }

    /// A harness whose structured clone rejects encodings over `max_bytes`.
    pub fn with_clone_limit(max_bytes: usize) -> Self {
        Self::build(|host| host.with_cloner(JsonStructuredClone::with_limit(max_bytes)))
    }

    fn build(configure: impl FnOnce(HostServices) -> HostServices) -> Self {
        let executor = ScriptedExecutor::new();
        let events = RecordingDispatcher::new();
        let host = configure(HostServices::new(executor.clone())).with_dispatcher(events.clone());
        Self {
            runtime: SandboxRuntime::new(host),
            executor,
            events,
        }
    }

    /// Registers a context for `origin` with labeling enabled.
    pub fn page(&mut self, origin: &str) -> ContextId {
        let id = self
            .runtime
            .create_context(Principal::origin(origin).unwrap());
        self.runtime.context_mut(id).unwrap().enable_sandbox_mode();
        id
    }
}

pub fn l(expr: &str) -> Label {
    expr.parse().unwrap()
}

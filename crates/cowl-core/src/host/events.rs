//! Event delivery to handlers registered on either side of a sandbox.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::HostValue;
use crate::sandbox::ContextId;

/// Which side of the sandbox boundary an event is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// The handler the owner registered with `on_done`.
    Owner,
    /// The handler sandboxed code registered with `set_onmessage`.
    Inner,
}

/// Event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A result value or a posted message.
    Message,
    /// An error result.
    Error,
}

/// A single delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxEvent {
    /// The sandbox the event concerns.
    pub sandbox: ContextId,
    /// Receiving side.
    pub target: EventTarget,
    /// Event name.
    pub kind: EventKind,
    /// The cloned value carried by the event.
    pub payload: HostValue,
}

/// The dispatcher could not deliver an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event delivery failed: {reason}")]
pub struct DispatchError {
    /// Why delivery failed.
    pub reason: String,
}

/// Delivers events to registered handlers.
///
/// Delivery is fire-and-forget. The runtime only logs failures.
pub trait EventDispatcher {
    /// Delivers `event` synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the handler could not be invoked.
    fn dispatch(&mut self, event: &SandboxEvent) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs deliveries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl EventDispatcher for LoggingDispatcher {
    fn dispatch(&mut self, event: &SandboxEvent) -> Result<(), DispatchError> {
        debug!(
            sandbox = %event.sandbox,
            target = ?event.target,
            kind = ?event.kind,
            "event delivered"
        );
        Ok(())
    }
}

/// Dispatcher that records every delivery in a shared log.
///
/// Clones share the same log, so an embedding can hand one clone to the
/// runtime and keep another to inspect deliveries.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    log: Arc<Mutex<Vec<SandboxEvent>>>,
}

impl RecordingDispatcher {
    /// Creates a dispatcher with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every event delivered so far.
    #[must_use]
    pub fn events(&self) -> Vec<SandboxEvent> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns every recorded event.
    pub fn drain(&self) -> Vec<SandboxEvent> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` if nothing has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&mut self, event: &SandboxEvent) -> Result<(), DispatchError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

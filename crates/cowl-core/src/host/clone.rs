//! Structured clone: moving values between contexts by copy.

use thiserror::Error;

use super::{HostValue, PortableBuffer};

/// Default upper bound on an encoded value.
pub const MAX_CLONE_BYTES: usize = 16 * 1024 * 1024;

/// A value could not be cloned or materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct CloneError {
    reason: String,
}

impl CloneError {
    /// Creates a clone error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the operation failed.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Copies values out of one context and materializes them in another.
///
/// Both steps are all-or-nothing: a failure leaves no partial value behind.
pub trait StructuredClone {
    /// Encodes `value` into a context-independent buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError`] if the value cannot be encoded.
    fn clone_value(&self, value: &HostValue) -> Result<PortableBuffer, CloneError>;

    /// Decodes `buffer` into a fresh value in the receiving context.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError`] if the buffer cannot be decoded.
    fn materialize(&self, buffer: &PortableBuffer) -> Result<HostValue, CloneError>;

    /// Clones and materializes in one step.
    ///
    /// # Errors
    ///
    /// Propagates either step's [`CloneError`].
    fn transfer(&self, value: &HostValue) -> Result<HostValue, CloneError> {
        let buffer = self.clone_value(value)?;
        self.materialize(&buffer)
    }
}

/// [`StructuredClone`] over JSON bytes with a size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonStructuredClone {
    max_bytes: usize,
}

impl JsonStructuredClone {
    /// A cloner accepting encodings up to `max_bytes`.
    #[must_use]
    pub const fn with_limit(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// The configured size limit.
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn check_size(&self, len: usize) -> Result<(), CloneError> {
        if len > self.max_bytes {
            return Err(CloneError::new(format!(
                "encoded value is {len} bytes, limit is {}",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

impl Default for JsonStructuredClone {
    fn default() -> Self {
        Self::with_limit(MAX_CLONE_BYTES)
    }
}

impl StructuredClone for JsonStructuredClone {
    fn clone_value(&self, value: &HostValue) -> Result<PortableBuffer, CloneError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CloneError::new(e.to_string()))?;
        self.check_size(bytes.len())?;
        Ok(PortableBuffer::from_bytes(bytes))
    }

    fn materialize(&self, buffer: &PortableBuffer) -> Result<HostValue, CloneError> {
        self.check_size(buffer.len())?;
        serde_json::from_slice(buffer.as_bytes()).map_err(|e| CloneError::new(e.to_string()))
    }
}

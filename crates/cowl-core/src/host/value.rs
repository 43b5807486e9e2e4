//! Values crossing context boundaries.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxError;

/// A script-visible value.
///
/// The runtime never interprets values; it only moves them between contexts
/// through a [`StructuredClone`](super::StructuredClone). JSON is the
/// interchange model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostValue(serde_json::Value);

impl HostValue {
    /// Wraps anything convertible to JSON.
    #[must_use]
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    /// The `null` value.
    #[must_use]
    pub const fn null() -> Self {
        Self(serde_json::Value::Null)
    }

    /// Serializes `value` into a host value.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] if `value` has no JSON form.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, SandboxError> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|e| SandboxError::serialization(e.to_string()))
    }

    /// Deserializes the value into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] if the value does not have the
    /// shape of `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SandboxError> {
        T::deserialize(&self.0).map_err(|e| SandboxError::serialization(e.to_string()))
    }

    /// Borrows the JSON representation.
    #[must_use]
    pub const fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Returns the JSON representation.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// The string content, if the value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// `true` for `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self(value.into())
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self(value.into())
    }
}

/// The context-independent form of a [`HostValue`] produced by
/// [`StructuredClone::clone_value`](super::StructuredClone::clone_value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortableBuffer(Vec<u8>);

impl PortableBuffer {
    /// Wraps encoded bytes.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no bytes were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

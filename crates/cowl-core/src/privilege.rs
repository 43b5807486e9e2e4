//! Privileges: the authority to declassify clauses of a label.
//!
//! A [`Privilege`] is itself a [`Label`]. Owning the privilege for principal
//! `p` is the label `(p)`; combining privileges is conjunction. When a guard
//! compares labels it passes the acting context's privilege label as the
//! `privs` argument of [`Label::subsumes`], so any clause the privilege
//! implies is treated as already satisfied.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::label::{Clause, Label, Principal};

/// Errors from privilege manipulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PrivilegeError {
    /// The privilege does not imply the label being delegated.
    #[error("cannot delegate '{requested}' from privilege '{held}'")]
    NotDelegable {
        /// The label the caller asked to delegate.
        requested: String,
        /// The privilege actually held.
        held: String,
    },
}

/// A set of owned principals, represented as a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(Label);

impl Privilege {
    /// The privilege that owns nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Label::public())
    }

    /// Ownership of a single principal.
    #[must_use]
    pub fn for_principal(principal: Principal) -> Self {
        Self(Label::from_principal(principal))
    }

    /// Ownership of every principal yielded.
    #[must_use]
    pub fn for_principals(principals: impl IntoIterator<Item = Principal>) -> Self {
        Self(Label::from_clauses(principals.into_iter().map(Clause::singleton)))
    }

    /// Wraps an arbitrary label as a privilege.
    ///
    /// Only code that already holds authority over `label` should mint such a
    /// privilege; sandboxed code obtains privileges through
    /// [`Privilege::delegate`] or a grant from its owner.
    #[must_use]
    pub const fn from_label(label: Label) -> Self {
        Self(label)
    }

    /// Mints a privilege over a brand new unique principal.
    #[must_use]
    pub fn fresh() -> Self {
        Self::for_principal(Principal::unique())
    }

    /// The label passed as `privs` to subsumption checks.
    #[must_use]
    pub const fn as_label(&self) -> &Label {
        &self.0
    }

    /// Consumes the privilege and returns its label.
    #[must_use]
    pub fn into_label(self) -> Label {
        self.0
    }

    /// `true` if nothing is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds `incoming` to the owned set.
    pub fn own(&mut self, incoming: &Self) {
        self.0 = self.0.and(&incoming.0);
    }

    /// Returns the union of both privileges without modifying either.
    #[must_use]
    pub fn combine(&self, incoming: &Self) -> Self {
        Self(self.0.and(&incoming.0))
    }

    /// Whether the privilege implies `clause`.
    #[must_use]
    pub fn discharges(&self, clause: &Clause) -> bool {
        self.0.discharges(clause)
    }

    /// Derives a weaker privilege covering `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::NotDelegable`] unless this privilege implies
    /// `label`.
    pub fn delegate(&self, label: &Label) -> Result<Self, PrivilegeError> {
        if self.0.implies(label) {
            Ok(Self(label.clone()))
        } else {
            Err(PrivilegeError::NotDelegable {
                requested: label.to_string(),
                held: self.0.to_string(),
            })
        }
    }
}

impl From<Label> for Privilege {
    fn from(label: Label) -> Self {
        Self(label)
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

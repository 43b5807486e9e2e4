//! Confidentiality and integrity labels in conjunctive normal form.
//!
//! A [`Label`] is either the reserved maximal element `TOP` or a conjunction
//! of [`Clause`]s, each clause being a disjunction of [`Principal`]s. The empty
//! conjunction is the public (bottom) label.
//!
//! # Canonical Form
//!
//! Every constructor and combinator returns a simplified label:
//!
//! - no duplicate principals within a clause (clauses are sets);
//! - no duplicate clauses (labels are sets of clauses);
//! - no clause is a superset of another clause (CNF absorption: `(a) & (a | b)`
//!   simplifies to `(a)`).
//!
//! Structural equality on canonical labels therefore coincides with logical
//! equivalence for the formulas this module can build.
//!
//! # Ordering
//!
//! Labels are ordered by implication. `a.subsumes(&privs, &b)` holds when
//! `a ∧ privs ⇒ b`: a clause of `b` is discharged by any clause of `a` or of
//! `privs` that is a subset of it. Owning a privilege therefore lets a context
//! ignore every clause that mentions one of its principals.

mod parse;
pub mod principal;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use principal::{MAX_PRINCIPAL_LEN, Principal};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of clauses accepted from a parsed label expression.
pub const MAX_PARSED_CLAUSES: usize = 256;

/// Maximum number of principals accepted in a single parsed clause.
pub const MAX_PARSED_CLAUSE_LEN: usize = 64;

/// Maximum length of a label expression accepted by the parser.
pub const MAX_EXPRESSION_LEN: usize = 64 * 1024;

// =============================================================================
// Errors
// =============================================================================

/// Errors from principal and label construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LabelError {
    /// A principal name failed validation.
    #[error("invalid principal '{name}': {reason}")]
    InvalidPrincipal {
        /// The offending name (truncated for display).
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A clause was constructed without any principals.
    #[error("a clause must contain at least one principal")]
    EmptyClause,

    /// A label expression could not be parsed.
    #[error("label parse error at offset {offset}: {reason}")]
    Parse {
        /// Byte offset in the input where parsing failed.
        offset: usize,
        /// What went wrong.
        reason: String,
    },
}

// =============================================================================
// Clause
// =============================================================================

/// A non-empty disjunction of principals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clause(BTreeSet<Principal>);

impl Clause {
    /// Builds a clause from one or more principals.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::EmptyClause`] if the iterator yields nothing.
    pub fn new(principals: impl IntoIterator<Item = Principal>) -> Result<Self, LabelError> {
        let set: BTreeSet<Principal> = principals.into_iter().collect();
        if set.is_empty() {
            return Err(LabelError::EmptyClause);
        }
        Ok(Self(set))
    }

    /// A clause naming a single principal.
    #[must_use]
    pub fn singleton(principal: Principal) -> Self {
        Self(BTreeSet::from([principal]))
    }

    /// The principals of this disjunction.
    #[must_use]
    pub const fn principals(&self) -> &BTreeSet<Principal> {
        &self.0
    }

    /// Whether `principal` appears in the disjunction.
    #[must_use]
    pub fn contains(&self, principal: &Principal) -> bool {
        self.0.contains(principal)
    }

    /// Number of principals in the disjunction. Never zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; clauses are non-empty by construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self ⇒ other` for disjunctions: every principal of `self` is in `other`.
    #[must_use]
    pub fn implies(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}

impl From<Principal> for Clause {
    fn from(principal: Principal) -> Self {
        Self::singleton(principal)
    }
}

// =============================================================================
// Label
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Repr {
    Top,
    Clauses(BTreeSet<Clause>),
}

/// A CNF formula over principals, or `TOP`.
///
/// See the [module documentation](self) for the canonical form and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(Repr);

impl Label {
    /// The public label: no clauses, the bottom of the lattice.
    #[must_use]
    pub const fn public() -> Self {
        Self(Repr::Clauses(BTreeSet::new()))
    }

    /// Alias of [`Label::public`].
    #[must_use]
    pub const fn empty() -> Self {
        Self::public()
    }

    /// The reserved maximal label. It subsumes everything and only itself
    /// subsumes it.
    #[must_use]
    pub const fn top() -> Self {
        Self(Repr::Top)
    }

    /// A label with one singleton clause.
    #[must_use]
    pub fn from_principal(principal: Principal) -> Self {
        Self::from_clause(Clause::singleton(principal))
    }

    /// A label with exactly one clause.
    #[must_use]
    pub fn from_clause(clause: Clause) -> Self {
        Self(Repr::Clauses(BTreeSet::from([clause])))
    }

    /// The conjunction of `clauses`, simplified.
    #[must_use]
    pub fn from_clauses(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Self(Repr::Clauses(simplify(clauses.into_iter().collect())))
    }

    /// `true` for the public label.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(&self.0, Repr::Clauses(c) if c.is_empty())
    }

    /// `true` for `TOP`.
    #[must_use]
    pub const fn is_top(&self) -> bool {
        matches!(self.0, Repr::Top)
    }

    /// Iterates the canonical clauses. `TOP` has none.
    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        let clauses = match &self.0 {
            Repr::Top => None,
            Repr::Clauses(c) => Some(c.iter()),
        };
        clauses.into_iter().flatten()
    }

    /// Number of clauses. `TOP` reports zero.
    #[must_use]
    pub fn clause_count(&self) -> usize {
        match &self.0 {
            Repr::Top => 0,
            Repr::Clauses(c) => c.len(),
        }
    }

    /// Every principal mentioned by the label.
    #[must_use]
    pub fn principals(&self) -> BTreeSet<&Principal> {
        self.clauses().flat_map(|c| c.principals().iter()).collect()
    }

    /// The principals of the only clause, if the label is exactly one clause.
    #[must_use]
    pub fn singleton_disjunction(&self) -> Option<&BTreeSet<Principal>> {
        match &self.0 {
            Repr::Clauses(c) if c.len() == 1 => c.first().map(Clause::principals),
            _ => None,
        }
    }

    /// Conjunction: the union of both clause sets. `TOP` absorbs.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        match (&self.0, &other.0) {
            (Repr::Top, _) | (_, Repr::Top) => Self::top(),
            (Repr::Clauses(a), Repr::Clauses(b)) => {
                Self(Repr::Clauses(simplify(a.union(b).cloned().collect())))
            },
        }
    }

    /// Disjunction: the cross-union of clause pairs. `TOP` is the identity and
    /// the public label absorbs.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        match (&self.0, &other.0) {
            (Repr::Top, _) => other.clone(),
            (_, Repr::Top) => self.clone(),
            (Repr::Clauses(a), Repr::Clauses(b)) => {
                let crossed = a
                    .iter()
                    .flat_map(|x| b.iter().map(move |y| x.union(y)))
                    .collect();
                Self(Repr::Clauses(simplify(crossed)))
            },
        }
    }

    /// Drops every clause implied by some clause of `privs`.
    ///
    /// With a privilege label of singleton clauses this removes each clause
    /// that mentions an owned principal. `TOP` is never reduced.
    #[must_use]
    pub fn reduce(&self, privs: &Self) -> Self {
        match &self.0 {
            Repr::Top => Self::top(),
            Repr::Clauses(c) => Self(Repr::Clauses(
                c.iter()
                    .filter(|clause| !privs.discharges(clause))
                    .cloned()
                    .collect(),
            )),
        }
    }

    /// `self ∧ privs ⇒ other`.
    ///
    /// Every clause of `other` must be a superset of a clause of `self` or of
    /// `privs`. `TOP` subsumes everything; only `TOP` subsumes `TOP`.
    #[must_use]
    pub fn subsumes(&self, privs: &Self, other: &Self) -> bool {
        match &other.0 {
            Repr::Top => self.is_top() || privs.is_top(),
            Repr::Clauses(c) => c
                .iter()
                .all(|clause| self.discharges(clause) || privs.discharges(clause)),
        }
    }

    /// `self ⇒ other` without privileges.
    #[must_use]
    pub fn implies(&self, other: &Self) -> bool {
        self.subsumes(&Self::public(), other)
    }

    /// Whether this label, read as a formula, implies `clause`.
    #[must_use]
    pub fn discharges(&self, clause: &Clause) -> bool {
        match &self.0 {
            Repr::Top => true,
            Repr::Clauses(c) => c.iter().any(|own| own.implies(clause)),
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::public()
    }
}

impl From<Principal> for Label {
    fn from(principal: Principal) -> Self {
        Self::from_principal(principal)
    }
}

impl From<Clause> for Label {
    fn from(clause: Clause) -> Self {
        Self::from_clause(clause)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Top => f.write_str("top"),
            Repr::Clauses(c) if c.is_empty() => f.write_str("public"),
            Repr::Clauses(c) => {
                for (i, clause) in c.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{clause}")?;
                }
                Ok(())
            },
        }
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_label(s)
    }
}

impl TryFrom<String> for Label {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Label> for String {
    fn from(value: Label) -> Self {
        value.to_string()
    }
}

/// Applies CNF absorption: keeps a clause only if no smaller kept clause is a
/// subset of it.
fn simplify(clauses: BTreeSet<Clause>) -> BTreeSet<Clause> {
    let mut by_size: Vec<Clause> = clauses.into_iter().collect();
    by_size.sort_by_key(Clause::len);

    let mut kept: Vec<Clause> = Vec::with_capacity(by_size.len());
    for clause in by_size {
        if !kept.iter().any(|k| k.implies(&clause)) {
            kept.push(clause);
        }
    }
    kept.into_iter().collect()
}

//! Principals: the atoms labels are built from.
//!
//! A principal is an opaque, value-compared identity. Three shapes occur in
//! practice:
//!
//! - **Origins** such as `https://bank.example`, derived from a URL with
//!   [`Principal::origin`].
//! - **Unique principals** (`unique:<uuid>`) minted by [`Principal::unique`]
//!   for fresh privileges and for the null principal a sandbox runs as.
//! - **Application names** passed to [`Principal::new`] verbatim.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::LabelError;

/// Maximum length of a principal name in bytes.
pub const MAX_PRINCIPAL_LEN: usize = 1024;

/// Characters reserved by the label expression syntax.
const RESERVED_CHARS: &[char] = &['(', ')', '|', '&', ','];

/// Names reserved for the textual form of the lattice bounds.
const RESERVED_NAMES: &[&str] = &["public", "top"];

/// Prefix carried by every principal minted with [`Principal::unique`].
const UNIQUE_PREFIX: &str = "unique:";

/// An immutable principal identity.
///
/// Cloning is a reference-count bump; comparison and ordering are by name so
/// clauses built from principals have a canonical order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(Arc<str>);

impl Principal {
    /// Creates a principal from an application-chosen name.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidPrincipal`] if the name is empty, longer
    /// than [`MAX_PRINCIPAL_LEN`], contains whitespace or one of the label
    /// syntax characters `( ) | & ,`, or is one of the reserved words
    /// `public` and `top`.
    pub fn new(name: impl AsRef<str>) -> Result<Self, LabelError> {
        let name = name.as_ref();
        validate_name(name)?;
        Ok(Self(Arc::from(name)))
    }

    /// Derives the origin principal (`scheme://host[:port]`) of a URL.
    ///
    /// Only `http` and `https` URLs have an origin. The scheme and authority
    /// are lower-cased; user info, path, query and fragment are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidPrincipal`] for any other scheme or a URL
    /// without a host.
    pub fn origin(url: &str) -> Result<Self, LabelError> {
        let invalid = |reason: &str| LabelError::InvalidPrincipal {
            name: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("not an absolute URL"))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(invalid("origin requires an http or https URL"));
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host = authority
            .rsplit_once('@')
            .map_or(authority, |(_, host)| host);
        if host.is_empty() || host.starts_with(':') {
            return Err(invalid("URL has no host"));
        }

        Self::new(format!("{scheme}://{}", host.to_ascii_lowercase()))
    }

    /// Mints a fresh principal nobody else can name.
    #[must_use]
    pub fn unique() -> Self {
        Self(Arc::from(format!("{UNIQUE_PREFIX}{}", uuid::Uuid::new_v4())))
    }

    /// Returns the principal's name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for an `http`/`https` origin principal.
    #[must_use]
    pub fn is_origin(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Returns `true` for a principal minted by [`Principal::unique`].
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.0.starts_with(UNIQUE_PREFIX)
    }
}

fn validate_name(name: &str) -> Result<(), LabelError> {
    let invalid = |reason: String| LabelError::InvalidPrincipal {
        name: truncate_for_display(name),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("principal name is empty".to_string()));
    }
    if name.len() > MAX_PRINCIPAL_LEN {
        return Err(invalid(format!(
            "principal name is {} bytes, maximum is {MAX_PRINCIPAL_LEN}",
            name.len()
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || RESERVED_CHARS.contains(c))
    {
        return Err(invalid(format!("principal name contains reserved character {c:?}")));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid(format!("'{name}' is a reserved word")));
    }
    Ok(())
}

fn truncate_for_display(name: &str) -> String {
    const SHOWN: usize = 64;
    if name.len() <= SHOWN {
        return name.to_string();
    }
    let mut end = SHOWN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &name[..end])
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Principal {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Principal {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0.to_string()
    }
}

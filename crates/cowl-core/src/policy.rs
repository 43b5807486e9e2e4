//! Network policy derived from a context's effective privacy label.
//!
//! Once a context has observed labeled data it may only talk to the parties
//! that are allowed to see that data. The effective label is the context's
//! current privacy label with every clause its privileges discharge removed:
//!
//! | Effective label | Derived policy |
//! |-----------------|----------------|
//! | public | [`NetworkPolicy::Unrestricted`], nothing is imposed |
//! | one clause `(o1 \| o2 ...)` | [`NetworkPolicy::AllowOrigins`] for exactly those principals |
//! | anything else, `top` included | [`NetworkPolicy::DenyAll`] |
//!
//! Restricted policies are rendered as a [`ContentSecurityPolicy`] that the
//! embedding appends to the context. Policies only ever accumulate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::label::{Label, Principal};

/// Outcome of [`derive_policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "origins", rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// The effective label is public; no restriction is imposed.
    Unrestricted,
    /// Communication is limited to the listed principals.
    AllowOrigins(Vec<Principal>),
    /// All communication and storage access is disabled.
    DenyAll,
}

impl NetworkPolicy {
    /// The content security policy to append, if any.
    #[must_use]
    pub fn content_security_policy(&self) -> Option<ContentSecurityPolicy> {
        match self {
            Self::Unrestricted => None,
            Self::AllowOrigins(origins) => Some(ContentSecurityPolicy::allow(origins)),
            Self::DenyAll => Some(ContentSecurityPolicy::deny_all()),
        }
    }

    /// `true` unless the policy is [`NetworkPolicy::Unrestricted`].
    #[must_use]
    pub const fn is_restrictive(&self) -> bool {
        !matches!(self, Self::Unrestricted)
    }
}

/// Derives the network policy for a context labeled `privacy` that owns
/// `privileges`.
#[must_use]
pub fn derive_policy(privacy: &Label, privileges: &Label) -> NetworkPolicy {
    let effective = privacy.reduce(privileges);
    if effective.is_empty() {
        return NetworkPolicy::Unrestricted;
    }
    match effective.singleton_disjunction() {
        Some(origins) => NetworkPolicy::AllowOrigins(origins.iter().cloned().collect()),
        None => NetworkPolicy::DenyAll,
    }
}

/// Fetch directives, in the order they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Directive {
    /// `default-src`
    DefaultSrc,
    /// `script-src`
    ScriptSrc,
    /// `object-src`
    ObjectSrc,
    /// `style-src`
    StyleSrc,
    /// `img-src`
    ImgSrc,
    /// `media-src`
    MediaSrc,
    /// `frame-src`
    FrameSrc,
    /// `font-src`
    FontSrc,
    /// `connect-src`
    ConnectSrc,
}

impl Directive {
    /// Every directive in render order.
    pub const ALL: [Self; 9] = [
        Self::DefaultSrc,
        Self::ScriptSrc,
        Self::ObjectSrc,
        Self::StyleSrc,
        Self::ImgSrc,
        Self::MediaSrc,
        Self::FrameSrc,
        Self::FontSrc,
        Self::ConnectSrc,
    ];

    /// The directive name as it appears in a policy string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DefaultSrc => "default-src",
            Self::ScriptSrc => "script-src",
            Self::ObjectSrc => "object-src",
            Self::StyleSrc => "style-src",
            Self::ImgSrc => "img-src",
            Self::MediaSrc => "media-src",
            Self::FrameSrc => "frame-src",
            Self::FontSrc => "font-src",
            Self::ConnectSrc => "connect-src",
        }
    }

    /// Inline content stays usable for these directives.
    const fn allows_inline(self) -> bool {
        matches!(self, Self::DefaultSrc | Self::ScriptSrc | Self::StyleSrc | Self::ImgSrc)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source expression within a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// `'none'`
    None,
    /// `'unsafe-inline'`
    UnsafeInline,
    /// A principal allowed as a network peer.
    Origin(Principal),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("'none'"),
            Self::UnsafeInline => f.write_str("'unsafe-inline'"),
            Self::Origin(p) => write!(f, "{p}"),
        }
    }
}

/// A content security policy covering every fetch directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSecurityPolicy {
    directives: Vec<(Directive, Vec<Source>)>,
}

impl ContentSecurityPolicy {
    /// Restricts every directive to `origins`.
    #[must_use]
    pub fn allow(origins: &[Principal]) -> Self {
        Self::build(|directive| {
            let mut sources = Vec::with_capacity(origins.len() + 1);
            if directive.allows_inline() {
                sources.push(Source::UnsafeInline);
            }
            sources.extend(origins.iter().cloned().map(Source::Origin));
            sources
        })
    }

    /// Forbids every network fetch.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::build(|directive| {
            let mut sources = vec![Source::None];
            if directive.allows_inline() && directive != Directive::ImgSrc {
                sources.push(Source::UnsafeInline);
            }
            sources
        })
    }

    fn build(mut sources_for: impl FnMut(Directive) -> Vec<Source>) -> Self {
        Self {
            directives: Directive::ALL
                .iter()
                .map(|&d| (d, sources_for(d)))
                .collect(),
        }
    }

    /// The sources listed for `directive`.
    #[must_use]
    pub fn sources(&self, directive: Directive) -> &[Source] {
        self.directives
            .iter()
            .find(|(d, _)| *d == directive)
            .map(|(_, s)| s.as_slice())
            .unwrap_or(&[])
    }

    /// Directives in render order with their sources.
    pub fn directives(&self) -> impl Iterator<Item = (Directive, &[Source])> {
        self.directives.iter().map(|(d, s)| (*d, s.as_slice()))
    }

    /// Renders the policy header value.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContentSecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (directive, sources)) in self.directives.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{directive}")?;
            for source in sources {
                write!(f, " {source}")?;
            }
            f.write_str(";")?;
        }
        Ok(())
    }
}

//! Values carrying their own labels.
//!
//! A [`LabeledValue`] lets a context hand data to less privileged code without
//! that code being able to look at it. Creating one is a write check against
//! the creator; reading one is a read check against the reader, which may
//! raise the reader's label.
//!
//! Labeled values never cross a context boundary as data. The runtime keeps
//! them in a [`LabeledStore`] and scripts pass around an opaque handle,
//! `{"$labeled": "<uuid>"}`, which only resolves in the runtime that sealed
//! it. Editing a handle cannot change the labels it refers to.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::guard::{guard_read, guard_write};
use crate::host::HostValue;
use crate::label::Label;
use crate::sandbox::{ContextPolicy, SandboxError};

/// Key of the single field in a sealed handle.
pub const HANDLE_KEY: &str = "$labeled";

/// A value with privacy and trust labels attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledValue {
    privacy: Label,
    trust: Label,
    value: HostValue,
}

impl LabeledValue {
    /// Labels `value` on behalf of `creator`.
    ///
    /// The label must be at or above the creator's current label and within
    /// its clearance, modulo the creator's privileges.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the creator may not produce
    /// data at this label.
    pub fn create(
        creator: &ContextPolicy,
        value: HostValue,
        privacy: Label,
        trust: Label,
    ) -> Result<Self, SandboxError> {
        let decision = guard_write(creator, &privacy, &trust, creator.privileges());
        if let Some(reason) = decision.deny_reason() {
            warn!(operation = "label_value", %reason, "flow denied");
        }
        decision.into_result("label_value")?;
        Ok(Self {
            privacy,
            trust,
            value,
        })
    }

    /// The privacy label.
    #[must_use]
    pub const fn privacy(&self) -> &Label {
        &self.privacy
    }

    /// The trust label.
    #[must_use]
    pub const fn trust(&self) -> &Label {
        &self.trust
    }

    /// Reads the value as `reader`, raising the reader's label if its
    /// clearance allows.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PolicyDenied`] if the reader may not observe
    /// the value.
    pub fn read(&self, reader: &mut ContextPolicy) -> Result<&HostValue, SandboxError> {
        let privs = reader.privileges().clone();
        let decision = guard_read(reader, &self.privacy, &self.trust, &privs, true);
        if let Some(reason) = decision.deny_reason() {
            warn!(operation = "unlabel", %reason, "flow denied");
        }
        decision.into_result("unlabel")?;
        Ok(&self.value)
    }
}

fn handle_value(handle: Uuid) -> HostValue {
    let mut fields = serde_json::Map::new();
    fields.insert(HANDLE_KEY.to_string(), handle.to_string().into());
    HostValue::from(serde_json::Value::Object(fields))
}

/// Labeled values sealed by one runtime, keyed by handle.
///
/// Entries live as long as the store; a handle stays valid for the lifetime
/// of the runtime that issued it.
#[derive(Debug, Default)]
pub struct LabeledStore {
    values: HashMap<Uuid, LabeledValue>,
}

impl LabeledStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `labeled` and returns the handle scripts can carry.
    pub fn seal(&mut self, labeled: LabeledValue) -> HostValue {
        let handle = Uuid::new_v4();
        debug!(%handle, privacy = %labeled.privacy, "labeled value sealed");
        self.values.insert(handle, labeled);
        handle_value(handle)
    }

    /// Resolves a handle produced by [`LabeledStore::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Serialization`] if `handle` is not a handle or
    /// was not issued by this store.
    pub fn open(&self, handle: &HostValue) -> Result<&LabeledValue, SandboxError> {
        let id = handle
            .as_json()
            .as_object()
            .filter(|fields| fields.len() == 1)
            .and_then(|fields| fields.get(HANDLE_KEY))
            .and_then(serde_json::Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok())
            .ok_or_else(|| SandboxError::serialization("not a labeled value handle"))?;
        self.values
            .get(&id)
            .ok_or_else(|| SandboxError::serialization("unknown labeled value handle"))
    }

    /// Number of sealed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if nothing has been sealed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::DenyReason;
    use crate::label::Principal;

    fn l(expr: &str) -> Label {
        expr.parse().unwrap()
    }

    fn page(origin: &str) -> ContextPolicy {
        ContextPolicy::sandbox_mode(Principal::origin(origin).unwrap())
    }

    #[test]
    fn creator_labels_above_its_current_label() {
        let ctx = page("https://a.example");
        let labeled =
            LabeledValue::create(&ctx, HostValue::from("secret"), l("(b)"), Label::public())
                .unwrap();
        assert_eq!(labeled.privacy(), &l("(b)"));
    }

    #[test]
    fn creator_cannot_label_below_its_current_label() {
        let mut ctx = page("https://a.example");
        ctx.set_privacy_label(l("(b)")).unwrap();
        let err = LabeledValue::create(&ctx, HostValue::null(), Label::public(), Label::public())
            .unwrap_err();
        assert_eq!(err.deny_reason(), Some(DenyReason::BelowCurrentLabel));
    }

    #[test]
    fn reading_raises_reader_label() {
        let creator = page("https://a.example");
        let labeled =
            LabeledValue::create(&creator, HostValue::from(1_i64), l("(b)"), Label::public())
                .unwrap();

        let mut reader = page("https://c.example");
        assert_eq!(labeled.read(&mut reader).unwrap(), &HostValue::from(1_i64));
        assert_eq!(reader.privacy(), Some(&l("(b)")));
    }

    #[test]
    fn reader_clearance_bounds_reads() {
        let creator = page("https://a.example");
        let labeled =
            LabeledValue::create(&creator, HostValue::null(), l("(b)"), Label::public()).unwrap();

        let mut reader = page("https://c.example");
        reader.set_privacy_clearance(l("(d)")).unwrap();
        let err = labeled.read(&mut reader).unwrap_err();
        assert_eq!(err.deny_reason(), Some(DenyReason::TaintAboveClearance));
        assert_eq!(reader.privacy(), Some(&Label::public()));
    }

    #[test]
    fn sealed_handle_resolves_to_the_same_value() {
        let creator = page("https://a.example");
        let labeled =
            LabeledValue::create(&creator, HostValue::from("x"), l("(b) & (c)"), Label::public())
                .unwrap();
        let mut store = LabeledStore::new();
        let handle = store.seal(labeled.clone());
        assert_eq!(store.len(), 1);
        assert_eq!(store.open(&handle).unwrap(), &labeled);
    }

    #[test]
    fn labels_written_into_a_handle_are_not_honored() {
        let creator = page("https://a.example");
        let labeled =
            LabeledValue::create(&creator, HostValue::from("x"), l("(b)"), Label::public())
                .unwrap();
        let mut store = LabeledStore::new();
        let mut json = store.seal(labeled).into_json();
        json["privacy"] = serde_json::Value::from("public");
        assert!(matches!(
            store.open(&HostValue::from(json)),
            Err(SandboxError::Serialization { .. })
        ));
    }

    #[test]
    fn self_made_labeled_json_is_rejected() {
        let store = LabeledStore::new();
        let forged = HostValue::new(serde_json::json!({
            "privacy": "public",
            "trust": "(https://owner.example)",
            "value": "attacker data",
        }));
        assert!(matches!(
            store.open(&forged),
            Err(SandboxError::Serialization { .. })
        ));

        assert!(matches!(
            store.open(&handle_value(Uuid::new_v4())),
            Err(SandboxError::Serialization { .. })
        ));
    }

    #[test]
    fn handles_do_not_cross_stores() {
        let creator = page("https://a.example");
        let labeled =
            LabeledValue::create(&creator, HostValue::null(), l("(b)"), Label::public()).unwrap();
        let mut issuer = LabeledStore::new();
        let handle = issuer.seal(labeled);
        assert!(LabeledStore::new().open(&handle).is_err());
    }
}

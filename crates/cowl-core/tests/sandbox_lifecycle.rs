//! Integration tests for sandbox lifecycle, messaging and result delivery.
//!
//! # Test Coverage
//!
//! - Clean vs active gating: hard errors before the first schedule, silent
//!   drops after it
//! - Single-slot results: last write wins, thrown exceptions become errors
//! - Owner-side delivery: at most once per result, only to matching handlers
//! - Destroy: idempotent, every later operation fails
//! - Clearance monotonicity and guard duality
//! - Labeled values crossing the sandbox boundary as runtime-issued handles
//! - Structured clone failures on posts and results

mod common;

use common::{Harness, l};
use cowl_core::guard::{DenyReason, check_read, guard_write};
use cowl_core::host::{EventKind, EventTarget, HostValue};
use cowl_core::label::{Label, Principal};
use cowl_core::labeled::LabeledValue;
use serde_json::json;
use cowl_core::privilege::Privilege;
use cowl_core::sandbox::{
    ContextId, ContextPolicy, DoneHandlers, PendingResult, ReadMode, SandboxError, SandboxState,
    ScheduleOutcome,
};

/// A page, a sandbox labeled `(b)` it owns, and a context above the sandbox.
fn fixture() -> (Harness, ContextId, ContextId, ContextId) {
    let mut h = Harness::new();
    let page = h.page("https://page.example");
    let high = h.page("https://high.example");
    h.runtime
        .context_mut(high)
        .unwrap()
        .set_privacy_label(l("(b) & (c)"))
        .unwrap();
    let sandbox = h
        .runtime
        .create_sandbox(page, l("(b)"), Label::public())
        .unwrap();
    (h, page, high, sandbox)
}

fn result(h: &mut Harness, reader: ContextId, sandbox: ContextId) -> PendingResult {
    h.runtime
        .get_result(reader, sandbox, ReadMode::Taint)
        .unwrap()
}

// ============================================================================
// Gating
// ============================================================================

#[test]
fn post_to_clean_sandbox_denial_is_an_error() {
    let (mut h, _page, high, sandbox) = fixture();
    let err = h
        .runtime
        .post_message(high, sandbox, &HostValue::from("x"))
        .unwrap_err();
    assert_eq!(err.deny_reason(), Some(DenyReason::BelowCurrentLabel));
}

#[test]
fn post_to_active_sandbox_denial_is_silent() {
    let (mut h, page, high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "onmessage").unwrap();
    assert!(h.events.is_empty());

    h.runtime
        .post_message(high, sandbox, &HostValue::from("leak"))
        .unwrap();
    assert!(h.events.is_empty());

    h.runtime
        .post_message(page, sandbox, &HostValue::from("hello"))
        .unwrap();
    let events = h.events.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target, EventTarget::Inner);
    assert_eq!(events[0].kind, EventKind::Message);
    assert_eq!(events[0].payload, HostValue::from("hello"));
}

#[test]
fn message_posted_before_handler_is_delivered_on_registration() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 0").unwrap();
    h.runtime
        .post_message(page, sandbox, &HostValue::from("queued"))
        .unwrap();
    assert!(h.events.is_empty());

    h.runtime.schedule(page, sandbox, "onmessage\necho").unwrap();
    let inner: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.target == EventTarget::Inner)
        .collect();
    assert_eq!(inner.len(), 1);
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::from("queued")));
}

#[test]
fn failed_activation_leaves_sandbox_clean() {
    let (mut h, page, high, sandbox) = fixture();
    let err = h.runtime.schedule(high, sandbox, "done 1").unwrap_err();
    assert!(err.is_policy_denial());

    let unit = h.runtime.sandbox(sandbox).unwrap();
    assert_eq!(unit.state(), SandboxState::Clean);
    assert!(unit.policy().privacy().is_none());
    assert!(h.executor.ran().is_empty());

    h.runtime.schedule(page, sandbox, "done 1").unwrap();
    assert_eq!(h.runtime.sandbox(sandbox).unwrap().state(), SandboxState::Active);
}

#[test]
fn schedule_into_active_sandbox_is_checked() {
    let (mut h, page, high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 1").unwrap();
    let err = h.runtime.schedule(high, sandbox, "done 2").unwrap_err();
    assert_eq!(err.deny_reason(), Some(DenyReason::BelowCurrentLabel));
    assert_eq!(h.executor.ran().len(), 1);
}

#[test]
fn grant_and_attach_follow_the_same_gate() {
    let (mut h, page, high, sandbox) = fixture();
    let b = Privilege::for_principal(Principal::new("b").unwrap());

    assert!(h.runtime.grant(high, sandbox, &b).is_err());
    assert!(
        h.runtime
            .attach(high, sandbox, "config", HostValue::from(1_i64))
            .is_err()
    );

    h.runtime
        .attach(page, sandbox, "config", HostValue::from("settings"))
        .unwrap();
    h.runtime.schedule(page, sandbox, "attachment config").unwrap();
    assert_eq!(
        result(&mut h, page, sandbox),
        PendingResult::Value(HostValue::from("settings"))
    );

    h.runtime.grant(high, sandbox, &b).unwrap();
    assert!(
        h.runtime
            .sandbox(sandbox)
            .unwrap()
            .policy()
            .privileges()
            .is_empty()
    );

    h.runtime.grant(page, sandbox, &b).unwrap();
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privileges(),
        &b
    );
}

// ============================================================================
// Results
// ============================================================================

#[test]
fn result_slot_keeps_last_write() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 1\ndone 2").unwrap();
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::from(2_i64)));

    h.runtime.schedule(page, sandbox, "fail \"bad\"").unwrap();
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Error(HostValue::from("bad")));
}

#[test]
fn empty_slot_reads_as_none_after_the_check() {
    let (mut h, page, _high, sandbox) = fixture();
    let reader = h.page("https://reader.example");
    let err = h
        .runtime
        .get_result(reader, sandbox, ReadMode::Strict)
        .unwrap_err();
    assert!(err.is_policy_denial());
    assert_eq!(result(&mut h, page, sandbox), PendingResult::None);
}

#[test]
fn thrown_exception_becomes_error_result() {
    let (mut h, page, _high, sandbox) = fixture();
    let outcome = h.runtime.schedule(page, sandbox, "throw \"boom\"").unwrap();
    assert_eq!(outcome, ScheduleOutcome::Threw);
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Error(HostValue::from("boom")));
}

#[test]
fn raising_above_static_label_throws() {
    let (mut h, page, _high, sandbox) = fixture();
    let outcome = h
        .runtime
        .schedule(page, sandbox, "raise (b) & (c)")
        .unwrap();
    assert_eq!(outcome, ScheduleOutcome::Threw);
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&Label::public())
    );
}

#[test]
fn on_done_delivers_pending_result_once() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 7").unwrap();
    assert!(h.events.is_empty());

    h.runtime
        .on_done(page, sandbox, DoneHandlers::message_only())
        .unwrap();
    h.runtime
        .on_done(page, sandbox, DoneHandlers::message_only())
        .unwrap();
    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target, EventTarget::Owner);
    assert_eq!(events[0].payload, HostValue::from(7_i64));
    assert_eq!(h.runtime.context(page).unwrap().privacy(), Some(&l("(b)")));

    h.runtime.schedule(page, sandbox, "done 8").unwrap();
    assert_eq!(h.events.len(), 2);
}

#[test]
fn on_done_routes_errors_to_error_handler_only() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "throw 1").unwrap();

    h.runtime
        .on_done(page, sandbox, DoneHandlers::message_only())
        .unwrap();
    assert!(h.events.is_empty());

    h.runtime
        .on_done(page, sandbox, DoneHandlers::with_error())
        .unwrap();
    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
}

#[test]
fn error_handler_alone_does_not_receive_errors() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "throw 1").unwrap();

    h.runtime
        .on_done(
            page,
            sandbox,
            DoneHandlers {
                message: false,
                error: true,
            },
        )
        .unwrap();
    assert!(h.events.is_empty());
}

// ============================================================================
// Destroy and lookup
// ============================================================================

#[test]
fn destroy_is_idempotent_and_final() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 1").unwrap();

    h.runtime.destroy(sandbox);
    h.runtime.destroy(sandbox);
    assert_eq!(h.runtime.sandbox_count(), 0);

    let destroyed = SandboxError::Destroyed { id: sandbox };
    assert_eq!(h.runtime.schedule(page, sandbox, "done 2").unwrap_err(), destroyed);
    assert_eq!(
        h.runtime
            .get_result(page, sandbox, ReadMode::Taint)
            .unwrap_err(),
        destroyed
    );
    assert_eq!(
        h.runtime
            .post_message(page, sandbox, &HostValue::null())
            .unwrap_err(),
        destroyed
    );
    assert_eq!(h.runtime.context(sandbox).unwrap_err(), destroyed);
}

#[test]
fn destroyed_ids_stay_distinct_from_unknown_ones() {
    let (mut h, page, _high, _sandbox) = fixture();
    let mut destroyed = Vec::new();
    for _ in 0..50 {
        let id = h
            .runtime
            .create_sandbox(page, l("(b)"), Label::public())
            .unwrap();
        h.runtime.destroy(id);
        destroyed.push(id);
    }
    assert_eq!(h.runtime.sandbox_count(), 1);

    for id in destroyed {
        assert_eq!(
            h.runtime.sandbox(id).unwrap_err(),
            SandboxError::Destroyed { id }
        );
    }
    let unknown = ContextId::new(999);
    assert_eq!(
        h.runtime.sandbox(unknown).unwrap_err(),
        SandboxError::UnknownContext { id: unknown }
    );
    assert_eq!(
        h.runtime.sandbox(page).unwrap_err(),
        SandboxError::NotASandbox { id: page }
    );
}

#[test]
fn lookups_distinguish_unknown_and_non_sandbox_ids() {
    let (mut h, page, _high, _sandbox) = fixture();
    let unknown = ContextId::new(999);
    assert_eq!(
        h.runtime.schedule(page, unknown, "").unwrap_err(),
        SandboxError::UnknownContext { id: unknown }
    );
    assert_eq!(
        h.runtime.schedule(page, page, "").unwrap_err(),
        SandboxError::NotASandbox { id: page }
    );
}

// ============================================================================
// Clearance and duality
// ============================================================================

#[test]
fn clearance_only_narrows() {
    let mut h = Harness::new();
    let page = h.page("https://page.example");
    let ctx = h.runtime.context_mut(page).unwrap();

    ctx.set_privacy_clearance(l("(b) & (c)")).unwrap();
    ctx.set_privacy_clearance(l("(b)")).unwrap();
    assert!(matches!(
        ctx.set_privacy_clearance(l("(b) & (c)")),
        Err(SandboxError::Configuration { .. })
    ));

    ctx.set_privacy_label(l("(b)")).unwrap();
    assert!(ctx.set_privacy_clearance(Label::public()).is_err());
    assert_eq!(ctx.privacy_clearance(), Some(&l("(b)")));
}

#[test]
fn write_and_read_checks_are_dual() {
    let labels = ["public", "(a)", "(a | b)", "(a) & (b)", "(b)"].map(l);
    let origin = Principal::new("origin").unwrap();
    for (p1, t1) in labels.iter().flat_map(|p| labels.iter().map(move |t| (p, t))) {
        for (p2, t2) in labels.iter().flat_map(|p| labels.iter().map(move |t| (p, t))) {
            let writer = ContextPolicy::configured(
                origin.clone(),
                p1.clone(),
                t1.clone(),
                None,
                None,
                Privilege::empty(),
            )
            .unwrap();
            let reader = ContextPolicy::configured(
                origin.clone(),
                p2.clone(),
                t2.clone(),
                None,
                None,
                Privilege::empty(),
            )
            .unwrap();
            assert_eq!(
                guard_write(&writer, p2, t2, writer.privileges()).is_allowed(),
                check_read(&reader, p1, t1, reader.privileges()).is_allowed(),
                "writer ({p1}, {t1}) reader ({p2}, {t2})"
            );
        }
    }
}

// ============================================================================
// Labeled values
// ============================================================================

#[test]
fn labeled_value_is_readable_inside_cleared_sandbox() {
    let (mut h, page, _high, sandbox) = fixture();
    let labeled = h
        .runtime
        .label_value(page, HostValue::from("secret"), l("(b)"), Label::public())
        .unwrap();
    let sealed = h.runtime.seal(labeled);
    h.runtime
        .attach(page, sandbox, "secret", sealed)
        .unwrap();

    h.runtime.schedule(page, sandbox, "unlabel secret").unwrap();
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&l("(b)"))
    );
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::from("secret")));
}

#[test]
fn labeled_value_above_sandbox_clearance_is_refused() {
    let mut h = Harness::new();
    let page = h.page("https://page.example");
    let sandbox = h
        .runtime
        .create_sandbox(page, Label::public(), Label::public())
        .unwrap();
    let labeled = h
        .runtime
        .label_value(page, HostValue::from("secret"), l("(b)"), Label::public())
        .unwrap();
    let sealed = h.runtime.seal(labeled);
    h.runtime
        .attach(page, sandbox, "secret", sealed)
        .unwrap();

    let outcome = h.runtime.schedule(page, sandbox, "unlabel secret").unwrap();
    assert_eq!(outcome, ScheduleOutcome::Threw);
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&Label::public())
    );
}

#[test]
fn sandbox_labels_its_output_for_the_owner() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime
        .schedule(page, sandbox, "label (b) \"report\"")
        .unwrap();
    let PendingResult::Value(carried) = result(&mut h, page, sandbox) else {
        panic!("expected a value result");
    };
    let labeled = h.runtime.unseal(&carried).unwrap();
    assert_eq!(labeled.privacy(), &l("(b)"));
    assert_eq!(
        h.runtime.unlabel(page, &labeled).unwrap(),
        HostValue::from("report")
    );
}

#[test]
fn forged_labeled_json_is_not_a_labeled_value() {
    let (mut h, page, _high, sandbox) = fixture();
    let labeled = h
        .runtime
        .label_value(page, HostValue::from("secret"), l("(b)"), Label::public())
        .unwrap();
    let genuine = h.runtime.seal(labeled);

    // A copy of what a labeled value holds, with the label dropped.
    let forged = HostValue::from(json!({
        "privacy": "public",
        "trust": "public",
        "value": "secret",
    }));
    assert!(matches!(
        h.runtime.unseal(&forged),
        Err(SandboxError::Serialization { .. })
    ));

    let mut tampered = genuine.as_json().clone();
    tampered["privacy"] = json!("public");
    assert!(h.runtime.unseal(&HostValue::from(tampered)).is_err());

    h.runtime.attach(page, sandbox, "secret", forged).unwrap();
    let outcome = h.runtime.schedule(page, sandbox, "unlabel secret").unwrap();
    assert_eq!(outcome, ScheduleOutcome::Threw);
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&Label::public())
    );
    assert!(matches!(
        result(&mut h, page, sandbox),
        PendingResult::Error(_)
    ));

    let opened: LabeledValue = h.runtime.unseal(&genuine).unwrap();
    assert_eq!(opened.privacy(), &l("(b)"));
}

// ============================================================================
// Self-reads
// ============================================================================

#[test]
fn sandbox_reading_its_own_result_is_checked_against_its_labels() {
    let (mut h, page, _high, sandbox) = fixture();
    h.runtime.schedule(page, sandbox, "done 1").unwrap();
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&Label::public())
    );

    let err = h
        .runtime
        .get_result(sandbox, sandbox, ReadMode::Strict)
        .unwrap_err();
    assert_eq!(err.deny_reason(), Some(DenyReason::TaintNotAllowed));

    assert_eq!(
        h.runtime
            .get_result(sandbox, sandbox, ReadMode::Taint)
            .unwrap(),
        PendingResult::Value(HostValue::from(1_i64))
    );
    assert_eq!(
        h.runtime.sandbox(sandbox).unwrap().policy().privacy(),
        Some(&l("(b)"))
    );
}

// ============================================================================
// Structured clone limits
// ============================================================================

const CLONE_LIMIT: usize = 256;

fn oversized() -> String {
    "x".repeat(CLONE_LIMIT + 44)
}

#[test]
fn oversized_post_fails_and_clears_the_pending_message() {
    let mut h = Harness::with_clone_limit(CLONE_LIMIT);
    let page = h.page("https://page.example");
    let sandbox = h
        .runtime
        .create_sandbox(page, l("(b)"), Label::public())
        .unwrap();
    h.runtime.schedule(page, sandbox, "done 1").unwrap();
    h.runtime
        .post_message(page, sandbox, &HostValue::from("hello"))
        .unwrap();
    h.runtime.schedule(page, sandbox, "echo").unwrap();
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::from("hello")));

    let err = h
        .runtime
        .post_message(page, sandbox, &HostValue::from(oversized()))
        .unwrap_err();
    let SandboxError::Serialization { reason } = err else {
        panic!("expected a serialization error, got {err:?}");
    };
    assert_eq!(reason, format!("encoded value is 302 bytes, limit is {CLONE_LIMIT}"));

    h.runtime.schedule(page, sandbox, "echo").unwrap();
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::null()));
}

#[test]
fn oversized_result_leaves_the_slot_untouched() {
    let mut h = Harness::with_clone_limit(CLONE_LIMIT);
    let page = h.page("https://page.example");
    let sandbox = h
        .runtime
        .create_sandbox(page, l("(b)"), Label::public())
        .unwrap();
    h.runtime
        .on_done(page, sandbox, DoneHandlers::message_only())
        .unwrap();

    let script = format!("done 1\ntry_done {}", oversized());
    assert_eq!(
        h.runtime.schedule(page, sandbox, &script).unwrap(),
        ScheduleOutcome::Completed
    );

    let errors = h.executor.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SandboxError::Serialization { .. }));
    assert_eq!(result(&mut h, page, sandbox), PendingResult::Value(HostValue::from(1_i64)));
    assert_eq!(h.events.len(), 1);
}

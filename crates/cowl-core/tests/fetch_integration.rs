//! Integration tests for fetching scripts by URL: `schedule_uri`, the script
//! cache and `import`.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Harness, ScriptedExecutor, l};
use cowl_core::config::CowlConfig;
use cowl_core::guard::DenyReason;
use cowl_core::host::{FetchError, HostServices, HostValue, SourceFetcher, StaticSources};
use cowl_core::label::{Label, Principal};
use cowl_core::privilege::Privilege;
use cowl_core::sandbox::{PendingResult, ReadMode, SandboxError, SandboxRuntime, ScheduleOutcome};

const APP: &str = "https://cdn.example/app.js";
const LIB: &str = "https://cdn.example/lib.js";

/// Counts network requests made through a static source map.
#[derive(Clone)]
struct CountingFetcher {
    inner: StaticSources,
    requests: Arc<AtomicUsize>,
}

impl SourceFetcher for CountingFetcher {
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_text(url)
    }
}

fn harness() -> (Harness, Arc<AtomicUsize>) {
    let requests = Arc::new(AtomicUsize::new(0));
    let fetcher = CountingFetcher {
        inner: StaticSources::new()
            .with(APP, "done 5")
            .with(LIB, "raise (b)")
            .with("https://cdn.example/broken.js", "throw \"nope\""),
        requests: Arc::clone(&requests),
    };
    (Harness::with_fetcher(fetcher), requests)
}

#[test]
fn schedule_uri_runs_fetched_script() {
    let (mut h, requests) = harness();
    let page = h.page("https://page.example");
    let sandbox = h
        .runtime
        .create_sandbox(page, l("(b)"), Label::public())
        .unwrap();

    let outcome = h.runtime.schedule_uri(page, sandbox, APP, false).unwrap();
    assert_eq!(outcome, ScheduleOutcome::Completed);
    assert_eq!(h.executor.ran(), vec![APP.to_string()]);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.runtime.get_result(page, sandbox, ReadMode::Taint).unwrap(),
        PendingResult::Value(HostValue::from(5_i64))
    );
    assert!(h.runtime.cache().is_empty());
}

#[test]
fn cached_scripts_are_fetched_once() {
    let (mut h, requests) = harness();
    let page = h.page("https://page.example");
    let sandbox = h
        .runtime
        .create_sandbox(page, Label::public(), Label::public())
        .unwrap();

    h.runtime.schedule_uri(page, sandbox, APP, true).unwrap();
    h.runtime.schedule_uri(page, sandbox, APP, true).unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(h.executor.ran().len(), 2);
    assert_eq!(h.runtime.cache().len(), 1);

    h.runtime.schedule_uri(page, sandbox, APP, false).unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[test]
fn non_http_schemes_are_rejected() {
    let (mut h, requests) = harness();
    let page = h.page("https://page.example");
    for url in ["file:///etc/passwd", "ftp://cdn.example/app.js", "app.js"] {
        let err = h.runtime.fetch_unit(page, url, false).unwrap_err();
        assert!(matches!(err, SandboxError::Fetch { .. }), "{url}: {err}");
    }
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

#[test]
fn fetching_from_a_raised_context_would_leak() {
    let (mut h, requests) = harness();
    let page = h.page("https://page.example");
    h.runtime
        .context_mut(page)
        .unwrap()
        .set_privacy_label(l("(b)"))
        .unwrap();

    let err = h.runtime.fetch_unit(page, APP, false).unwrap_err();
    assert_eq!(
        err,
        SandboxError::denied("fetch", DenyReason::BelowCurrentLabel)
    );
    assert_eq!(requests.load(Ordering::SeqCst), 0);

    h.runtime
        .context_mut(page)
        .unwrap()
        .own(&Privilege::for_principal(Principal::new("b").unwrap()));
    h.runtime.fetch_unit(page, APP, false).unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_source_is_a_fetch_error() {
    let (mut h, _requests) = harness();
    let page = h.page("https://page.example");
    let err = h
        .runtime
        .fetch_unit(page, "https://cdn.example/missing.js", true)
        .unwrap_err();
    assert!(matches!(err, SandboxError::Fetch { .. }));
    assert!(h.runtime.cache().is_empty());
}

#[test]
fn import_runs_in_the_importing_context() {
    let (mut h, _requests) = harness();
    let page = h.page("https://page.example");

    let err = h
        .runtime
        .import(page, "https://cdn.example/broken.js", false)
        .unwrap_err();
    assert!(matches!(err, SandboxError::Execution { .. }));

    h.runtime.import(page, LIB, false).unwrap();
    assert_eq!(h.runtime.context(page).unwrap().privacy(), Some(&l("(b)")));

    // Once raised, the context may no longer fetch from a public origin.
    assert!(
        h.runtime
            .import(page, LIB, false)
            .unwrap_err()
            .is_policy_denial()
    );
}

#[test]
fn configured_schemes_narrow_fetching() {
    let config = CowlConfig::from_toml(
        r#"
        [fetch]
        allowed_schemes = ["https"]
        cache_capacity = 1
        "#,
    )
    .unwrap();
    let executor = ScriptedExecutor::new();
    let fetcher = StaticSources::new()
        .with(APP, "done 1")
        .with("http://cdn.example/app.js", "done 2");
    let host = HostServices::configured(executor, &config.fetch).with_fetcher(fetcher);
    let mut runtime = SandboxRuntime::with_config(host, &config);
    let page = runtime.create_context(Principal::origin("https://page.example").unwrap());

    assert!(matches!(
        runtime.fetch_unit(page, "http://cdn.example/app.js", false),
        Err(SandboxError::Fetch { .. })
    ));
    runtime.fetch_unit(page, APP, true).unwrap();
    assert_eq!(runtime.cache().len(), 1);
}

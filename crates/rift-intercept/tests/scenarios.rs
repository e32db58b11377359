//! End-to-end tests for interception, matching and playback.
//!
//! Each test owns its own `InterceptionState`, so they run in parallel
//! without sharing any registry.

use parking_lot::Mutex;
use rift_intercept::{
    Budget, EventKind, HostMatcher, InterceptError, InterceptEvent, Interception,
    InterceptionConfig, InterceptionState, Milestone, QueryValue, ReplyHeaders,
    RequestDescriptor, ValueMatcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const ORIGIN: &str = "http://example.test";

fn request(method: &str, path: &str) -> RequestDescriptor {
    RequestDescriptor::builder(method, &format!("{ORIGIN}{path}"))
        .build()
        .unwrap()
}

fn record(state: &InterceptionState, kind: EventKind) -> Arc<Mutex<Vec<InterceptEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    state.on(kind, move |event| sink.lock().push(event.clone()));
    seen
}

#[tokio::test]
async fn scenario_a_single_get() {
    let state = InterceptionState::create();
    let interceptor = state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/")
        .respond(200, "OK");

    let response = state.send(request("GET", "/")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "OK");
    assert_eq!(interceptor.remaining(), Budget::Times(0));
    assert!(interceptor.is_done());
    assert!(state.pending_expectations().is_empty());
    assert!(state.is_fully_satisfied());
}

#[tokio::test]
async fn scenario_b_budget_exhaustion() {
    let state = InterceptionState::create();
    state.disallow_real_connections(None);
    let no_match = record(&state, EventKind::NoMatch);
    state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/")
        .times(2)
        .respond(202, "accepted");

    for _ in 0..2 {
        let response = state.send(request("GET", "/")).await.unwrap();
        assert_eq!(response.status, 202);
    }

    let err = state.send(request("GET", "/")).await.unwrap_err();
    match &err {
        InterceptError::NoMatch {
            mismatches,
            net_connect_denied,
            ..
        } => {
            assert!(mismatches.is_empty());
            assert!(*net_connect_denied);
        }
        other => panic!("unexpected {other:?}"),
    }

    let events = no_match.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        InterceptEvent::NoMatch { mismatches, .. } => assert!(mismatches.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
    assert!(state.active_expectations().is_empty());
    assert!(state.origins().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_c_response_delay() {
    let state = InterceptionState::create();
    state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/")
        .delay(Duration::from_millis(100))
        .respond(200, "slow");

    let Interception::Mocked(mut handle) = state.intercept(request("GET", "/")) else {
        panic!("expected a mocked call");
    };
    let ended = Instant::now();
    handle.end().unwrap();

    let mut end_of_body = None;
    while let Some(milestone) = handle.next_milestone().await {
        if matches!(milestone, Milestone::End) {
            end_of_body = Some(ended.elapsed());
        }
    }
    assert!(end_of_body.unwrap() >= Duration::from_millis(100));
}

#[tokio::test]
async fn scenario_d_body_mismatch_reason() {
    let state = InterceptionState::create();
    state.disallow_real_connections(None);
    state
        .declare_origin(ORIGIN)
        .unwrap()
        .post("/")
        .body("expected")
        .respond(200, "");

    let actual = RequestDescriptor::builder("POST", &format!("{ORIGIN}/"))
        .body("actual")
        .build()
        .unwrap();
    let err = state.send(actual).await.unwrap_err();

    match &err {
        InterceptError::NoMatch { mismatches, .. } => {
            assert_eq!(mismatches.len(), 1);
            assert_eq!(
                mismatches[0].reasons,
                vec![r#"Body mismatch: expected "expected", got "actual""#.to_string()]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err
        .to_string()
        .contains(r#"Body mismatch: expected "expected", got "actual""#));
    assert_eq!(state.pending_expectations().len(), 1);
}

#[tokio::test]
async fn test_first_registered_interceptor_wins() {
    let state = InterceptionState::create();
    let scope = state.declare_origin(ORIGIN).unwrap();
    scope.get("/users").respond(200, "first");
    scope.get("/users").respond(200, "second");

    assert_eq!(state.send(request("GET", "/users")).await.unwrap().text(), "first");
    assert_eq!(state.send(request("GET", "/users")).await.unwrap().text(), "second");
    scope.done().unwrap();
}

#[tokio::test]
async fn test_persisted_interceptor_never_exhausts() {
    let state = InterceptionState::create();
    let interceptor = state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/health")
        .persist(true)
        .respond(200, "up");

    for _ in 0..25 {
        assert_eq!(state.send(request("GET", "/health")).await.unwrap().status, 200);
    }
    assert_eq!(interceptor.remaining(), Budget::Unlimited);
    assert_eq!(interceptor.match_count(), 25);
    assert!(state.is_fully_satisfied());
    assert_eq!(state.active_expectations().len(), 1);
}

#[tokio::test]
async fn test_scope_options_apply_to_declared_interceptors() {
    let state = InterceptionState::create();
    let scope = state
        .declare_origin(ORIGIN)
        .unwrap()
        .match_header("authorization", ValueMatcher::starts_with("Bearer "))
        .bad_headers(["x-debug"])
        .default_reply_headers(ReplyHeaders::new().header("Content-Type", "application/json"))
        .reply_content_length()
        .persist();
    scope.get("/me").respond(200, r#"{"id":1}"#);

    let authorized = RequestDescriptor::builder("GET", &format!("{ORIGIN}/me"))
        .header("Authorization", "Bearer abc")
        .build()
        .unwrap();
    let response = state.send(authorized.clone()).await.unwrap();
    assert_eq!(response.headers.get("content-type"), Some("application/json".to_string()));
    assert_eq!(response.headers.get("content-length"), Some("8".to_string()));
    assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"id": 1}));

    let mut debug = authorized.clone();
    debug.headers.append("X-Debug", "1");
    assert!(matches!(
        state.send(debug).await,
        Err(InterceptError::Unmocked(_))
    ));

    assert!(matches!(
        state.send(request("GET", "/me")).await,
        Err(InterceptError::Unmocked(_))
    ));
}

#[tokio::test]
async fn test_query_matching_rules() {
    let state = InterceptionState::create();
    let scope = state.declare_origin(ORIGIN).unwrap().persist();
    scope
        .get("/search")
        .query_json(&json!({"tags": ["a b", "c"], "filter": {"owner": "me"}}))
        .respond(200, "nested");
    scope
        .get("/raw")
        .query_encoded([("q", "a%20b")])
        .respond(200, "encoded");
    scope
        .get("/any")
        .any_query()
        .respond(200, "any");
    scope
        .get("/pred")
        .query_matching(|q| q.get("page").and_then(QueryValue::as_str) == Some("2"))
        .respond(200, "pred");

    let cases = [
        ("/search?tags=a%20b&tags=c&filter[owner]=me", "nested"),
        ("/search?tags[]=a+b&tags[]=c&filter%5Bowner%5D=me", "nested"),
        ("/raw?q=a%20b", "encoded"),
        ("/any?x=1&y=2", "any"),
        ("/any", "any"),
        ("/pred?page=2&size=10", "pred"),
    ];
    for (path, expected) in cases {
        let response = state.send(request("GET", path)).await.unwrap();
        assert_eq!(response.text(), expected, "{path}");
    }

    assert!(state.send(request("GET", "/search?tags=c&tags=a%20b&filter[owner]=me")).await.is_err());
    assert!(state.send(request("GET", "/pred?page=3")).await.is_err());
}

#[tokio::test]
async fn test_json_body_partial_match_and_history() {
    let state = InterceptionState::create();
    let interceptor = state
        .declare_origin(ORIGIN)
        .unwrap()
        .post("/users")
        .json_body(json!({"name": "ann"}))
        .twice()
        .remember(5)
        .respond(201, r#"{"id":7}"#);

    for age in [30, 31] {
        let request = RequestDescriptor::builder("POST", &format!("{ORIGIN}/users"))
            .body(json!({"name": "ann", "age": age}).to_string())
            .build()
            .unwrap();
        assert_eq!(state.send(request).await.unwrap().status, 201);
    }

    let history = interceptor.history();
    assert_eq!(history.len(), 2);
    assert!(history[1].descriptor.body_text().contains("31"));
    assert!(history[0].matched_at <= history[1].matched_at);
}

#[tokio::test]
async fn test_event_order_for_matched_call() {
    let state = InterceptionState::create();
    let log = Arc::new(Mutex::new(Vec::new()));
    for (kind, label) in [(EventKind::Request, "request"), (EventKind::Replied, "replied")] {
        let log = Arc::clone(&log);
        state.on(kind, move |event| {
            log.lock().push(format!("{label} {}", event.descriptor().path));
        });
    }
    state.declare_origin(ORIGIN).unwrap().get("/a").respond(200, "");

    state.send(request("GET", "/a")).await.unwrap();
    assert_eq!(*log.lock(), vec!["request /a", "replied /a"]);
}

#[tokio::test]
async fn test_no_match_event_on_passthrough() {
    let state = InterceptionState::create();
    let events = record(&state, EventKind::NoMatch);
    state.declare_origin(ORIGIN).unwrap().get("/a").respond(200, "");

    let err = state.send(request("GET", "/b")).await.unwrap_err();
    assert!(matches!(err, InterceptError::Unmocked(_)));

    // Unknown origin: passthrough decided at intercept time
    let other = RequestDescriptor::builder("GET", "http://elsewhere.test/")
        .build()
        .unwrap();
    assert!(matches!(state.intercept(other), Interception::Passthrough(_)));

    let events = events.lock();
    assert_eq!(events.len(), 2);
    match &events[0] {
        InterceptEvent::NoMatch { mismatches, .. } => {
            assert_eq!(mismatches.len(), 1);
            assert!(mismatches[0].reasons[0].starts_with("Path mismatch"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_off_stops_delivery() {
    let state = InterceptionState::create();
    let count = Arc::new(Mutex::new(0));
    let c = Arc::clone(&count);
    let id = state.on(EventKind::NoMatch, move |_| *c.lock() += 1);

    let _ = state.intercept(request("GET", "/"));
    assert!(state.off(id));
    let _ = state.intercept(request("GET", "/"));
    assert_eq!(*count.lock(), 1);
}

#[tokio::test]
async fn test_net_connect_rules() {
    let state = InterceptionState::create();
    state.disallow_real_connections(None);
    state.allow_real_connections(Some(HostMatcher::from("localhost")));

    let local = RequestDescriptor::builder("GET", "http://localhost:3000/ping")
        .build()
        .unwrap();
    assert!(matches!(state.intercept(local), Interception::Passthrough(_)));

    let remote = RequestDescriptor::builder("GET", "https://api.remote.test/")
        .build()
        .unwrap();
    let err = state.send(remote).await.unwrap_err();
    assert!(err.is_no_match());
    assert_eq!(err.code(), Some("ENETUNREACH"));
    assert!(err.to_string().contains("real network connections are disabled"));
}

#[tokio::test]
async fn test_config_policy_and_history_default() {
    let config = InterceptionConfig::from_yaml_str(
        "allowRealConnections: false\nallowedHosts: ['^127\\.0\\.0\\.1']\ndefaultHistoryCap: 2",
    )
    .unwrap();
    let state = InterceptionState::with_config(config).unwrap();

    let loopback = RequestDescriptor::builder("GET", "http://127.0.0.1:8080/")
        .build()
        .unwrap();
    assert!(matches!(state.intercept(loopback), Interception::Passthrough(_)));

    let interceptor = state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/h")
        .persist(true)
        .respond(200, "");
    for _ in 0..3 {
        state.send(request("GET", "/h")).await.unwrap();
    }
    assert_eq!(interceptor.history().len(), 2);
}

#[tokio::test]
async fn test_origin_pattern_scope() {
    let state = InterceptionState::create();
    state
        .declare_origin_matching(regex::Regex::new(r"^https://[a-z]+\.cdn\.test$").unwrap())
        .get("/asset.js")
        .twice()
        .respond(200, "js");

    for host in ["https://eu.cdn.test", "https://us.cdn.test"] {
        let req = RequestDescriptor::builder("GET", &format!("{host}/asset.js"))
            .build()
            .unwrap();
        assert_eq!(state.send(req).await.unwrap().text(), "js");
    }
    assert!(state.is_fully_satisfied());
}

#[tokio::test]
async fn test_pending_and_optional_expectations() {
    let state = InterceptionState::create();
    let scope = state.declare_origin(ORIGIN).unwrap();
    scope.get("/required").respond(200, "");
    scope.get("/maybe").optionally().respond(200, "");

    let pending = state.pending_expectations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].expectation, "GET http://example.test/required");
    assert!(!scope.is_done());
    let err = scope.done().unwrap_err();
    assert!(err.to_string().contains("GET http://example.test/required"));

    state.send(request("GET", "/required")).await.unwrap();
    assert!(scope.is_done());
    assert_eq!(state.active_expectations().len(), 1);
}

#[tokio::test]
async fn test_removed_interceptor_no_longer_matches() {
    let state = InterceptionState::create();
    let interceptor = state.declare_origin(ORIGIN).unwrap().get("/a").respond(200, "");
    assert!(interceptor.remove());
    assert!(!interceptor.remove());
    assert!(matches!(
        state.intercept(request("GET", "/a")),
        Interception::Passthrough(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_isolates_and_deactivates() {
    let state = InterceptionState::create();
    let events = record(&state, EventKind::NoMatch);
    state
        .declare_origin(ORIGIN)
        .unwrap()
        .get("/slow")
        .delay_connection(Duration::from_secs(10))
        .respond(200, "");

    let Interception::Mocked(mut handle) = state.intercept(request("GET", "/slow")) else {
        panic!("expected a mocked call");
    };
    handle.end().unwrap();

    state.teardown();
    assert!(!state.is_active());
    assert!(state.origins().is_empty());

    let mut last = None;
    while let Some(milestone) = handle.next_milestone().await {
        last = Some(milestone);
    }
    assert!(matches!(last, Some(Milestone::Close(rift_intercept::CloseReason::Aborted))));

    // Inactive state passes everything through and no longer notifies
    assert!(matches!(
        state.intercept(request("GET", "/slow")),
        Interception::Passthrough(_)
    ));
    assert!(events.lock().is_empty());

    state.activate();
    assert!(state.is_active());

    // An independent state is unaffected by another's declarations
    let other = InterceptionState::create();
    assert!(other.origins().is_empty());
}

#[tokio::test]
async fn test_abort_pending_counts_live_calls() {
    let state = InterceptionState::create();
    state.disallow_real_connections(None);
    let first = state.intercept(request("GET", "/1"));
    let second = state.intercept(request("GET", "/2"));
    assert_eq!(state.abort_pending(), 2);
    assert_eq!(state.abort_pending(), 0);
    drop((first, second));
}

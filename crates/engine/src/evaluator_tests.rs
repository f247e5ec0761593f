//! End-to-end tests for the flow evaluator.
//!
//! Every test runs against an `InMemoryStore`, so no external service is
//! needed. Expressions use the real Python and JS engines unless a test is
//! about call counting, in which case a `MockEngine` is registered.

use std::sync::Arc;

use async_trait::async_trait;
use expr::mock::MockEngine;
use expr::ExprRouter;
use serde_json::{json, Value};
use store::{EventRow, EventStore, InMemoryStore, NodeRow, StoreError};

use crate::{AggregatePolicy, EngineError, EvaluatorConfig, ExecutionStatus, FlowEvaluator};

const FLOW: &str = "checkout";
const RUN: &str = "run-1";
const MS: i64 = 1_000_000;

fn py(script: &str) -> Value {
    json!({"engine": "python", "script": script})
}

fn js(script: &str) -> Value {
    json!({"engine": "js", "script": script})
}

fn event(node: &str, id: &str, ts_ms: i64, data: Value) -> EventRow {
    EventRow::new(FLOW, node, RUN, data, ts_ms * MS).with_id(id)
}

/// trigger `a` → hook `b` (validator on `ok`) → act `c`.
fn linear_nodes() -> Vec<NodeRow> {
    vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_validator(py("data['ok'] == True")),
        NodeRow::new(FLOW, "c", "act").depends_on(["b"]),
    ]
}

async fn seeded(nodes: Vec<NodeRow>, events: Vec<EventRow>) -> InMemoryStore {
    let store = InMemoryStore::new();
    for node in nodes {
        store.insert_node(node).await.unwrap();
    }
    store.insert_events(events).await.unwrap();
    store
}

fn evaluator_with(store: &InMemoryStore, router: ExprRouter, config: EvaluatorConfig) -> FlowEvaluator {
    FlowEvaluator::new(Arc::new(store.clone()), Arc::new(store.clone()), router, config)
}

fn evaluator(store: &InMemoryStore) -> FlowEvaluator {
    evaluator_with(store, ExprRouter::with_defaults(), EvaluatorConfig::default())
}

// ============================================================
// Whole-run scenarios
// ============================================================

#[tokio::test]
async fn linear_flow_with_all_events_passes() {
    let store = seeded(
        linear_nodes(),
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "eb", 2, json!({"ok": true})),
            event("c", "ec", 4, json!({})),
        ],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Passed);
    let order: Vec<&str> = report.exec_info.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(report.graph["a"], vec!["b"]);
    assert_eq!(report.ev_ids, vec!["ea", "eb", "ec"]);

    let b = report.node("b").unwrap();
    assert_eq!(b.upstream_ev_ids, vec!["ea"]);
    assert_eq!(b.ev_ids, vec!["eb"]);
    assert_eq!(b.elapsed_ns, MS);
    assert_eq!(report.node("c").unwrap().elapsed_ns, 2 * MS);
    assert_eq!(report.node("a").unwrap().elapsed_ns, 0);
}

#[tokio::test]
async fn failed_validator_skips_everything_downstream() {
    let store = seeded(
        linear_nodes(),
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "eb", 2, json!({"ok": false})),
            event("c", "ec", 3, json!({})),
        ],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("validator_failed"));

    let c = report.node("c").unwrap();
    assert_eq!(c.status, ExecutionStatus::Skipped);
    assert!(c.message.as_deref().unwrap().contains("b (failed)"));
    assert!(c.ev_ids.is_empty());
}

#[tokio::test]
async fn missing_event_is_skipped_and_policy_decides_the_aggregate() {
    let events = vec![
        event("a", "ea", 1, json!({})),
        event("b", "eb", 2, json!({"ok": true})),
    ];
    let store = seeded(linear_nodes(), events).await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    let c = report.node("c").unwrap();
    assert_eq!(c.status, ExecutionStatus::Skipped);
    assert_eq!(c.message.as_deref(), Some("no event recorded for this node"));
    assert_eq!(report.status, ExecutionStatus::Skipped);

    let strict = EvaluatorConfig {
        aggregate_policy: AggregatePolicy::Strict,
        ..EvaluatorConfig::default()
    };
    let report = evaluator_with(&store, ExprRouter::with_defaults(), strict)
        .evaluate(RUN, FLOW, None)
        .await
        .unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.node("c").unwrap().status, ExecutionStatus::Skipped);
}

#[tokio::test]
async fn dependency_without_events_skips_its_dependents() {
    let store = seeded(
        linear_nodes(),
        vec![event("a", "ea", 1, json!({})), event("c", "ec", 3, json!({}))],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();

    assert_eq!(report.node("b").unwrap().status, ExecutionStatus::Skipped);
    let c = report.node("c").unwrap();
    assert_eq!(c.status, ExecutionStatus::Skipped);
    assert!(c.message.as_deref().unwrap().contains("b (skipped)"));
    assert_eq!(report.status, ExecutionStatus::Skipped);
}

#[tokio::test]
async fn timeout_breach_fails_the_node() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_condition(json!({"timeout_ms": 100})),
    ];
    let store = seeded(
        nodes,
        vec![event("a", "ea", 100, json!({})), event("b", "eb", 600, json!({}))],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();

    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("timeout_exceeded"));
    let message = b.message.as_deref().unwrap();
    assert!(message.contains("500.000ms elapsed"), "{message}");
    assert!(message.contains("limit 100ms"), "{message}");
    assert_eq!(b.elapsed_ns, 500 * MS);
    assert_eq!(report.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn event_within_timeout_passes() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_condition(json!({"timeoutMs": 50})),
    ];
    let store = seeded(
        nodes,
        vec![event("a", "ea", 100, json!({})), event("b", "eb", 110, json!({}))],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn empty_flow_is_pending() {
    let store = InMemoryStore::new();
    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Pending);
    assert!(report.exec_info.is_empty());
}

// ============================================================
// Start node
// ============================================================

#[tokio::test]
async fn start_node_restricts_to_reachable_subgraph() {
    let store = seeded(
        linear_nodes(),
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "eb", 2, json!({"ok": true})),
            event("c", "ec", 3, json!({})),
        ],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, Some("b")).await.unwrap();

    let ids: Vec<&str> = report.exec_info.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert!(!report.graph.contains_key("a"));
    // `a` is still judged so `b` sees its dependency as passed.
    assert_eq!(report.node("b").unwrap().upstream_ev_ids, vec!["ea"]);
    assert_eq!(report.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn unknown_start_node_gives_an_empty_report() {
    let store = seeded(linear_nodes(), vec![]).await;
    let report = evaluator(&store).evaluate(RUN, FLOW, Some("nope")).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Pending);
    assert!(report.exec_info.is_empty());
    assert!(report.graph.is_empty());
}

// ============================================================
// Candidate selection
// ============================================================

#[tokio::test]
async fn filter_picks_the_earliest_matching_event() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_filter(js("data.kind === 'target'"))
            .with_validator(js("data.value > 10")),
        NodeRow::new(FLOW, "c", "act").depends_on(["b"]),
    ];
    let store = seeded(
        nodes,
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "b-noise", 2, json!({"kind": "other", "value": 0})),
            event("b", "b-hit", 3, json!({"kind": "target", "value": 42})),
            event("b", "b-late", 4, json!({"kind": "target", "value": 1})),
            event("c", "ec", 5, json!({})),
        ],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();

    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Passed);
    assert_eq!(b.ev_ids, vec!["b-noise", "b-hit", "b-late"]);
    assert_eq!(b.elapsed_ns, 2 * MS);
    assert_eq!(report.node("c").unwrap().upstream_ev_ids, vec!["b-hit"]);
}

#[tokio::test]
async fn no_event_passing_the_filter_is_skipped() {
    let nodes = vec![NodeRow::new(FLOW, "a", "trigger").with_filter(py("data['n'] > 5"))];
    let store = seeded(
        nodes,
        vec![event("a", "e1", 1, json!({"n": 1})), event("a", "e2", 2, json!({"n": 2}))],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    let a = report.node("a").unwrap();
    assert_eq!(a.status, ExecutionStatus::Skipped);
    assert!(a.message.as_deref().unwrap().contains("passed the filter"));
    assert_eq!(a.ev_ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn events_before_their_dependency_are_out_of_order() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook").depends_on(["a"]),
    ];
    let events = vec![event("b", "eb", 1, json!({})), event("a", "ea", 5, json!({}))];
    let store = seeded(nodes, events).await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("out_of_order"));
    assert_eq!(report.status, ExecutionStatus::Failed);

    let relaxed = EvaluatorConfig {
        reject_out_of_order: false,
        ..EvaluatorConfig::default()
    };
    let report = evaluator_with(&store, ExprRouter::with_defaults(), relaxed)
        .evaluate(RUN, FLOW, None)
        .await
        .unwrap();
    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Passed);
    assert_eq!(b.elapsed_ns, 0);
}

#[tokio::test]
async fn later_event_is_used_when_an_earlier_one_is_out_of_order() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook").depends_on(["a"]),
    ];
    let events = vec![
        event("b", "early", 1, json!({})),
        event("a", "ea", 5, json!({})),
        event("b", "ontime", 7, json!({})),
    ];
    let store = seeded(nodes, events).await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    let b = report.node("b").unwrap();
    assert_eq!(b.status, ExecutionStatus::Passed);
    assert_eq!(b.elapsed_ns, 2 * MS);
}

// ============================================================
// Expression context
// ============================================================

#[tokio::test]
async fn validator_sees_dependency_events_in_ctx() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "trigger"),
        NodeRow::new(FLOW, "join", "hook")
            .depends_on(["a", "b"])
            .with_validator(py(
                "len(ctx['deps']) == 2 and ctx['deps'][0]['id'] == 'a' and ctx['deps'][1]['data']['n'] == 2",
            )),
        NodeRow::new(FLOW, "after", "act")
            .depends_on(["join"])
            .with_validator(js("ctx.data.total === 3 && ctx.deps[0].evId === 'ej'")),
    ];
    let store = seeded(
        nodes,
        vec![
            event("a", "ea", 1, json!({"n": 1})),
            event("b", "eb", 2, json!({"n": 2})),
            event("join", "ej", 3, json!({"total": 3})),
            event("after", "ex", 4, json!({})),
        ],
    )
    .await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    assert_eq!(report.node("join").unwrap().status, ExecutionStatus::Passed);
    assert_eq!(report.node("join").unwrap().upstream_ev_ids, vec!["ea", "eb"]);
    assert_eq!(report.node("after").unwrap().status, ExecutionStatus::Passed);
    assert_eq!(report.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn expressions_are_not_run_for_blocked_nodes() {
    let mock = Arc::new(MockEngine::new("mock", json!(true)));
    let mut router = ExprRouter::with_defaults();
    router.register(mock.clone());

    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_filter(json!({"engine": "mock", "script": "filter"}))
            .with_validator(json!({"engine": "mock", "script": "validator"})),
    ];
    let store = seeded(nodes, vec![event("b", "eb", 2, json!({}))]).await;

    let report = evaluator_with(&store, router, EvaluatorConfig::default())
        .evaluate(RUN, FLOW, None)
        .await
        .unwrap();

    assert_eq!(report.node("b").unwrap().status, ExecutionStatus::Skipped);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn mock_engine_receives_data_and_ctx() {
    let mock = Arc::new(MockEngine::new("mock", json!(true)));
    let mut router = ExprRouter::new();
    router.register(mock.clone());

    let nodes = vec![
        NodeRow::new(FLOW, "a", "trigger"),
        NodeRow::new(FLOW, "b", "hook")
            .depends_on(["a"])
            .with_validator(json!({"engine": "mock", "script": "check"})),
    ];
    let store = seeded(
        nodes,
        vec![event("a", "ea", 1, json!({"x": 1})), event("b", "eb", 2, json!({"y": 2}))],
    )
    .await;

    evaluator_with(&store, router, EvaluatorConfig::default())
        .evaluate(RUN, FLOW, None)
        .await
        .unwrap();

    assert_eq!(mock.scripts(), vec!["check"]);
    let calls = mock.calls.lock().unwrap();
    let bindings = &calls[0].1;
    assert_eq!(bindings["data"], json!({"y": 2}));
    assert_eq!(bindings["ctx"]["data"], json!({"x": 1}));
    assert_eq!(bindings["ctx"]["deps"][0]["evId"], json!("ea"));
}

#[tokio::test]
async fn unknown_engine_fails_closed() {
    let nodes = vec![NodeRow::new(FLOW, "a", "trigger").with_validator(json!({"engine": "cel", "script": "true"}))];
    let store = seeded(nodes, vec![event("a", "ea", 1, json!({}))]).await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    assert_eq!(report.node("a").unwrap().status, ExecutionStatus::Failed);
}

// ============================================================
// Graph problems
// ============================================================

#[tokio::test]
async fn cycle_aborts_evaluation() {
    let nodes = vec![
        NodeRow::new(FLOW, "a", "hook").depends_on(["b"]),
        NodeRow::new(FLOW, "b", "hook").depends_on(["a"]),
    ];
    let store = seeded(nodes, vec![]).await;

    assert!(matches!(
        evaluator(&store).evaluate(RUN, FLOW, None).await,
        Err(EngineError::CycleDetected)
    ));
}

#[tokio::test]
async fn undeclared_dependency_is_skipped() {
    let nodes = vec![NodeRow::new(FLOW, "b", "hook").depends_on(["ghost"])];
    let store = seeded(nodes, vec![event("b", "eb", 1, json!({}))]).await;

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    let ghost = report.node("ghost").unwrap();
    assert_eq!(ghost.status, ExecutionStatus::Skipped);
    assert!(ghost.message.as_deref().unwrap().contains("not declared"));
    assert_eq!(report.node("b").unwrap().status, ExecutionStatus::Skipped);
    assert_eq!(report.status, ExecutionStatus::Skipped);
}

#[tokio::test]
async fn deleted_nodes_take_no_part() {
    let store = seeded(
        linear_nodes(),
        vec![event("a", "ea", 1, json!({})), event("b", "eb", 2, json!({"ok": true}))],
    )
    .await;
    store.delete_node(FLOW, "c").await.unwrap();

    let report = evaluator(&store).evaluate(RUN, FLOW, None).await.unwrap();
    assert!(report.node("c").is_none());
    assert_eq!(report.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn invalid_row_is_reported_as_declaration_error() {
    let nodes = vec![NodeRow::new(FLOW, "a", "trigger").with_filter(json!(42))];
    let store = seeded(nodes, vec![]).await;

    assert!(matches!(
        evaluator(&store).evaluate(RUN, FLOW, None).await,
        Err(EngineError::InvalidDeclaration { .. })
    ));
}

/// Serves a store's events plus one extra row appended to every run.
struct WithStrayEvent {
    inner: InMemoryStore,
    stray: EventRow,
}

#[async_trait]
impl EventStore for WithStrayEvent {
    async fn list_events(&self, flow: &str, run_id: &str) -> Result<Vec<EventRow>, StoreError> {
        let mut events = self.inner.list_events(flow, run_id).await?;
        events.push(self.stray.clone());
        Ok(events)
    }

    async fn get_event(&self, ev_id: &str) -> Result<EventRow, StoreError> {
        self.inner.get_event(ev_id).await
    }
}

#[tokio::test]
async fn unreadable_event_is_left_out_of_the_run() {
    let store = seeded(
        linear_nodes(),
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "eb", 2, json!({"ok": true})),
            event("c", "ec", 3, json!({})),
        ],
    )
    .await;
    let events = WithStrayEvent {
        inner: store.clone(),
        stray: event("zzz", "stray", 4, json!({})).with_kind("webhook"),
    };
    let evaluator = FlowEvaluator::new(
        Arc::new(store.clone()),
        Arc::new(events),
        ExprRouter::with_defaults(),
        EvaluatorConfig::default(),
    );

    let report = evaluator.evaluate(RUN, FLOW, None).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Passed);
    assert!(!report.ev_ids.iter().any(|id| id == "stray"));
}

// ============================================================
// evaluate_event
// ============================================================

#[tokio::test]
async fn evaluate_event_starts_at_the_event_node() {
    let store = seeded(
        linear_nodes(),
        vec![
            event("a", "ea", 1, json!({})),
            event("b", "eb", 2, json!({"ok": true})),
            event("c", "ec", 3, json!({})),
        ],
    )
    .await;
    let evaluator = evaluator(&store);

    let report = evaluator.evaluate_event("eb", false).await.unwrap();
    let ids: Vec<&str> = report.exec_info.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);

    let report = evaluator.evaluate_event("eb", true).await.unwrap();
    assert_eq!(report.exec_info.len(), 3);
    assert_eq!(report.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn evaluate_event_for_unknown_id_is_not_found() {
    let store = InMemoryStore::new();
    match evaluator(&store).evaluate_event("missing", false).await {
        Err(EngineError::EventNotFound(id)) => assert_eq!(id, "missing"),
        other => panic!("expected EventNotFound, got {other:?}"),
    }
}

//! Flow evaluation engine.
//!
//! `FlowEvaluator` is the central orchestrator:
//! 1. Loads declarations and the run's events through the store traits and
//!    converts them eagerly into typed models.
//! 2. Builds the graph and layers it; a cycle aborts the call.
//! 3. Walks the layers, judging each node against its events: dependency
//!    readiness, filter, ordering, timeout, validator.
//! 4. Restricts the output to the subgraph reachable from the start node and
//!    folds the node statuses into one aggregate status.
//!
//! The judging itself is the pure function [`evaluate_flow`]; the evaluator
//! only adds I/O around it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use expr::{ExprRouter, Expression};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use store::{EventStore, NodeStore, StoreError};
use tracing::{debug, info, instrument, warn};

use crate::dag::{build_graph, layered_topological_sort, reachable_from, restrict};
use crate::models::{EvalReport, Event, ExecutionStatus, NodeDeclaration, NodeResult};
use crate::EngineError;

const NANOS_PER_MILLI: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How skipped nodes without a failed ancestor count towards the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatePolicy {
    /// Pure absence is reported as an aggregate `skipped`.
    #[default]
    Lenient,
    /// Any skipped node makes the aggregate `failed`.
    Strict,
}

/// Tuning knobs for the evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub aggregate_policy: AggregatePolicy,
    /// Ignore candidate events recorded before the node's latest dependency.
    pub reject_out_of_order: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            aggregate_policy: AggregatePolicy::Lenient,
            reject_out_of_order: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation target
// ---------------------------------------------------------------------------

/// What one evaluation call looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalTarget {
    pub flow: String,
    pub run_id: String,
    pub start_node_id: Option<String>,
}

// ---------------------------------------------------------------------------
// FlowEvaluator
// ---------------------------------------------------------------------------

/// Stateless orchestrator; safe to share between tasks and call concurrently.
#[derive(Clone)]
pub struct FlowEvaluator {
    nodes: Arc<dyn NodeStore>,
    events: Arc<dyn EventStore>,
    router: ExprRouter,
    config: EvaluatorConfig,
}

impl FlowEvaluator {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        events: Arc<dyn EventStore>,
        router: ExprRouter,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            nodes,
            events,
            router,
            config,
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Typed declarations of `flow`, soft-deleted nodes excluded.
    pub async fn load_declarations(&self, flow: &str) -> Result<Vec<NodeDeclaration>, EngineError> {
        self.nodes
            .list_nodes(flow)
            .await?
            .into_iter()
            .map(NodeDeclaration::try_from)
            .collect()
    }

    /// Evaluate one run of `flow`, optionally only the part reachable from
    /// `start_node_id`.
    ///
    /// # Errors
    /// `CycleDetected` for a cyclic flow, `InvalidDeclaration` for node rows
    /// that fail conversion, `Store` for store failures. Event rows that fail
    /// conversion are logged and left out. Node-level problems never error;
    /// they are statuses in the report.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        run_id: &str,
        flow: &str,
        start_node_id: Option<&str>,
    ) -> Result<EvalReport, EngineError> {
        let started = Instant::now();

        let declarations = self.load_declarations(flow).await?;
        let events: Vec<Event> = self
            .events
            .list_events(flow, run_id)
            .await?
            .into_iter()
            .filter_map(|row| match Event::try_from(row) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable event");
                    None
                }
            })
            .collect();

        debug!(
            nodes = declarations.len(),
            events = events.len(),
            "loaded declarations and events"
        );

        let mut report =
            evaluate_flow(&declarations, &events, start_node_id, &self.router, &self.config)?;
        report.elapsed_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

        info!(
            status = %report.status,
            nodes = report.exec_info.len(),
            elapsed_ns = report.elapsed_ns,
            "evaluation finished"
        );
        Ok(report)
    }

    /// The evaluation an incoming event triggers: its run, starting at its
    /// node unless `whole_graph` is set.
    pub async fn resolve_event(
        &self,
        ev_id: &str,
        whole_graph: bool,
    ) -> Result<EvalTarget, EngineError> {
        let event = match self.events.get_event(ev_id).await {
            Ok(row) => row,
            Err(StoreError::NotFound { .. }) => {
                return Err(EngineError::EventNotFound(ev_id.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(EvalTarget {
            flow: event.flow,
            run_id: event.run_id,
            start_node_id: (!whole_graph).then_some(event.node_id),
        })
    }

    pub async fn evaluate_target(&self, target: &EvalTarget) -> Result<EvalReport, EngineError> {
        self.evaluate(&target.run_id, &target.flow, target.start_node_id.as_deref())
            .await
    }

    /// Look up `ev_id` and evaluate the run it belongs to.
    #[instrument(skip(self))]
    pub async fn evaluate_event(
        &self,
        ev_id: &str,
        whole_graph: bool,
    ) -> Result<EvalReport, EngineError> {
        let target = self.resolve_event(ev_id, whole_graph).await?;
        self.evaluate_target(&target).await
    }
}

// ---------------------------------------------------------------------------
// Pure evaluation
// ---------------------------------------------------------------------------

/// A node's verdict plus what dependents need to know about it.
struct Outcome<'e> {
    result: NodeResult,
    accepted: Option<&'e Event>,
    /// Skipped because some ancestor failed.
    upstream_failed: bool,
}

/// Judge `events` against `nodes`. Deterministic apart from non-deterministic
/// expression built-ins. `elapsed_ns` of the returned report is left at 0.
#[instrument(skip_all, fields(nodes = nodes.len(), events = events.len()))]
pub fn evaluate_flow(
    nodes: &[NodeDeclaration],
    events: &[Event],
    start_node_id: Option<&str>,
    router: &ExprRouter,
    config: &EvaluatorConfig,
) -> Result<EvalReport, EngineError> {
    let graph = build_graph(nodes);
    let layers = layered_topological_sort(&graph)?;

    let considered: BTreeSet<String> = match start_node_id {
        Some(start) if !graph.contains_key(start) => {
            warn!(start, "start node is not part of the flow");
            return Ok(EvalReport::empty());
        }
        Some(start) => reachable_from(&graph, start),
        None => graph.keys().cloned().collect(),
    };

    let declared: HashMap<&str, &NodeDeclaration> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut by_node: HashMap<&str, Vec<&Event>> = HashMap::new();
    for ev in events {
        by_node.entry(ev.node_id.as_str()).or_default().push(ev);
    }
    for list in by_node.values_mut() {
        list.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
    }
    let run_start = events.iter().map(|e| e.ts).min();

    // Ancestors outside the considered subgraph are judged too, silently, so
    // dependency readiness inside it is meaningful.
    let mut outcomes: HashMap<&str, Outcome> = HashMap::new();
    for id in layers.iter().flatten() {
        let candidates = by_node.get(id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let outcome = match declared.get(id.as_str()) {
            Some(decl) => judge_node(decl, candidates, &outcomes, run_start, router, config),
            None => undeclared(id),
        };
        debug!(node_id = %id, status = %outcome.result.status, "node judged");
        outcomes.insert(id.as_str(), outcome);
    }

    let mut report = EvalReport::empty();
    report.graph = restrict(&graph, &considered);

    let mut upstream_failed_skips = false;
    for id in layers.iter().flatten().filter(|id| considered.contains(*id)) {
        if let Some(outcome) = outcomes.remove(id.as_str()) {
            upstream_failed_skips |= outcome.upstream_failed;
            report.ev_ids.extend(outcome.result.ev_ids.iter().cloned());
            report.exec_info.push(outcome.result);
        }
    }

    report.status = aggregate(&report.exec_info, upstream_failed_skips, config.aggregate_policy);
    Ok(report)
}

/// Fold node statuses into the run status.
///
/// Empty subgraph: `pending`. Any failure, or any skip caused by one:
/// `failed`. Remaining skips: `skipped` (lenient) or `failed` (strict).
/// Otherwise `passed`.
fn aggregate(
    results: &[NodeResult],
    upstream_failed_skips: bool,
    policy: AggregatePolicy,
) -> ExecutionStatus {
    if results.is_empty() {
        return ExecutionStatus::Pending;
    }
    let failed = results.iter().any(|r| {
        matches!(
            r.status,
            ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Error
        )
    });
    if failed || upstream_failed_skips {
        return ExecutionStatus::Failed;
    }
    if results.iter().any(|r| r.status == ExecutionStatus::Skipped) {
        return match policy {
            AggregatePolicy::Lenient => ExecutionStatus::Skipped,
            AggregatePolicy::Strict => ExecutionStatus::Failed,
        };
    }
    if results.iter().all(|r| r.status == ExecutionStatus::Passed) {
        ExecutionStatus::Passed
    } else {
        ExecutionStatus::Pending
    }
}

fn undeclared<'e>(id: &str) -> Outcome<'e> {
    Outcome {
        result: NodeResult {
            node_id: id.to_owned(),
            dep_node_ids: Vec::new(),
            status: ExecutionStatus::Skipped,
            message: Some("node is referenced as a dependency but not declared".into()),
            error: None,
            elapsed_ns: 0,
            ev_ids: Vec::new(),
            upstream_ev_ids: Vec::new(),
        },
        accepted: None,
        upstream_failed: false,
    }
}

fn judge_node<'e>(
    decl: &NodeDeclaration,
    candidates: &[&'e Event],
    outcomes: &HashMap<&str, Outcome<'e>>,
    run_start: Option<i64>,
    router: &ExprRouter,
    config: &EvaluatorConfig,
) -> Outcome<'e> {
    let mut result = NodeResult {
        node_id: decl.id.clone(),
        dep_node_ids: decl.depends_on.clone(),
        status: ExecutionStatus::Pending,
        message: None,
        error: None,
        elapsed_ns: 0,
        ev_ids: Vec::new(),
        upstream_ev_ids: Vec::new(),
    };

    // ---- a. dependency readiness ----
    let mut dep_events: Vec<&Event> = Vec::with_capacity(decl.depends_on.len());
    let mut blocked: Vec<String> = Vec::new();
    let mut upstream_failed = false;
    for dep in &decl.depends_on {
        match outcomes.get(dep.as_str()) {
            Some(o) if o.result.status == ExecutionStatus::Passed => {
                if let Some(ev) = o.accepted {
                    dep_events.push(ev);
                }
            }
            Some(o) => {
                upstream_failed |= o.result.status != ExecutionStatus::Skipped || o.upstream_failed;
                blocked.push(format!("{dep} ({})", o.result.status));
            }
            None => blocked.push(format!("{dep} (not declared)")),
        }
    }
    if !blocked.is_empty() {
        result.status = ExecutionStatus::Skipped;
        result.message = Some(format!(
            "dependencies not passed: {}",
            blocked.join(", ")
        ));
        return Outcome {
            result,
            accepted: None,
            upstream_failed,
        };
    }

    result.upstream_ev_ids = dep_events.iter().map(|e| e.id.clone()).collect();
    result.ev_ids = candidates.iter().map(|e| e.id.clone()).collect();
    let ctx = build_context(&dep_events);
    let latest_dep_ts = dep_events.iter().map(|e| e.ts).max();
    let reference_ts = latest_dep_ts.or(run_start);

    // ---- b. candidate selection ----
    let mut too_early = 0usize;
    let mut primary: Option<&'e Event> = None;
    for &ev in candidates {
        if !passes(decl.filter.as_ref(), ev, &ctx, router) {
            continue;
        }
        if config.reject_out_of_order && latest_dep_ts.is_some_and(|dep_ts| ev.ts < dep_ts) {
            too_early += 1;
            continue;
        }
        primary = Some(ev);
        break;
    }

    // ---- c. no occurrence ----
    let Some(ev) = primary else {
        let skipped = |msg: String| (ExecutionStatus::Skipped, msg, None);
        let (status, message, error) = if too_early > 0 {
            (
                ExecutionStatus::Failed,
                format!(
                    "{too_early} matching event(s) occurred before the latest dependency at ts {}",
                    latest_dep_ts.unwrap_or_default()
                ),
                Some("out_of_order".to_owned()),
            )
        } else if candidates.is_empty() {
            skipped("no event recorded for this node".to_owned())
        } else {
            skipped(format!(
                "none of {} event(s) passed the filter",
                candidates.len()
            ))
        };
        result.status = status;
        result.message = Some(message);
        result.error = error;
        return Outcome {
            result,
            accepted: None,
            upstream_failed: false,
        };
    };

    let elapsed = reference_ts.map(|r| ev.ts.saturating_sub(r)).unwrap_or(0);
    result.elapsed_ns = elapsed.max(0);

    // ---- d. timeout ----
    if let Some(limit_ms) = decl.timeout_ms() {
        let limit_ns = i64::try_from(limit_ms)
            .unwrap_or(i64::MAX)
            .saturating_mul(NANOS_PER_MILLI);
        if elapsed > limit_ns {
            result.status = ExecutionStatus::Failed;
            result.message = Some(format!(
                "timeout exceeded: {:.3}ms elapsed, limit {limit_ms}ms",
                elapsed as f64 / NANOS_PER_MILLI as f64
            ));
            result.error = Some("timeout_exceeded".into());
            return Outcome {
                result,
                accepted: Some(ev),
                upstream_failed: false,
            };
        }
    }

    // ---- e. validator ----
    if let Some(validator) = &decl.validator {
        if !router.evaluate(validator, &ev.data, &ctx) {
            result.status = ExecutionStatus::Failed;
            result.message = Some(format!("validator rejected event '{}'", ev.id));
            result.error = Some("validator_failed".into());
            return Outcome {
                result,
                accepted: Some(ev),
                upstream_failed: false,
            };
        }
    }

    result.status = ExecutionStatus::Passed;
    Outcome {
        result,
        accepted: Some(ev),
        upstream_failed: false,
    }
}

fn passes(filter: Option<&Expression>, ev: &Event, ctx: &Value, router: &ExprRouter) -> bool {
    match filter {
        Some(f) => router.evaluate(f, &ev.data, ctx),
        None => true,
    }
}

/// `{"deps": [...], "data": ...}`; `data` only for exactly one dependency.
fn build_context(dep_events: &[&Event]) -> Value {
    let deps: Vec<Value> = dep_events
        .iter()
        .map(|e| {
            json!({
                "flow": e.flow,
                "id": e.node_id,
                "data": e.data,
                "ts": e.ts,
                "evId": e.id,
            })
        })
        .collect();

    let mut ctx = Map::new();
    if let [only] = dep_events {
        ctx.insert("data".into(), only.data.clone());
    }
    ctx.insert("deps".into(), Value::Array(deps));
    Value::Object(ctx)
}

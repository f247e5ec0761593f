//! Core domain models for flow evaluation.
//!
//! Declarations and events arrive from the store as loosely typed rows and
//! are converted here, eagerly, into the typed shapes the evaluator works
//! on. Reports serialise with the camelCase field names API and CLI
//! consumers expect.

use std::collections::BTreeMap;

use expr::Expression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::{EventRow, NodeRow};

use crate::EngineError;

// ---------------------------------------------------------------------------
// NodeKind / NodeSource
// ---------------------------------------------------------------------------

/// The role a node plays in its flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Starts a flow; has no upstream requirement.
    Trigger,
    /// Synchronisation or validation join point.
    Hook,
    Act,
    Assert,
    #[default]
    Generic,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trigger => write!(f, "trigger"),
            Self::Hook => write!(f, "hook"),
            Self::Act => write!(f, "act"),
            Self::Assert => write!(f, "assert"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trigger" => Ok(Self::Trigger),
            "hook" => Ok(Self::Hook),
            "act" => Ok(Self::Act),
            "assert" => Ok(Self::Assert),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Where a declaration came from. Not used by evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSource {
    Code,
    #[default]
    Manual,
}

impl std::str::FromStr for NodeSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown node source: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDeclaration
// ---------------------------------------------------------------------------

/// A timing constraint on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    /// Upper bound, in milliseconds, between the reference timestamp and the
    /// node's accepted event.
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

/// The static definition of one step in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeclaration {
    pub flow: String,
    pub id: String,
    pub kind: NodeKind,
    pub depends_on: Vec<String>,
    pub filter: Option<Expression>,
    pub validator: Option<Expression>,
    pub conditions: Vec<NodeCondition>,
    pub source: NodeSource,
    pub description: Option<String>,
}

impl NodeDeclaration {
    pub fn new(flow: impl Into<String>, id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            flow: flow.into(),
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            filter: None,
            validator: None,
            conditions: Vec::new(),
            source: NodeSource::default(),
            description: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_validator(mut self, validator: Expression) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.conditions.push(NodeCondition {
            timeout_ms: Some(timeout_ms),
        });
        self
    }

    /// The tightest timeout across all conditions.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.conditions.iter().filter_map(|c| c.timeout_ms).min()
    }
}

impl TryFrom<NodeRow> for NodeDeclaration {
    type Error = EngineError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| EngineError::InvalidDeclaration {
            flow: row.flow.clone(),
            node_id: row.id.clone(),
            reason,
        };

        let kind = row.kind.parse::<NodeKind>().map_err(invalid)?;
        let source = row.source.parse::<NodeSource>().map_err(invalid)?;
        let filter = parse_expression(row.filter.as_ref())
            .map_err(|e| invalid(format!("filter: {e}")))?;
        let validator = parse_expression(row.validator.as_ref())
            .map_err(|e| invalid(format!("validator: {e}")))?;
        let conditions = row
            .conditions
            .iter()
            .map(|c| serde_json::from_value::<NodeCondition>(c.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("conditions: {e}")))?;

        let mut depends_on: Vec<String> = Vec::with_capacity(row.dep_ids.len());
        for dep in &row.dep_ids {
            if !depends_on.contains(dep) {
                depends_on.push(dep.clone());
            }
        }

        Ok(Self {
            flow: row.flow,
            id: row.id,
            kind,
            depends_on,
            filter,
            validator,
            conditions,
            source,
            description: row.description,
        })
    }
}

/// Stored expressions are either `{engine, script}` objects or JSON strings
/// encoding one. `null` and the empty string mean "no expression".
fn parse_expression(raw: Option<&Value>) -> Result<Option<Expression>, String> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => serde_json::from_str(s)
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(other) => Err(format!("expected an object or string, got {other}")),
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable observed occurrence claiming to satisfy one node of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub flow: String,
    pub node_id: String,
    pub run_id: String,
    pub kind: NodeKind,
    pub data: Value,
    /// Nanoseconds.
    pub ts: i64,
}

impl TryFrom<EventRow> for Event {
    type Error = EngineError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse::<NodeKind>().map_err(|reason| EngineError::InvalidEvent {
            ev_id: row.id.clone(),
            reason,
        })?;
        Ok(Self {
            id: row.id,
            flow: row.flow,
            node_id: row.node_id,
            run_id: row.run_id,
            kind,
            data: row.data,
            ts: row.ts,
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of a node or of a whole run.
///
/// Evaluation only produces `Pending`, `Passed`, `Failed`, `Skipped` and
/// `TimedOut`; the rest exist for operational tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Error,
    Cancelled,
    TimedOut,
    Flaky,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            "flaky" => Ok(Self::Flaky),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome for one node of the considered subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub dep_node_ids: Vec<String>,
    pub status: ExecutionStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    /// Latency from the reference timestamp to the accepted event, in ns.
    pub elapsed_ns: i64,
    /// Every event recorded for this node in the run.
    pub ev_ids: Vec<String>,
    /// The accepted event of each dependency.
    pub upstream_ev_ids: Vec<String>,
}

/// Result of one evaluation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub status: ExecutionStatus,
    /// Wall-clock duration of the evaluation call itself.
    pub elapsed_ns: u64,
    /// Node id to direct dependents, restricted to the considered subgraph.
    pub graph: BTreeMap<String, Vec<String>>,
    pub exec_info: Vec<NodeResult>,
    /// Every event id considered.
    pub ev_ids: Vec<String>,
}

impl EvalReport {
    pub fn empty() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            elapsed_ns: 0,
            graph: BTreeMap::new(),
            exec_info: Vec::new(),
            ev_ids: Vec::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.exec_info.iter().find(|r| r.node_id == node_id)
    }

    /// Number of nodes per status, in status order.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.exec_info {
            *counts.entry(r.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

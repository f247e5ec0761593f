//! Row structs as they are stored.
//!
//! These are *persistence* shapes: loosely typed, carrying strings where the
//! domain has enums and raw JSON where it has expressions. Typed domain models
//! live in the `engine` crate, which converts rows eagerly on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// nodes
// ---------------------------------------------------------------------------

/// Soft-delete marker shared by stored rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    #[default]
    Active,
    Deleted,
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A stored node declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: String,
    pub flow: String,
    /// `trigger | hook | act | assert | generic`
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// `code | manual`
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub status: RowStatus,
    #[serde(default, alias = "dependsOn", alias = "depends_on")]
    pub dep_ids: Vec<String>,
    /// `{engine, script}` object, or a JSON string encoding one.
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub validator: Option<Value>,
    /// Raw condition objects, e.g. `{"timeout_ms": 100}`.
    #[serde(default)]
    pub conditions: Vec<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values accepted in an event's `type` field.
pub const EVENT_TYPES: &[&str] = &["trigger", "hook", "act", "assert", "generic"];

fn default_kind() -> String {
    "generic".into()
}

fn default_source() -> String {
    "manual".into()
}

impl NodeRow {
    /// Minimal active row; mostly for tests and fixtures built in code.
    pub fn new(flow: impl Into<String>, id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flow: flow.into(),
            kind: kind.into(),
            source: default_source(),
            status: RowStatus::Active,
            dep_ids: Vec::new(),
            filter: None,
            validator: None,
            conditions: Vec::new(),
            description: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dep_ids = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_validator(mut self, validator: Value) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RowStatus::Deleted
    }
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

/// A stored event. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    /// Assigned by the store when empty.
    #[serde(default)]
    pub id: String,
    pub flow: String,
    #[serde(alias = "nodeId")]
    pub node_id: String,
    #[serde(alias = "runId")]
    pub run_id: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Nanoseconds.
    pub ts: i64,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl EventRow {
    pub fn new(
        flow: impl Into<String>,
        node_id: impl Into<String>,
        run_id: impl Into<String>,
        data: Value,
        ts: i64,
    ) -> Self {
        Self {
            id: String::new(),
            flow: flow.into(),
            node_id: node_id.into(),
            run_id: run_id.into(),
            kind: default_kind(),
            data,
            ts,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_row_defaults() {
        let row: NodeRow = serde_json::from_value(json!({"id": "a", "flow": "f"})).unwrap();
        assert_eq!(row.kind, "generic");
        assert_eq!(row.source, "manual");
        assert_eq!(row.status, RowStatus::Active);
        assert!(row.dep_ids.is_empty());
        assert!(row.filter.is_none());
    }

    #[test]
    fn node_row_reads_stored_field_names() {
        let row: NodeRow = serde_json::from_value(json!({
            "id": "b",
            "flow": "f",
            "type": "hook",
            "status": "deleted",
            "dep_ids": ["a"],
            "validator": "{\"engine\": \"python\", \"script\": \"True\"}",
            "conditions": [{"timeout_ms": 100}]
        }))
        .unwrap();
        assert_eq!(row.kind, "hook");
        assert!(row.is_deleted());
        assert_eq!(row.dep_ids, vec!["a"]);
        assert!(row.validator.unwrap().is_string());
    }

    #[test]
    fn event_row_accepts_camel_case_aliases() {
        let row: EventRow = serde_json::from_value(json!({
            "flow": "f", "nodeId": "a", "runId": "r1", "ts": 5
        }))
        .unwrap();
        assert_eq!(row.node_id, "a");
        assert_eq!(row.run_id, "r1");
        assert!(row.id.is_empty());
        assert_eq!(row.data, json!({}));
    }
}

//! In-memory store, shared across tasks behind an async `RwLock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{EventRow, EventStore, NodeRow, NodeStore, RowStatus, StoreError, EVENT_TYPES};

#[derive(Default)]
struct Inner {
    /// Keyed by `(flow, id)`.
    nodes: BTreeMap<(String, String), NodeRow>,
    events: HashMap<String, EventRow>,
}

/// Cloneable handle to a process-local store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node declaration.
    pub async fn insert_node(&self, row: NodeRow) -> Result<(), StoreError> {
        if row.id.is_empty() || row.flow.is_empty() {
            return Err(StoreError::InvalidRecord(
                "node rows need a non-empty id and flow".into(),
            ));
        }
        let mut inner = self.inner.write().await;
        inner.nodes.insert((row.flow.clone(), row.id.clone()), row);
        Ok(())
    }

    /// Append events, assigning a fresh id to any event without one.
    ///
    /// Returns the ids in input order. Nothing is written if any event is
    /// rejected.
    pub async fn insert_events(&self, rows: Vec<EventRow>) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.write().await;

        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            if row.id.is_empty() {
                row.id = Uuid::new_v4().to_string();
            }
            if inner.events.contains_key(&row.id) || prepared.iter().any(|r: &EventRow| r.id == row.id) {
                return Err(StoreError::InvalidRecord(format!(
                    "duplicate event id '{}'",
                    row.id
                )));
            }
            if !EVENT_TYPES.contains(&row.kind.as_str()) {
                return Err(StoreError::InvalidRecord(format!(
                    "event '{}' has unknown type '{}'",
                    row.id, row.kind
                )));
            }
            prepared.push(row);
        }

        let ids = prepared.iter().map(|r| r.id.clone()).collect();
        for row in prepared {
            inner.events.insert(row.id.clone(), row);
        }
        Ok(ids)
    }

    /// Soft-delete a node; it stays stored but is no longer listed.
    pub async fn delete_node(&self, flow: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .nodes
            .get_mut(&(flow.to_owned(), id.to_owned()))
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| StoreError::NotFound {
                kind: "node",
                id: format!("{flow}/{id}"),
            })?;
        row.status = RowStatus::Deleted;
        row.deleted_at = Some(Utc::now());
        Ok(())
    }

    /// Every stored event, ordered by `ts` then id.
    pub async fn all_events(&self) -> Vec<EventRow> {
        let inner = self.inner.read().await;
        let mut events: Vec<EventRow> = inner.events.values().cloned().collect();
        sort_events(&mut events);
        events
    }
}

fn sort_events(events: &mut [EventRow]) {
    events.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl NodeStore for InMemoryStore {
    #[instrument(skip(self))]
    async fn list_nodes(&self, flow: &str) -> Result<Vec<NodeRow>, StoreError> {
        let inner = self.inner.read().await;
        let rows: Vec<NodeRow> = inner
            .nodes
            .values()
            .filter(|r| r.flow == flow && !r.is_deleted())
            .cloned()
            .collect();
        debug!(count = rows.len(), "listed nodes");
        Ok(rows)
    }

    async fn list_flows(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut flows: Vec<String> = inner
            .nodes
            .values()
            .filter(|r| !r.is_deleted())
            .map(|r| r.flow.clone())
            .collect();
        flows.dedup();
        Ok(flows)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    #[instrument(skip(self))]
    async fn list_events(&self, flow: &str, run_id: &str) -> Result<Vec<EventRow>, StoreError> {
        let inner = self.inner.read().await;
        let mut events: Vec<EventRow> = inner
            .events
            .values()
            .filter(|e| e.flow == flow && e.run_id == run_id)
            .cloned()
            .collect();
        sort_events(&mut events);
        debug!(count = events.len(), "listed events");
        Ok(events)
    }

    async fn get_event(&self, ev_id: &str) -> Result<EventRow, StoreError> {
        let inner = self.inner.read().await;
        inner
            .events
            .get(ev_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "event",
                id: ev_id.to_owned(),
            })
    }
}

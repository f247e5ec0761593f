//! Read-side store contracts the evaluator depends on.

use async_trait::async_trait;

use crate::{EventRow, NodeRow, StoreError};

/// Source of node declarations.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// All active nodes of `flow`, soft-deleted rows excluded, ordered by id.
    async fn list_nodes(&self, flow: &str) -> Result<Vec<NodeRow>, StoreError>;

    /// Names of every flow with at least one active node, sorted.
    async fn list_flows(&self) -> Result<Vec<String>, StoreError>;
}

/// Source of recorded events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events of one run of `flow`, ordered by `ts` then id.
    async fn list_events(&self, flow: &str, run_id: &str) -> Result<Vec<EventRow>, StoreError>;

    /// A single event by id, or `StoreError::NotFound`.
    async fn get_event(&self, ev_id: &str) -> Result<EventRow, StoreError>;
}

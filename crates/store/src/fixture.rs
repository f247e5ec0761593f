//! JSON fixtures: `{ "nodes": [...], "events": [...] }`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{EventRow, InMemoryStore, NodeRow, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub nodes: Vec<NodeRow>,
    #[serde(default)]
    pub events: Vec<EventRow>,
}

impl Fixture {
    /// Read and parse a fixture file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let fixture = Self::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            nodes = fixture.nodes.len(),
            events = fixture.events.len(),
            "loaded fixture"
        );
        Ok(fixture)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Load every node and event into a fresh in-memory store.
    ///
    /// Events without an id get one assigned; the assigned ids are written back
    /// into `self.events` so callers can refer to them.
    pub async fn populate(&mut self) -> Result<InMemoryStore, StoreError> {
        let store = InMemoryStore::new();
        for node in &self.nodes {
            store.insert_node(node.clone()).await?;
        }
        let ids = store.insert_events(self.events.clone()).await?;
        for (event, id) in self.events.iter_mut().zip(ids) {
            event.id = id;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventStore, NodeStore};

    const FIXTURE: &str = r#"{
        "nodes": [
            {"id": "order_created", "flow": "checkout", "type": "trigger"},
            {"id": "payment", "flow": "checkout", "type": "hook", "dep_ids": ["order_created"],
             "validator": {"engine": "python", "script": "data['ok'] == True"}}
        ],
        "events": [
            {"flow": "checkout", "node_id": "order_created", "run_id": "r1", "ts": 1000},
            {"id": "pay-1", "flow": "checkout", "node_id": "payment", "run_id": "r1",
             "data": {"ok": true}, "ts": 2000}
        ]
    }"#;

    #[tokio::test]
    async fn populates_store_and_assigns_ids() {
        let mut fixture = Fixture::from_slice(FIXTURE.as_bytes()).unwrap();
        let store = fixture.populate().await.unwrap();

        assert_eq!(store.list_nodes("checkout").await.unwrap().len(), 2);
        assert_eq!(fixture.events[1].id, "pay-1");
        assert!(!fixture.events[0].id.is_empty());

        let first = store.get_event(&fixture.events[0].id).await.unwrap();
        assert_eq!(first.node_id, "order_created");
    }

    #[tokio::test]
    async fn load_reads_from_disk() {
        let path = std::env::temp_dir().join(format!("flowcheck-fixture-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, FIXTURE).await.unwrap();

        let fixture = Fixture::load(&path).await.unwrap();
        assert_eq!(fixture.nodes.len(), 2);

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(matches!(Fixture::load(&path).await, Err(StoreError::Io(_))));
    }

    #[test]
    fn malformed_fixture_is_a_json_error() {
        assert!(matches!(
            Fixture::from_slice(b"{\"nodes\": 3}"),
            Err(StoreError::Json(_))
        ));
    }
}

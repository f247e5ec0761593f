//! Queue handle and evaluation worker.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use engine::{EngineError, EvalReport, EvalTarget, FlowEvaluator};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::QueueError;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Evaluate the whole flow instead of starting at the event's node.
    pub whole_graph: bool,
    /// Bound of the message channel created by [`WorkerConfig::channel`].
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            whole_graph: false,
            channel_capacity: 256,
        }
    }
}

impl WorkerConfig {
    pub fn channel(&self) -> (EvalQueue, mpsc::Receiver<EvalMessage>) {
        channel(self.channel_capacity)
    }
}

// ---------------------------------------------------------------------------
// Messages and handle
// ---------------------------------------------------------------------------

/// "These events were recorded; re-evaluate whatever they affect."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "evIds", rename_all = "snake_case")]
pub enum EvalMessage {
    Event(String),
    Batch(Vec<String>),
}

impl EvalMessage {
    pub fn into_ev_ids(self) -> Vec<String> {
        match self {
            Self::Event(id) => vec![id],
            Self::Batch(ids) => ids,
        }
    }
}

/// Producer side of the queue. Cheap to clone; the worker stops once every
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct EvalQueue {
    tx: mpsc::Sender<EvalMessage>,
}

/// Create a bounded queue and return `(handle, receiver)`.
pub fn channel(capacity: usize) -> (EvalQueue, mpsc::Receiver<EvalMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EvalQueue { tx }, rx)
}

impl EvalQueue {
    pub async fn notify_event(&self, ev_id: impl Into<String>) -> Result<(), QueueError> {
        self.send(EvalMessage::Event(ev_id.into())).await
    }

    /// Empty batches are dropped without touching the channel.
    pub async fn notify_batch<I, S>(&self, ev_ids: I) -> Result<(), QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ev_ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.send(EvalMessage::Batch(ids)).await
    }

    async fn send(&self, msg: EvalMessage) -> Result<(), QueueError> {
        self.tx.send(msg).await.map_err(|_| QueueError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One evaluation performed by the worker.
#[derive(Debug)]
pub struct EvalOutcome {
    /// `None` when the triggering event could not be resolved.
    pub target: Option<EvalTarget>,
    /// Events of the message that led to this evaluation.
    pub ev_ids: Vec<String>,
    pub result: Result<EvalReport, EngineError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub messages: usize,
    pub evaluations: usize,
    pub errors: usize,
}

pub struct EvalWorker {
    evaluator: FlowEvaluator,
    config: WorkerConfig,
}

impl EvalWorker {
    pub fn new(evaluator: FlowEvaluator, config: WorkerConfig) -> Self {
        Self { evaluator, config }
    }

    /// Run the worker loop as a tokio task.
    pub fn spawn(
        self,
        rx: mpsc::Receiver<EvalMessage>,
        out: mpsc::Sender<EvalOutcome>,
    ) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run(rx, out))
    }

    /// Drain `rx` until every queue handle is dropped or `out` is closed.
    #[instrument(skip_all, fields(whole_graph = self.config.whole_graph))]
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<EvalMessage>,
        out: mpsc::Sender<EvalOutcome>,
    ) -> WorkerStats {
        info!("evaluation worker started");
        let mut stats = WorkerStats::default();

        while let Some(msg) = rx.recv().await {
            stats.messages += 1;
            for outcome in self.process(msg.into_ev_ids()).await {
                stats.evaluations += usize::from(outcome.target.is_some());
                stats.errors += usize::from(outcome.result.is_err());
                if out.send(outcome).await.is_err() {
                    warn!("outcome receiver dropped; stopping worker");
                    return stats;
                }
            }
        }

        info!(
            messages = stats.messages,
            evaluations = stats.evaluations,
            errors = stats.errors,
            "queue closed; worker stopped"
        );
        stats
    }

    /// Resolve each event to its target and evaluate each distinct target
    /// once, in first-seen order.
    pub async fn process(&self, ev_ids: Vec<String>) -> Vec<EvalOutcome> {
        let mut outcomes = Vec::new();
        let mut order: Vec<EvalTarget> = Vec::new();
        let mut triggers: HashMap<EvalTarget, Vec<String>> = HashMap::new();

        for ev_id in ev_ids {
            match self
                .evaluator
                .resolve_event(&ev_id, self.config.whole_graph)
                .await
            {
                Ok(target) => match triggers.entry(target) {
                    Entry::Occupied(mut e) => {
                        debug!(ev_id = %ev_id, "event folded into pending evaluation");
                        e.get_mut().push(ev_id);
                    }
                    Entry::Vacant(e) => {
                        order.push(e.key().clone());
                        e.insert(vec![ev_id]);
                    }
                },
                Err(e) => {
                    warn!(ev_id = %ev_id, error = %e, "could not resolve event");
                    outcomes.push(EvalOutcome {
                        target: None,
                        ev_ids: vec![ev_id],
                        result: Err(e),
                    });
                }
            }
        }

        for target in order {
            let ev_ids = triggers.remove(&target).unwrap_or_default();
            let result = self.evaluator.evaluate_target(&target).await;
            if let Err(e) = &result {
                warn!(flow = %target.flow, run_id = %target.run_id, error = %e, "evaluation failed");
            }
            outcomes.push(EvalOutcome {
                target: Some(target),
                ev_ids,
                result,
            });
        }
        outcomes
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use engine::{EvaluatorConfig, ExecutionStatus};
    use expr::ExprRouter;
    use serde_json::json;
    use store::{EventRow, InMemoryStore, NodeRow};

    async fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_node(NodeRow::new("f", "a", "trigger")).await.unwrap();
        store
            .insert_node(NodeRow::new("f", "b", "act").depends_on(["a"]))
            .await
            .unwrap();
        store
            .insert_events(vec![
                EventRow::new("f", "a", "r1", json!({}), 1).with_id("a1"),
                EventRow::new("f", "b", "r1", json!({}), 2).with_id("b1"),
                EventRow::new("f", "b", "r1", json!({}), 3).with_id("b2"),
                EventRow::new("f", "a", "r2", json!({}), 4).with_id("a2"),
            ])
            .await
            .unwrap();
        store
    }

    fn worker(store: &InMemoryStore, whole_graph: bool) -> EvalWorker {
        let evaluator = FlowEvaluator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ExprRouter::with_defaults(),
            EvaluatorConfig::default(),
        );
        EvalWorker::new(
            evaluator,
            WorkerConfig {
                whole_graph,
                ..WorkerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn batch_is_deduplicated_per_target() {
        let store = store().await;
        let outcomes = worker(&store, false)
            .process(vec!["b1".into(), "b2".into(), "a1".into()])
            .await;

        assert_eq!(outcomes.len(), 2);
        let first = &outcomes[0];
        assert_eq!(first.ev_ids, vec!["b1", "b2"]);
        assert_eq!(
            first.target.as_ref().unwrap().start_node_id.as_deref(),
            Some("b")
        );
        assert_eq!(outcomes[1].ev_ids, vec!["a1"]);
    }

    #[tokio::test]
    async fn whole_graph_folds_a_run_into_one_evaluation() {
        let store = store().await;
        let outcomes = worker(&store, true)
            .process(vec!["a1".into(), "b1".into(), "a2".into()])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].ev_ids, vec!["a1", "b1"]);
        let report = outcomes[0].result.as_ref().unwrap();
        assert_eq!(report.status, ExecutionStatus::Passed);
        assert_eq!(outcomes[1].target.as_ref().unwrap().run_id, "r2");
    }

    #[tokio::test]
    async fn unknown_event_yields_an_error_outcome() {
        let store = store().await;
        let outcomes = worker(&store, false).process(vec!["ghost".into()]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].target.is_none());
        assert!(matches!(
            outcomes[0].result,
            Err(EngineError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn worker_drains_queue_and_stops_when_handles_drop() {
        let store = store().await;
        let (queue, rx) = channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let handle = worker(&store, false).spawn(rx, out_tx);

        queue.notify_event("a1").await.unwrap();
        queue.notify_batch(["b1", "ghost"]).await.unwrap();
        queue.notify_batch(Vec::<String>::new()).await.unwrap();
        drop(queue);

        let mut received = Vec::new();
        while let Some(outcome) = out_rx.recv().await {
            received.push(outcome);
        }
        assert_eq!(received.len(), 3);

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            WorkerStats {
                messages: 2,
                evaluations: 2,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn notify_after_worker_is_gone_is_closed() {
        let (queue, rx) = channel(1);
        drop(rx);
        assert!(matches!(
            queue.notify_event("x").await,
            Err(QueueError::Closed)
        ));
    }

    #[test]
    fn message_wire_format() {
        let msg = EvalMessage::Batch(vec!["e1".into()]);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"kind": "batch", "evIds": ["e1"]})
        );
    }
}

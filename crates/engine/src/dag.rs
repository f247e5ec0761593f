//! Flow graph construction and layered scheduling.
//!
//! Edges point from a dependency to its dependents. Ids that only appear as
//! dependency targets are still graph members; the evaluator treats them as
//! permanently unsatisfied.
//!
//! Layering is Kahn's algorithm run in waves: every node whose remaining
//! in-degree is zero forms the next layer. Layers are returned sorted so the
//! output is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{models::NodeDeclaration, EngineError};

/// Node id to the set of ids that directly depend on it.
pub type Graph = BTreeMap<String, BTreeSet<String>>;

/// Invert every declaration's `depends_on` into forward edges.
pub fn build_graph(nodes: &[NodeDeclaration]) -> Graph {
    let mut graph = Graph::new();
    for node in nodes {
        graph.entry(node.id.clone()).or_default();
        for dep in &node.depends_on {
            graph
                .entry(dep.clone())
                .or_default()
                .insert(node.id.clone());
        }
    }
    graph
}

/// Group the graph into layers such that each node's dependencies all sit in
/// strictly earlier layers.
///
/// # Errors
/// [`EngineError::CycleDetected`] when any node remains with positive
/// in-degree once no more zero in-degree nodes exist. No partial layering is
/// returned.
pub fn layered_topological_sort(graph: &Graph) -> Result<Vec<Vec<String>>, EngineError> {
    // In-degree over every id, including ones that only appear as dependents.
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (id, dependents) in graph {
        in_degree.entry(id.as_str()).or_insert(0);
        for dependent in dependents {
            *in_degree.entry(dependent.as_str()).or_insert(0) += 1;
        }
    }

    let mut layer: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut placed = 0usize;

    while !layer.is_empty() {
        let mut next: Vec<&str> = Vec::new();
        for &id in &layer {
            for dependent in graph.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(dependent.as_str());
                    }
                }
            }
        }
        placed += layer.len();
        layers.push(layer.iter().map(|id| (*id).to_owned()).collect());
        next.sort_unstable();
        layer = next;
    }

    if placed != in_degree.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(layers)
}

/// Every id reachable forward from `start`, `start` included.
pub fn reachable_from(graph: &Graph, start: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start.to_owned()]);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        for dependent in graph.get(&id).into_iter().flatten() {
            if !seen.contains(dependent) {
                queue.push_back(dependent.clone());
            }
        }
    }
    seen
}

/// The graph restricted to `keep`, in the report's list form.
pub fn restrict(graph: &Graph, keep: &BTreeSet<String>) -> BTreeMap<String, Vec<String>> {
    keep.iter()
        .map(|id| {
            let dependents = graph
                .get(id)
                .into_iter()
                .flatten()
                .filter(|d| keep.contains(*d))
                .cloned()
                .collect();
            (id.clone(), dependents)
        })
        .collect()
}

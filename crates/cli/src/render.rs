//! Plain-text rendering of flows and evaluation reports.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use engine::{layered_topological_sort, EvalReport, ExecutionStatus, Graph, NodeDeclaration};

const RULE: &str = "------------------------------------------------------------";

pub fn status_symbol(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Passed => "✓",
        ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Error => "✗",
        ExecutionStatus::Skipped | ExecutionStatus::Cancelled => "⊘",
        _ => "○",
    }
}

fn ms(ns: i64) -> String {
    format!("{:.2}ms", ns as f64 / 1_000_000.0)
}

/// Layers of a report-shaped graph. A cyclic graph, which the evaluator never
/// returns, collapses into one layer.
fn layers_of(graph: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let full: Graph = graph
        .iter()
        .map(|(id, deps)| (id.clone(), deps.iter().cloned().collect::<BTreeSet<_>>()))
        .collect();
    layered_topological_sort(&full).unwrap_or_else(|_| vec![graph.keys().cloned().collect()])
}

/// One line per node, grouped by layer, each with its status and dependents.
pub fn graph(
    graph: &BTreeMap<String, Vec<String>>,
    statuses: &HashMap<&str, ExecutionStatus>,
) -> String {
    let mut out = String::new();
    for (i, layer) in layers_of(graph).iter().enumerate() {
        for (j, id) in layer.iter().enumerate() {
            let label = if j == 0 { format!("L{i}") } else { String::new() };
            let status = statuses.get(id.as_str()).copied().unwrap_or(ExecutionStatus::Pending);
            let _ = write!(out, "  {label:<4}[{}] {id}", status_symbol(status));
            match graph.get(id) {
                Some(deps) if !deps.is_empty() => {
                    let _ = writeln!(out, "  ─> {}", deps.join(", "));
                }
                _ => out.push('\n'),
            }
        }
    }
    out
}

/// Headline block printed for every evaluation.
pub fn summary(report: &EvalReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(RULE.len()));
    let _ = writeln!(
        out,
        "Status: {} {}",
        status_symbol(report.status),
        report.status.to_string().to_uppercase()
    );
    let _ = writeln!(
        out,
        "Elapsed: {}",
        ms(i64::try_from(report.elapsed_ns).unwrap_or(i64::MAX))
    );
    let _ = writeln!(out, "Events processed: {}", report.ev_ids.len());
    let _ = writeln!(out, "Graph nodes: {}", report.graph.len());
    let _ = writeln!(out, "{}", "=".repeat(RULE.len()));

    let counts = report.status_counts();
    let count = |s: ExecutionStatus| counts.get(&s.to_string()).copied().unwrap_or(0);
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  ✓ Passed: {}", count(ExecutionStatus::Passed));
    for status in [ExecutionStatus::Failed, ExecutionStatus::Skipped] {
        let n = count(status);
        if n > 0 {
            let _ = writeln!(out, "  {} {}: {n}", status_symbol(status), capitalise(status));
        }
    }

    let failed: Vec<_> = report
        .exec_info
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\nFailed nodes:");
        for r in failed {
            let _ = writeln!(out, "  - {}", r.node_id);
            if let Some(msg) = &r.message {
                let _ = writeln!(out, "    {msg}");
            }
        }
    }
    out
}

fn capitalise(status: ExecutionStatus) -> String {
    let s = status.to_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => s,
    }
}

/// Per-node execution details.
pub fn details(report: &EvalReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Execution Details:\n{RULE}");
    for r in &report.exec_info {
        let _ = writeln!(out, "\nNode: {}", r.node_id);
        let _ = writeln!(out, "  Status: {} {}", status_symbol(r.status), r.status);
        if !r.dep_node_ids.is_empty() {
            let _ = writeln!(out, "  Dependencies: {}", r.dep_node_ids.join(", "));
        }
        if let Some(msg) = &r.message {
            let _ = writeln!(out, "  Message: {msg}");
        }
        if let Some(err) = &r.error {
            let _ = writeln!(out, "  Error: {err}");
        }
        let _ = writeln!(out, "  Events: {}", r.ev_ids.len());
        let _ = writeln!(out, "  Upstream events: {}", r.upstream_ev_ids.len());
        let _ = writeln!(out, "  Elapsed: {}", ms(r.elapsed_ns));
    }
    let _ = writeln!(out, "{RULE}");
    out
}

/// Static description of a flow: node list, graph, layers and node details.
pub fn flow_overview(flow: &str, nodes: &[NodeDeclaration], nodes_only: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(RULE.len()));
    let _ = writeln!(out, "Flow: {flow}\nNodes: {}", nodes.len());
    let _ = writeln!(out, "{}", "=".repeat(RULE.len()));

    if nodes_only {
        let _ = writeln!(out, "Nodes:");
        for n in nodes {
            let deps = if n.depends_on.is_empty() {
                String::new()
            } else {
                format!(" <- {}", n.depends_on.join(", "))
            };
            let _ = writeln!(out, "  {:<12} {}{deps}", n.kind.to_string(), n.id);
        }
        return out;
    }

    let full = engine::build_graph(nodes);
    let report_shape: BTreeMap<String, Vec<String>> = full
        .iter()
        .map(|(id, deps)| (id.clone(), deps.iter().cloned().collect()))
        .collect();

    let _ = writeln!(out, "Flow Graph:\n{RULE}");
    out.push_str(&graph(&report_shape, &HashMap::new()));
    let _ = writeln!(out, "{RULE}");

    match layered_topological_sort(&full) {
        Ok(layers) => {
            let _ = writeln!(out, "Execution Layers:");
            for (i, layer) in layers.iter().enumerate() {
                let _ = writeln!(out, "  Layer {i}: {}", layer.join(", "));
            }
        }
        Err(e) => {
            let _ = writeln!(out, "✗ {e}");
        }
    }

    let _ = writeln!(out, "\nNode Details:");
    for n in nodes {
        let _ = writeln!(out, "\n  {}:", n.id);
        let _ = writeln!(out, "    Type: {}", n.kind);
        if !n.depends_on.is_empty() {
            let _ = writeln!(out, "    Dependencies: {}", n.depends_on.join(", "));
        }
        if let Some(desc) = &n.description {
            let _ = writeln!(out, "    Description: {desc}");
        }
        if let Some(f) = &n.filter {
            let _ = writeln!(out, "    Filter ({}): {}", f.engine, f.script);
        }
        if let Some(v) = &n.validator {
            let _ = writeln!(out, "    Validator ({}): {}", v.engine, v.script);
        }
        if let Some(t) = n.timeout_ms() {
            let _ = writeln!(out, "    Timeout: {t}ms");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{NodeKind, NodeResult};
    use expr::Expression;

    fn result(id: &str, status: ExecutionStatus) -> NodeResult {
        NodeResult {
            node_id: id.into(),
            dep_node_ids: vec![],
            status,
            message: (status == ExecutionStatus::Failed).then(|| "validator rejected event 'e2'".into()),
            error: None,
            elapsed_ns: 1_500_000,
            ev_ids: vec![],
            upstream_ev_ids: vec![],
        }
    }

    #[test]
    fn symbols() {
        assert_eq!(status_symbol(ExecutionStatus::Passed), "✓");
        assert_eq!(status_symbol(ExecutionStatus::Failed), "✗");
        assert_eq!(status_symbol(ExecutionStatus::Skipped), "⊘");
        assert_eq!(status_symbol(ExecutionStatus::Pending), "○");
    }

    #[test]
    fn graph_lists_nodes_by_layer_with_status() {
        let g = BTreeMap::from([
            ("a".to_string(), vec!["b".to_string(), "c".to_string()]),
            ("b".to_string(), vec![]),
            ("c".to_string(), vec![]),
        ]);
        let statuses = HashMap::from([("a", ExecutionStatus::Passed), ("b", ExecutionStatus::Failed)]);
        let text = graph(&g, &statuses);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  L0  [✓] a  ─> b, c");
        assert_eq!(lines[1], "  L1  [✗] b");
        assert_eq!(lines[2], "      [○] c");
    }

    #[test]
    fn summary_counts_and_lists_failures() {
        let mut report = EvalReport::empty();
        report.status = ExecutionStatus::Failed;
        report.exec_info = vec![
            result("a", ExecutionStatus::Passed),
            result("b", ExecutionStatus::Failed),
            result("c", ExecutionStatus::Skipped),
        ];
        let text = summary(&report);
        assert!(text.contains("Status: ✗ FAILED"));
        assert!(text.contains("✓ Passed: 1"));
        assert!(text.contains("✗ Failed: 1"));
        assert!(text.contains("⊘ Skipped: 1"));
        assert!(text.contains("  - b\n    validator rejected event 'e2'"));
    }

    #[test]
    fn details_include_elapsed() {
        let mut report = EvalReport::empty();
        report.exec_info = vec![result("a", ExecutionStatus::Passed)];
        assert!(details(&report).contains("Elapsed: 1.50ms"));
    }

    #[test]
    fn overview_shows_layers_and_expressions() {
        let nodes = vec![
            NodeDeclaration::new("f", "a", NodeKind::Trigger),
            NodeDeclaration::new("f", "b", NodeKind::Hook)
                .depends_on(["a"])
                .with_validator(Expression::python("data['ok']"))
                .with_timeout_ms(500),
        ];
        let text = flow_overview("f", &nodes, false);
        assert!(text.contains("Layer 0: a"));
        assert!(text.contains("Layer 1: b"));
        assert!(text.contains("Validator (python): data['ok']"));
        assert!(text.contains("Timeout: 500ms"));

        let short = flow_overview("f", &nodes, true);
        assert!(short.contains("hook         b <- a"));
        assert!(!short.contains("Layer"));
    }

    #[test]
    fn overview_reports_cycles() {
        let nodes = vec![
            NodeDeclaration::new("f", "a", NodeKind::Hook).depends_on(["b"]),
            NodeDeclaration::new("f", "b", NodeKind::Hook).depends_on(["a"]),
        ];
        assert!(flow_overview("f", &nodes, false).contains("cycle"));
    }
}

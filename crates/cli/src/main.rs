//! `flowcheck` CLI entry-point.
//!
//! Every command works on a JSON fixture (`{"nodes": [...], "events": [...]}`)
//! loaded into an in-memory store.
//!
//! Available sub-commands:
//! - `show-graph`: list flows, or describe one flow's graph and layers.
//! - `eval-run`:   evaluate one run of a flow.
//! - `eval-event`: evaluate the run an event belongs to.
//! - `validate`:   check that every flow converts and is acyclic.
//! - `replay`:     push every fixture event through the evaluation worker.

mod render;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    build_graph, layered_topological_sort, AggregatePolicy, EngineError, EvalReport,
    EvaluatorConfig, FlowEvaluator,
};
use expr::ExprRouter;
use queue::{EvalWorker, WorkerConfig};
use store::{Fixture, InMemoryStore, NodeStore};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flowcheck",
    about = "Evaluate recorded business-flow events against declared flow graphs",
    version
)]
struct Cli {
    /// Path to the fixture JSON file.
    #[arg(long, short = 'f', env = "FLOWCHECK_FIXTURE")]
    fixture: PathBuf,

    /// Count any skipped node as a failure of the whole run.
    #[arg(long, env = "FLOWCHECK_STRICT")]
    strict: bool,

    /// Accept events recorded before their dependencies.
    #[arg(long)]
    allow_out_of_order: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List flows, or show one flow's graph.
    ShowGraph {
        flow: Option<String>,
        /// Show only node names without visualisation.
        #[arg(long)]
        nodes_only: bool,
    },
    /// Evaluate a single run of a flow.
    EvalRun {
        run_id: String,
        flow: String,
        /// Evaluate only the subgraph reachable from this node.
        #[arg(long)]
        start_node: Option<String>,
        #[arg(long)]
        json_output: bool,
        /// Per-node execution details.
        #[arg(long, short = 'v')]
        verbose: bool,
        /// ASCII graph with node statuses.
        #[arg(long = "show-graph", short = 'g')]
        show_graph: bool,
    },
    /// Evaluate the run an event belongs to.
    EvalEvent {
        ev_id: String,
        /// Evaluate the whole flow instead of starting at the event's node.
        #[arg(long)]
        whole_graph: bool,
        #[arg(long)]
        json_output: bool,
    },
    /// Check that every flow's declarations convert and form a DAG.
    Validate,
    /// Feed every fixture event through the evaluation worker.
    Replay {
        #[arg(long)]
        whole_graph: bool,
    },
}

struct App {
    store: InMemoryStore,
    evaluator: FlowEvaluator,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let mut fixture = Fixture::load(&cli.fixture)
            .await
            .with_context(|| format!("cannot load fixture {}", cli.fixture.display()))?;
        let store = fixture.populate().await.context("invalid fixture content")?;

        let config = EvaluatorConfig {
            aggregate_policy: if cli.strict {
                AggregatePolicy::Strict
            } else {
                AggregatePolicy::Lenient
            },
            reject_out_of_order: !cli.allow_out_of_order,
        };
        let evaluator = FlowEvaluator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ExprRouter::with_defaults(),
            config,
        );
        Ok(Self { store, evaluator })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::open(&cli).await?;

    match cli.command {
        Command::ShowGraph { flow, nodes_only } => show_graph(&app, flow, nodes_only).await,
        Command::EvalRun {
            run_id,
            flow,
            start_node,
            json_output,
            verbose,
            show_graph,
        } => {
            if !json_output {
                println!("Evaluating flow run: run_id={run_id}, flow={flow}");
                if let Some(start) = &start_node {
                    println!("Starting from node: {start}");
                }
            }
            let result = app.evaluator.evaluate(&run_id, &flow, start_node.as_deref()).await;
            let report = unwrap_report(result, &flow)?;
            print_report(&report, json_output, verbose, show_graph)
        }
        Command::EvalEvent {
            ev_id,
            whole_graph,
            json_output,
        } => {
            let target = app.evaluator.resolve_event(&ev_id, whole_graph).await?;
            if !json_output {
                println!(
                    "Event {ev_id}: run_id={}, flow={}, start={}",
                    target.run_id,
                    target.flow,
                    target.start_node_id.as_deref().unwrap_or("*")
                );
            }
            let report = unwrap_report(app.evaluator.evaluate_target(&target).await, &target.flow)?;
            print_report(&report, json_output, false, !json_output)
        }
        Command::Validate => validate(&app).await,
        Command::Replay { whole_graph } => replay(app, whole_graph).await,
    }
}

/// A cycle is printed as its own failure and exits with status 1.
fn unwrap_report(result: Result<EvalReport, EngineError>, flow: &str) -> Result<EvalReport> {
    match result {
        Err(EngineError::CycleDetected) => {
            eprintln!("✗ cycle detected: flow '{flow}' cannot be evaluated");
            std::process::exit(1);
        }
        other => other.with_context(|| format!("evaluation of flow '{flow}' failed")),
    }
}

fn print_report(report: &EvalReport, json_output: bool, verbose: bool, show_graph: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print!("{}", render::summary(report));
    if show_graph {
        let statuses: HashMap<&str, _> = report
            .exec_info
            .iter()
            .map(|r| (r.node_id.as_str(), r.status))
            .collect();
        println!("\nFlow Graph:\n{}", "-".repeat(60));
        print!("{}", render::graph(&report.graph, &statuses));
    }
    if verbose {
        println!();
        print!("{}", render::details(report));
    } else {
        println!("\nUse --verbose for detailed execution info");
    }
    Ok(())
}

async fn show_graph(app: &App, flow: Option<String>, nodes_only: bool) -> Result<()> {
    let Some(flow) = flow else {
        let flows = app.store.list_flows().await?;
        if flows.is_empty() {
            println!("No flows found");
            return Ok(());
        }
        println!("Available flows:");
        for (i, name) in flows.iter().enumerate() {
            let count = app.store.list_nodes(name).await?.len();
            println!("  {}. {name} ({count} nodes)", i + 1);
        }
        return Ok(());
    };

    let nodes = app.evaluator.load_declarations(&flow).await?;
    if nodes.is_empty() {
        println!("No nodes found for flow: {flow}");
        return Ok(());
    }
    print!("{}", render::flow_overview(&flow, &nodes, nodes_only));
    Ok(())
}

async fn validate(app: &App) -> Result<()> {
    let mut ok = true;
    for flow in app.store.list_flows().await? {
        match app.evaluator.load_declarations(&flow).await {
            Ok(nodes) => match layered_topological_sort(&build_graph(&nodes)) {
                Ok(layers) => println!("✓ {flow}: {} nodes in {} layers", nodes.len(), layers.len()),
                Err(EngineError::CycleDetected) => {
                    ok = false;
                    println!("✗ {flow}: cycle detected");
                }
                Err(e) => {
                    ok = false;
                    println!("✗ {flow}: {e}");
                }
            },
            Err(e) => {
                ok = false;
                println!("✗ {flow}: {e}");
            }
        }
    }
    if !ok {
        eprintln!("❌ Validation failed");
        std::process::exit(1);
    }
    println!("✅ All flows are valid");
    Ok(())
}

async fn replay(app: App, whole_graph: bool) -> Result<()> {
    let config = WorkerConfig {
        whole_graph,
        ..WorkerConfig::default()
    };
    let (queue, rx) = config.channel();
    let (out_tx, mut out_rx) = mpsc::channel(config.channel_capacity);
    let worker = EvalWorker::new(app.evaluator.clone(), config).spawn(rx, out_tx);

    let events = app.store.all_events().await;
    info!(events = events.len(), "replaying fixture events");
    let producer = tokio::spawn(async move {
        for ev in events {
            queue.notify_event(ev.id).await?;
        }
        Ok::<_, queue::QueueError>(())
    });

    while let Some(outcome) = out_rx.recv().await {
        let trigger = outcome.ev_ids.join(",");
        match (&outcome.target, &outcome.result) {
            (Some(t), Ok(report)) => println!(
                "{} {}/{} start={} status={} [{trigger}]",
                render::status_symbol(report.status),
                t.flow,
                t.run_id,
                t.start_node_id.as_deref().unwrap_or("*"),
                report.status
            ),
            (_, Err(EngineError::CycleDetected)) => println!("✗ cycle detected [{trigger}]"),
            (_, Err(e)) => println!("✗ error: {e} [{trigger}]"),
            (None, Ok(_)) => {}
        }
    }

    producer.await.context("replay producer panicked")??;
    let stats = worker.await.context("evaluation worker panicked")?;
    println!(
        "Replayed {} events: {} evaluations, {} errors",
        stats.messages, stats.evaluations, stats.errors
    );
    Ok(())
}

//! `engine` crate: flow models, graph layering, and the evaluation engine.

pub mod models;
pub mod error;
pub mod dag;
pub mod evaluator;

pub use models::{EvalReport, Event, ExecutionStatus, NodeDeclaration, NodeKind, NodeResult};
pub use error::EngineError;
pub use dag::{build_graph, layered_topological_sort, Graph};
pub use evaluator::{evaluate_flow, AggregatePolicy, EvalTarget, EvaluatorConfig, FlowEvaluator};

#[cfg(test)]
mod evaluator_tests;

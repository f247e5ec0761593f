//! Engine-level error types.

use thiserror::Error;

/// Errors that abort an evaluation call.
///
/// Everything else (failed validators, timeouts, missing events) is a node
/// status in the report, never an error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Layered topological sort found a cycle (self-loops included).
    #[error("flow graph contains a cycle")]
    CycleDetected,

    /// A stored node row could not be turned into a typed declaration.
    #[error("invalid declaration for node '{node_id}' in flow '{flow}': {reason}")]
    InvalidDeclaration {
        flow: String,
        node_id: String,
        reason: String,
    },

    /// A stored event row could not be turned into a typed event.
    #[error("invalid event '{ev_id}': {reason}")]
    InvalidEvent { ev_id: String, reason: String },

    /// `evaluate_event` was asked about an event the store does not have.
    #[error("event not found: '{0}'")]
    EventNotFound(String),

    /// Persistence error from the store crate.
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

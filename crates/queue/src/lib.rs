//! `queue` crate: re-evaluation triggers.
//!
//! Producers push event ids through an [`EvalQueue`]; an [`EvalWorker`]
//! drains them, evaluates the runs they belong to and publishes one
//! [`EvalOutcome`] per evaluation.

pub mod error;
pub mod worker;

pub use error::QueueError;
pub use worker::{channel, EvalMessage, EvalOutcome, EvalQueue, EvalWorker, WorkerConfig, WorkerStats};

//! `MockEngine`: a test double for `ExpressionEngine`.
//!
//! Lets evaluator tests control what a filter or validator returns and count
//! how often scripts were actually run.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::{Bindings, ExprError, ExpressionEngine};

/// Behaviour injected into `MockEngine` at construction time.
pub enum MockBehaviour {
    /// Return this value for every script.
    ReturnValue(Value),
    /// Return `true` only for scripts listed here, `false` otherwise.
    TrueFor(Vec<String>),
    /// Fail every call with this error.
    Fail(ExprError),
}

/// Records every script it receives, together with its bindings.
pub struct MockEngine {
    name: &'static str,
    pub behaviour: MockBehaviour,
    pub calls: Arc<Mutex<Vec<(String, Bindings)>>>,
}

impl MockEngine {
    /// A mock registered under `name` that always returns `value`.
    pub fn new(name: &'static str, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    pub fn with_behaviour(name: &'static str, behaviour: MockBehaviour) -> Self {
        Self {
            name,
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of scripts evaluated so far.
    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// Scripts evaluated so far, in call order.
    pub fn scripts(&self) -> Vec<String> {
        self.lock_calls().iter().map(|(s, _)| s.clone()).collect()
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<(String, Bindings)>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExpressionEngine for MockEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn eval(&self, script: &str, bindings: &Bindings) -> Result<Value, ExprError> {
        self.lock_calls().push((script.to_owned(), bindings.clone()));

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::TrueFor(scripts) => Ok(Value::Bool(scripts.iter().any(|s| s == script))),
            MockBehaviour::Fail(e) => Err(e.clone()),
        }
    }
}

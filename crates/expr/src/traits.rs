//! The `ExpressionEngine` trait: the contract every scripting engine fulfils.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::ExprError;

/// Top-level names visible to a script (`data`, `ctx`, ...).
pub type Bindings = Map<String, Value>;

/// A tagged script: which engine runs it and the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub engine: String,
    pub script: String,
}

impl Expression {
    pub fn new(engine: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            script: script.into(),
        }
    }

    pub fn python(script: impl Into<String>) -> Self {
        Self::new("python", script)
    }

    pub fn js(script: impl Into<String>) -> Self {
        Self::new("js", script)
    }
}

/// A sandboxed, stateless scripting engine.
///
/// Implementations must not touch the filesystem, network, processes or any
/// state shared between calls.
pub trait ExpressionEngine: Send + Sync {
    /// Name used in `Expression::engine` to select this engine.
    fn name(&self) -> &'static str;

    /// Evaluate `script` with `bindings` in scope and return its value.
    fn eval(&self, script: &str, bindings: &Bindings) -> Result<Value, ExprError>;

    /// Boolean evaluation with `data` and `ctx` bound.
    ///
    /// Fails closed: a foreign engine tag, any error, or a non-boolean result
    /// all yield `false`.
    fn evaluate(&self, expr: &Expression, data: &Value, ctx: &Value) -> bool {
        if expr.engine != self.name() {
            debug!(engine = self.name(), requested = %expr.engine, "expression routed to wrong engine");
            return false;
        }

        let mut bindings = Bindings::new();
        bindings.insert("data".into(), data.clone());
        bindings.insert("ctx".into(), ctx.clone());

        match self.eval(&expr.script, &bindings) {
            Ok(Value::Bool(b)) => b,
            Ok(other) => {
                debug!(engine = self.name(), result = %other, "expression returned a non-boolean value");
                false
            }
            Err(e) => {
                debug!(engine = self.name(), error = %e, "expression failed");
                false
            }
        }
    }
}

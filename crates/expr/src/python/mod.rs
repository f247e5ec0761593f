//! Python-class expression engine.
//!
//! Accepts a single Python expression over `data` and `ctx`: comparisons
//! (including chained ones), boolean logic, `in`/`not in`, `is None`,
//! arithmetic, subscripts, slices, ternaries, list and dict comprehensions,
//! a handful of string and dict methods, and the built-ins `len`, `min`,
//! `max`, `sum`, `str`, `int`, `float`, `bool`, `random` and `randint`.
//!
//! Anything else (imports, lambdas, attribute access beyond the allowed
//! methods, statements) is rejected at parse or evaluation time.

mod interp;
mod lexer;
mod parser;

use serde_json::Value;
use tracing::instrument;

use crate::{Bindings, ExprError, ExpressionEngine};

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonEngine;

impl PythonEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEngine for PythonEngine {
    fn name(&self) -> &'static str {
        "python"
    }

    #[instrument(level = "trace", skip(self, bindings))]
    fn eval(&self, script: &str, bindings: &Bindings) -> Result<Value, ExprError> {
        let tokens = lexer::tokenize(script)?;
        let ast = parser::parse(&tokens)?;
        interp::Interpreter::new(bindings).eval(&ast)
    }
}

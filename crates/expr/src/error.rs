//! Expression-level error type.

use thiserror::Error;

/// Errors raised while parsing or running an expression.
///
/// The boolean entry points never surface these: any error there means
/// `false`. Only the raw `eval` path hands them back to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// The script could not be tokenized or parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A name that is neither a binding, a local nor an allowed built-in.
    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    /// Indexing a map with a key it does not contain.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// An operation applied to a value of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// Any other runtime failure (division by zero, bad conversion, limits).
    #[error("evaluation error: {0}")]
    Eval(String),

    /// No engine is registered under this name.
    #[error("unknown expression engine '{0}'")]
    UnknownEngine(String),
}

impl ExprError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub(crate) fn type_err(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        Self::Eval(msg.into())
    }
}

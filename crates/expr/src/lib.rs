//! `expr` crate: sandboxed boolean expressions for node filters and validators.
//!
//! Every engine implements [`ExpressionEngine`]. The [`ExprRouter`] owns the
//! registered engines and is the only place that dispatches on an engine name.

pub mod error;
pub mod js;
pub mod mock;
pub mod python;
pub mod router;
pub mod traits;

pub use error::ExprError;
pub use js::JsEngine;
pub use python::PythonEngine;
pub use router::ExprRouter;
pub use traits::{Bindings, Expression, ExpressionEngine};

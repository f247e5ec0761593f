//! Dispatches expressions to the engine named by their tag.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::{Bindings, ExprError, Expression, ExpressionEngine, JsEngine, PythonEngine};

/// Registry of expression engines keyed by name.
///
/// Cheap to clone; engines are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ExprRouter {
    engines: HashMap<String, Arc<dyn ExpressionEngine>>,
}

impl ExprRouter {
    /// An empty router. Every expression evaluates to `false` until engines
    /// are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in `python` and `js` engines.
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(PythonEngine));
        router.register(Arc::new(JsEngine));
        router
    }

    /// Register an engine under its own name, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn ExpressionEngine>) {
        self.engines.insert(engine.name().to_owned(), engine);
    }

    pub fn engine(&self, name: &str) -> Option<&Arc<dyn ExpressionEngine>> {
        self.engines.get(name)
    }

    pub fn engine_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Boolean evaluation; an unregistered engine tag yields `false`.
    #[instrument(skip(self, data, ctx), fields(engine = %expr.engine))]
    pub fn evaluate(&self, expr: &Expression, data: &Value, ctx: &Value) -> bool {
        match self.engines.get(&expr.engine) {
            Some(engine) => engine.evaluate(expr, data, ctx),
            None => {
                warn!(engine = %expr.engine, "no expression engine registered under this name");
                false
            }
        }
    }

    /// Raw evaluation returning the script's value or its error.
    pub fn eval_expr(
        &self,
        engine: &str,
        script: &str,
        bindings: &Bindings,
    ) -> Result<Value, ExprError> {
        self.engines
            .get(engine)
            .ok_or_else(|| ExprError::UnknownEngine(engine.to_owned()))?
            .eval(script, bindings)
    }
}

impl std::fmt::Debug for ExprRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprRouter")
            .field("engines", &self.engine_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;
    use serde_json::json;

    #[test]
    fn routes_by_engine_tag() {
        let router = ExprRouter::with_defaults();
        let data = json!({"amount": 150});
        assert!(router.evaluate(&Expression::python("data['amount'] > 100"), &data, &json!({})));
        assert!(router.evaluate(&Expression::js("data.amount > 100"), &data, &json!({})));
    }

    #[test]
    fn engines_agree_on_equivalent_scripts() {
        let router = ExprRouter::with_defaults();
        let ctx = json!({"deps": [{"flow": "f", "id": "a", "data": {"user_id": "u1"}}], "data": {"user_id": "u1"}});
        let cases = [
            (
                "data['amount'] > 100 and data['status'] == 'active'",
                "data.amount > 100 && data.status === 'active'",
            ),
            ("'vip' in data['tags']", "data.tags.includes('vip')"),
            ("data['user_id'] == ctx['data']['user_id']", "data.user_id === ctx.data.user_id"),
            ("len(data['tags']) == 2", "data.tags.length === 2"),
        ];
        for data in [
            json!({"amount": 150, "status": "active", "tags": ["vip", "x"], "user_id": "u1"}),
            json!({"amount": 50, "status": "idle", "tags": ["y"], "user_id": "u2"}),
        ] {
            for (py, js) in cases {
                assert_eq!(
                    router.evaluate(&Expression::python(py), &data, &ctx),
                    router.evaluate(&Expression::js(js), &data, &ctx),
                    "{py} vs {js} on {data}"
                );
            }
        }
    }

    #[test]
    fn unknown_engine_is_false() {
        let router = ExprRouter::with_defaults();
        assert!(!router.evaluate(&Expression::new("cel", "true"), &json!({}), &json!({})));
    }

    #[test]
    fn eval_expr_returns_raw_values_and_errors() {
        let router = ExprRouter::with_defaults();
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), json!(2));

        assert_eq!(router.eval_expr("python", "x * 3", &bindings).unwrap(), json!(6));
        assert_eq!(router.eval_expr("js", "x * 3", &bindings).unwrap(), json!(6));
        assert!(matches!(
            router.eval_expr("python", "y", &bindings),
            Err(ExprError::UndefinedName(_))
        ));
        assert_eq!(
            router.eval_expr("cel", "x", &bindings),
            Err(ExprError::UnknownEngine("cel".into()))
        );
    }

    #[test]
    fn custom_engines_can_be_registered() {
        let mock = Arc::new(MockEngine::new("mock", json!(true)));
        let mut router = ExprRouter::new();
        router.register(mock.clone());

        assert!(router.evaluate(&Expression::new("mock", "anything"), &json!(1), &json!({})));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(router.engine_names(), vec!["mock"]);
    }
}

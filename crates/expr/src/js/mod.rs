//! JavaScript-class expression engine.
//!
//! A script is either a bare expression or, if it contains a `return`
//! statement, a function body. Comments of either style are allowed anywhere.
//! The language is a loop-free subset: no `function`, `new`, `this`, classes,
//! imports or global objects beyond `Math`, `Object`, `Number` and a few
//! conversion functions.

mod interp;
mod lexer;
mod parser;

use serde_json::Value;
use tracing::instrument;

use crate::{Bindings, ExprError, ExpressionEngine};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsEngine;

impl JsEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEngine for JsEngine {
    fn name(&self) -> &'static str {
        "js"
    }

    #[instrument(level = "trace", skip(self, bindings))]
    fn eval(&self, script: &str, bindings: &Bindings) -> Result<Value, ExprError> {
        let tokens = lexer::tokenize(script)?;
        let program = parser::parse(&tokens)?;
        interp::Interpreter::new(bindings).run(&program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Expression;
    use serde_json::json;

    fn check(script: &str, data: Value) -> bool {
        JsEngine.evaluate(&Expression::js(script), &data, &json!({}))
    }

    fn eval(script: &str, data: Value) -> Result<Value, ExprError> {
        let mut bindings = Bindings::new();
        bindings.insert("data".into(), data);
        bindings.insert("ctx".into(), json!({}));
        JsEngine.eval(script, &bindings)
    }

    #[test]
    fn simple_comparisons() {
        assert!(check("data.amount > 100", json!({"amount": 150})));
        assert!(!check("data.amount > 100", json!({"amount": 50})));
        assert!(check("data.status === 'active'", json!({"status": "active"})));
        assert!(check("data['price'] <= 99.99;", json!({"price": 99.99})));
    }

    #[test]
    fn logical_operators_and_ternary() {
        let data = json!({"amount": 150, "vip": false});
        assert!(check("data.amount > 100 && !data.vip", data.clone()));
        assert!(check("data.vip || data.amount > 100", data.clone()));
        assert!(check("data.amount > 100 ? true : false", data.clone()));
        assert!(check("(data.missing ?? 5) === 5", data));
    }

    #[test]
    fn string_and_array_methods() {
        let data = json!({"email": "USER@Example.com", "tags": ["a", "b"], "name": "user_7"});
        assert!(check("data.email.toLowerCase() === 'user@example.com'", data.clone()));
        assert!(check("data.tags.includes('b')", data.clone()));
        assert!(check("data.name.startsWith('user_')", data.clone()));
        assert!(check("data.tags.length === 2", data.clone()));
        assert!(check("data.tags.some(t => t === 'a')", data.clone()));
        assert!(check("data.tags.every(t => t.length === 1)", data.clone()));
        assert!(check("data.tags.map(t => t.toUpperCase()).join('-') === 'A-B'", data));
    }

    #[test]
    fn regex_literals() {
        let data = json!({"user_id": "user_123"});
        assert!(check("/^user_/.test(data.user_id)", data.clone()));
        assert!(check("/^USER_\\d+$/i.test(data.user_id)", data.clone()));
        assert!(!check("/^admin/.test(data.user_id)", data));
    }

    #[test]
    fn function_body_with_comments() {
        let script = "// check the amount\n\
                      /** multi-line\n * doc */\n\
                      const limit = 100;\n\
                      if (data.amount > limit) {\n\
                          return true;\n\
                      }\n\
                      return false;";
        assert!(check(script, json!({"amount": 150})));
        assert!(!check(script, json!({"amount": 50})));
    }

    #[test]
    fn return_inside_a_string_stays_an_expression() {
        assert!(check("data.kind === 'return'", json!({"kind": "return"})));
        assert!(check("data.note.includes(\"return\")", json!({"note": "no return"})));
    }

    #[test]
    fn reads_dependency_context() {
        let ctx = json!({"deps": [{"flow": "f", "id": "a", "data": {"user_id": "u1"}}], "data": {"user_id": "u1"}});
        let data = json!({"user_id": "u1"});
        let expr = Expression::js("data.user_id === ctx.deps[0].data.user_id && ctx.data.user_id === 'u1'");
        assert!(JsEngine.evaluate(&expr, &data, &ctx));
    }

    #[test]
    fn builtins() {
        let data = json!({"n": "42", "xs": [3, 9, 1], "obj": {"a": 1, "b": 2}});
        assert!(check("parseInt(data.n) === 42", data.clone()));
        assert!(check("Math.max(3, 9, 1) === 9", data.clone()));
        assert!(check("Math.abs(-2) === 2", data.clone()));
        assert!(check("Object.keys(data.obj).length === 2", data.clone()));
        assert!(check("Number('1.5') === 1.5", data.clone()));
        assert!(check("typeof data.n === 'string'", data.clone()));
        assert!(check("typeof nothing === 'undefined'", data));
    }

    #[test]
    fn raw_eval_converts_results() {
        assert_eq!(eval("data.a + 1", json!({"a": 1})).unwrap(), json!(2));
        assert_eq!(eval("data.a / 2", json!({"a": 3})).unwrap(), json!(1.5));
        assert_eq!(eval("'n=' + data.a", json!({"a": 3})).unwrap(), json!("n=3"));
        assert_eq!(eval("data.missing", json!({})).unwrap(), Value::Null);
        assert_eq!(eval("return\n1", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn fail_closed() {
        // non-boolean
        assert!(!check("data.amount", json!({"amount": 1})));
        // property of undefined
        assert!(!check("data.missing.deeper === 1", json!({})));
        // syntax error
        assert!(!check("data.amount >", json!({"amount": 1})));
        // undeclared identifier
        assert!(!check("nope === 1", json!({})));
        // no return value
        assert!(!check("const x = 1; return", json!({})));
        // wrong engine tag
        assert!(!JsEngine.evaluate(&Expression::python("True"), &json!({}), &json!({})));
    }

    #[test]
    fn error_kinds() {
        assert!(matches!(eval("nope", json!({})), Err(ExprError::UndefinedName(_))));
        assert!(matches!(eval("data.x.y", json!({})), Err(ExprError::Type(_))));
        assert!(matches!(eval("data.", json!({})), Err(ExprError::Parse(_))));
    }

    #[test]
    fn sandbox_rejects_escapes() {
        assert!(eval("new Function('return 1')()", json!({})).is_err());
        assert!(eval("require('fs')", json!({})).is_err());
        assert!(eval("process.exit(1)", json!({})).is_err());
        assert!(eval("globalThis", json!({})).is_err());
        assert!(eval("data = 1; return data", json!({})).is_err());
    }

    #[test]
    fn long_logical_chains_evaluate_without_recursion() {
        let data = json!({"a": 2});
        let misses = vec!["data.a === 1"; 10_000].join(" || ");
        assert!(!check(&misses, data.clone()));
        assert!(check(&format!("{misses} || data.a === 2"), data.clone()));

        let hits = vec!["data.a === 2"; 10_000].join(" && ");
        assert!(check(&hits, data.clone()));
        assert!(!check(&format!("{hits} && data.a === 1"), data));
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let sum = vec!["1"; 10_000].join(" + ");
        assert!(matches!(eval(&format!("{sum} > 0"), json!({})), Err(ExprError::Parse(_))));
        assert!(!check(&format!("data{} === 1", ".a".repeat(10_000)), json!({})));
    }

    #[test]
    fn runaway_callbacks_hit_the_step_budget() {
        let data = json!({"items": vec![0; 2_000]});
        let script = "data.items.map(a => data.items.map(b => a + b).length).length > 0";
        assert_eq!(
            eval(script, data.clone()),
            Err(ExprError::eval("evaluation budget exceeded"))
        );
        assert!(!check(script, data));
    }

    #[test]
    fn closures_cannot_recurse() {
        let script = "const f = x => f(x); return f(1)";
        assert!(matches!(eval(script, json!({})), Err(ExprError::UndefinedName(_))));
    }
}

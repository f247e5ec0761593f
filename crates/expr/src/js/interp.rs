//! Evaluator for the JavaScript subset.
//!
//! Runs over its own value type so that `undefined`, `NaN`, regexes and
//! closures can exist mid-evaluation; results are converted back to JSON.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Number, Value};

use super::parser::{ArrowBody, BinOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use crate::{Bindings, ExprError};

const MAX_STRING_LEN: usize = 1_000_000;
const MAX_ARRAY_LEN: usize = 100_000;
const REGEX_SIZE_LIMIT: usize = 1 << 20;
/// Upper bound on the number of nodes one evaluation may visit.
const MAX_STEPS: usize = 1_000_000;

#[derive(Debug, Clone)]
pub(crate) enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<JsValue>),
    Object(BTreeMap<String, JsValue>),
    Regex(Rc<JsRegex>),
    Function(Rc<Closure>),
}

#[derive(Debug)]
pub(crate) struct JsRegex {
    source: String,
    flags: String,
    re: Regex,
}

#[derive(Debug)]
pub(crate) struct Closure {
    params: Vec<String>,
    body: ArrowBody,
    captured: Scope,
}

#[derive(Debug, Clone)]
struct Binding {
    value: JsValue,
    constant: bool,
}

type Scope = HashMap<String, Binding>;

enum Flow {
    Normal,
    Return(JsValue),
}

pub(crate) struct Interpreter {
    scopes: Vec<Scope>,
    steps: usize,
}

impl Interpreter {
    pub(crate) fn new(bindings: &Bindings) -> Self {
        let globals = bindings
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    Binding {
                        value: from_json(v),
                        constant: true,
                    },
                )
            })
            .collect();
        Self {
            scopes: vec![globals],
            steps: 0,
        }
    }

    pub(crate) fn run(&mut self, program: &Program) -> Result<Value, ExprError> {
        let result = match program {
            Program::Expr(expr) => self.eval(expr)?,
            Program::Body(stmts) => match self.exec_block(stmts)? {
                Flow::Return(v) => v,
                Flow::Normal => JsValue::Undefined,
            },
        };
        Ok(to_json(&result))
    }

    // ---- statements ----

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ExprError> {
        self.scopes.push(Scope::new());
        let result = self.exec_all(stmts);
        self.scopes.pop();
        result
    }

    fn exec_all(&mut self, stmts: &[Stmt]) -> Result<Flow, ExprError> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ExprError> {
        match stmt {
            Stmt::Empty => {}
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Decl {
                name,
                init,
                constant,
            } => {
                let value = match init {
                    Some(e) => self.eval(e)?,
                    None => JsValue::Undefined,
                };
                let scope = self
                    .scopes
                    .last_mut()
                    .ok_or_else(|| ExprError::eval("no active scope"))?;
                if scope.contains_key(name) {
                    return Err(ExprError::parse(format!(
                        "identifier '{name}' has already been declared"
                    )));
                }
                scope.insert(
                    name.clone(),
                    Binding {
                        value,
                        constant: *constant,
                    },
                );
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                // The outermost scope holds the read-only inputs.
                let is_input = self.scopes.first().is_some_and(|g| g.contains_key(name));
                let binding = self
                    .scopes
                    .iter_mut()
                    .skip(1)
                    .rev()
                    .find_map(|s| s.get_mut(name));
                match binding {
                    Some(b) if !b.constant => b.value = value,
                    Some(_) => {
                        return Err(ExprError::type_err(format!(
                            "assignment to constant variable '{name}'"
                        )))
                    }
                    None if is_input => {
                        return Err(ExprError::type_err(format!(
                            "assignment to input '{name}'"
                        )))
                    }
                    None => return Err(ExprError::UndefinedName(name.clone())),
                }
            }
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => JsValue::Undefined,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(cond)?) {
                    return self.exec_nested(then);
                } else if let Some(other) = otherwise {
                    return self.exec_nested(other);
                }
            }
            Stmt::Block(stmts) => return self.exec_block(stmts),
        }
        Ok(Flow::Normal)
    }

    /// `if` branches always run in a scope of their own.
    fn exec_nested(&mut self, stmt: &Stmt) -> Result<Flow, ExprError> {
        match stmt {
            Stmt::Block(_) => self.exec(stmt),
            other => self.exec_block(std::slice::from_ref(other)),
        }
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> Result<JsValue, ExprError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ExprError::eval("evaluation budget exceeded"));
        }
        match expr {
            Expr::Num(n) => Ok(JsValue::Num(*n)),
            Expr::Str(s) => Ok(JsValue::Str(s.clone())),
            Expr::Bool(b) => Ok(JsValue::Bool(*b)),
            Expr::Null => Ok(JsValue::Null),
            Expr::Undefined => Ok(JsValue::Undefined),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(JsValue::Array(values))
            }
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (k, e) in entries {
                    let v = self.eval(e)?;
                    map.insert(k.clone(), v);
                }
                Ok(JsValue::Object(map))
            }
            Expr::Regex { pattern, flags } => compile_regex(pattern, flags),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let obj = self.eval(object)?;
                if *optional && is_nullish(&obj) {
                    return Ok(JsValue::Undefined);
                }
                get_property(&obj, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let obj = self.eval(object)?;
                if *optional && is_nullish(&obj) {
                    return Ok(JsValue::Undefined);
                }
                let key = self.eval(index)?;
                get_index(&obj, &key)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Unary { op, operand } => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                    if self.find(name).is_none() {
                        return Ok(JsValue::Str("undefined".into()));
                    }
                }
                let v = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => JsValue::Bool(!truthy(&v)),
                    UnaryOp::Neg => JsValue::Num(-to_number(&v)),
                    UnaryOp::Pos => JsValue::Num(to_number(&v)),
                    UnaryOp::TypeOf => JsValue::Str(type_of(&v).into()),
                })
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)
            }
            Expr::Logical { op, operands } => {
                let mut last = JsValue::Undefined;
                for operand in operands {
                    last = self.eval(operand)?;
                    let short_circuit = match op {
                        LogicalOp::And => !truthy(&last),
                        LogicalOp::Or => truthy(&last),
                        LogicalOp::Nullish => !is_nullish(&last),
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Arrow { params, body } => Ok(JsValue::Function(Rc::new(Closure {
                params: params.clone(),
                body: body.clone(),
                captured: self.snapshot(),
            }))),
        }
    }

    fn find(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup(&self, name: &str) -> Result<JsValue, ExprError> {
        if let Some(b) = self.find(name) {
            return Ok(b.value.clone());
        }
        match name {
            "NaN" => Ok(JsValue::Num(f64::NAN)),
            "Infinity" => Ok(JsValue::Num(f64::INFINITY)),
            _ => Err(ExprError::UndefinedName(name.to_owned())),
        }
    }

    /// Flatten visible bindings into one scope for a closure to capture.
    fn snapshot(&self) -> Scope {
        let mut flat = Scope::new();
        for scope in &self.scopes {
            for (k, v) in scope {
                flat.insert(k.clone(), v.clone());
            }
        }
        flat
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<JsValue, ExprError> {
        // Namespaced built-ins: Math.*, Object.*, Number.*
        if let Expr::Member {
            object, property, ..
        } = callee
        {
            if let Expr::Ident(ns) = object.as_ref() {
                if self.find(ns).is_none() && matches!(ns.as_str(), "Math" | "Object" | "Number") {
                    let args = self.eval_args(args)?;
                    return call_namespaced(ns, property, &args);
                }
            }

            let receiver = self.eval(object)?;
            if let Expr::Member { optional: true, .. } = callee {
                if is_nullish(&receiver) {
                    return Ok(JsValue::Undefined);
                }
            }
            let args = self.eval_args(args)?;
            return self.call_method(&receiver, property, args);
        }

        if let Expr::Ident(name) = callee {
            if self.find(name).is_none() {
                let args = self.eval_args(args)?;
                return call_global(name, &args);
            }
        }

        let func = self.eval(callee)?;
        let args = self.eval_args(args)?;
        self.apply(&func, args)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<JsValue>, ExprError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn apply(&mut self, func: &JsValue, args: Vec<JsValue>) -> Result<JsValue, ExprError> {
        let JsValue::Function(closure) = func else {
            return Err(ExprError::type_err(format!(
                "{} is not a function",
                type_of(func)
            )));
        };

        let mut frame = Scope::new();
        let mut args = args.into_iter();
        for param in &closure.params {
            frame.insert(
                param.clone(),
                Binding {
                    value: args.next().unwrap_or(JsValue::Undefined),
                    constant: false,
                },
            );
        }

        // Closures see only what they captured, never the caller's locals.
        let saved = std::mem::replace(
            &mut self.scopes,
            vec![closure.captured.clone(), frame],
        );
        let result = match &closure.body {
            ArrowBody::Expr(e) => self.eval(e),
            ArrowBody::Block(stmts) => self.exec_block(stmts).map(|flow| match flow {
                Flow::Return(v) => v,
                Flow::Normal => JsValue::Undefined,
            }),
        };
        self.scopes = saved;
        result
    }

    fn call_method(
        &mut self,
        receiver: &JsValue,
        name: &str,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ExprError> {
        match receiver {
            JsValue::Str(s) => string_method(s, name, &args),
            JsValue::Array(items) => self.array_method(items, name, args),
            JsValue::Regex(re) => match name {
                "test" => {
                    let input = args.first().map(to_string).unwrap_or_else(|| "undefined".into());
                    Ok(JsValue::Bool(re.re.is_match(&input)))
                }
                _ => Err(not_a_function(receiver, name)),
            },
            JsValue::Object(map) => match map.get(name) {
                Some(f @ JsValue::Function(_)) => {
                    let f = f.clone();
                    self.apply(&f, args)
                }
                _ => Err(not_a_function(receiver, name)),
            },
            JsValue::Undefined | JsValue::Null => Err(ExprError::type_err(format!(
                "cannot read properties of {} (reading '{name}')",
                to_string(receiver)
            ))),
            _ => Err(not_a_function(receiver, name)),
        }
    }

    fn array_method(
        &mut self,
        items: &[JsValue],
        name: &str,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ExprError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(JsValue::Undefined);

        match name {
            "includes" => Ok(JsValue::Bool(
                items.iter().any(|v| same_value_zero(v, &arg(0))),
            )),
            "indexOf" => Ok(JsValue::Num(
                items
                    .iter()
                    .position(|v| strict_eq(v, &arg(0)))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )),
            "join" => {
                let sep = match arg(0) {
                    JsValue::Undefined => ",".to_owned(),
                    other => to_string(&other),
                };
                let joined = items
                    .iter()
                    .map(|v| match v {
                        JsValue::Undefined | JsValue::Null => String::new(),
                        other => to_string(other),
                    })
                    .collect::<Vec<_>>()
                    .join(&sep);
                check_str(joined)
            }
            "slice" => {
                let (lo, hi) = slice_bounds(items.len(), &arg(0), &arg(1));
                Ok(JsValue::Array(items[lo..hi.max(lo)].to_vec()))
            }
            "some" | "every" | "filter" | "map" | "find" | "findIndex" => {
                let func = arg(0);
                let mut mapped = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let out = self.apply(
                        &func,
                        vec![item.clone(), JsValue::Num(i as f64), JsValue::Array(items.to_vec())],
                    )?;
                    match name {
                        "some" if truthy(&out) => return Ok(JsValue::Bool(true)),
                        "every" if !truthy(&out) => return Ok(JsValue::Bool(false)),
                        "find" if truthy(&out) => return Ok(item.clone()),
                        "findIndex" if truthy(&out) => return Ok(JsValue::Num(i as f64)),
                        "filter" if truthy(&out) => mapped.push(item.clone()),
                        "map" => mapped.push(out),
                        _ => {}
                    }
                }
                Ok(match name {
                    "some" => JsValue::Bool(false),
                    "every" => JsValue::Bool(true),
                    "find" => JsValue::Undefined,
                    "findIndex" => JsValue::Num(-1.0),
                    _ => JsValue::Array(mapped),
                })
            }
            _ => Err(not_a_function(&JsValue::Array(Vec::new()), name)),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn call_global(name: &str, args: &[JsValue]) -> Result<JsValue, ExprError> {
    let first = args.first().cloned().unwrap_or(JsValue::Undefined);
    match name {
        "parseInt" => {
            let s = to_string(&first);
            let t = s.trim_start();
            let (sign, digits) = match t.strip_prefix('-') {
                Some(rest) => (-1.0, rest),
                None => (1.0, t.strip_prefix('+').unwrap_or(t)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            Ok(JsValue::Num(match digits[..end].parse::<f64>() {
                Ok(n) => sign * n,
                Err(_) => f64::NAN,
            }))
        }
        "parseFloat" => {
            let s = to_string(&first);
            let t = s.trim_start();
            let end = t
                .char_indices()
                .take_while(|(i, c)| {
                    c.is_ascii_digit()
                        || *c == '.'
                        || ((*c == '-' || *c == '+') && *i == 0)
                        || *c == 'e'
                        || *c == 'E'
                })
                .count();
            let mut n = f64::NAN;
            for cut in (1..=end).rev() {
                if let Ok(v) = t[..cut].parse::<f64>() {
                    n = v;
                    break;
                }
            }
            Ok(JsValue::Num(n))
        }
        "Number" => Ok(JsValue::Num(if args.is_empty() {
            0.0
        } else {
            to_number(&first)
        })),
        "String" => check_str(if args.is_empty() {
            String::new()
        } else {
            to_string(&first)
        }),
        "Boolean" => Ok(JsValue::Bool(truthy(&first))),
        "isNaN" => Ok(JsValue::Bool(to_number(&first).is_nan())),
        other => Err(ExprError::UndefinedName(other.to_owned())),
    }
}

fn call_namespaced(ns: &str, name: &str, args: &[JsValue]) -> Result<JsValue, ExprError> {
    let nums: Vec<f64> = args.iter().map(to_number).collect();
    let first = nums.first().copied().unwrap_or(f64::NAN);
    let value = match (ns, name) {
        ("Math", "abs") => JsValue::Num(first.abs()),
        ("Math", "floor") => JsValue::Num(first.floor()),
        ("Math", "ceil") => JsValue::Num(first.ceil()),
        ("Math", "round") => JsValue::Num((first + 0.5).floor()),
        ("Math", "sqrt") => JsValue::Num(first.sqrt()),
        ("Math", "min") => JsValue::Num(nums.iter().copied().fold(f64::INFINITY, js_min)),
        ("Math", "max") => JsValue::Num(nums.iter().copied().fold(f64::NEG_INFINITY, js_max)),
        ("Number", "isInteger") => JsValue::Bool(
            matches!(args.first(), Some(JsValue::Num(n)) if n.is_finite() && n.fract() == 0.0),
        ),
        ("Object", "keys" | "values" | "entries") => {
            let Some(JsValue::Object(map)) = args.first() else {
                return Err(ExprError::type_err(format!(
                    "Object.{name} expects an object"
                )));
            };
            JsValue::Array(match name {
                "keys" => map.keys().cloned().map(JsValue::Str).collect(),
                "values" => map.values().cloned().collect(),
                _ => map
                    .iter()
                    .map(|(k, v)| JsValue::Array(vec![JsValue::Str(k.clone()), v.clone()]))
                    .collect(),
            })
        }
        _ => {
            return Err(ExprError::type_err(format!(
                "{ns}.{name} is not a function"
            )))
        }
    };
    Ok(value)
}

fn js_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn js_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn string_method(s: &str, name: &str, args: &[JsValue]) -> Result<JsValue, ExprError> {
    let arg_str = |i: usize| {
        args.get(i)
            .map(to_string)
            .unwrap_or_else(|| "undefined".into())
    };

    let out = match name {
        "toLowerCase" => JsValue::Str(s.to_lowercase()),
        "toUpperCase" => JsValue::Str(s.to_uppercase()),
        "trim" => JsValue::Str(s.trim().to_owned()),
        "includes" => JsValue::Bool(s.contains(arg_str(0).as_str())),
        "startsWith" => JsValue::Bool(s.starts_with(arg_str(0).as_str())),
        "endsWith" => JsValue::Bool(s.ends_with(arg_str(0).as_str())),
        "indexOf" => JsValue::Num(match s.find(arg_str(0).as_str()) {
            Some(byte) => s[..byte].chars().count() as f64,
            None => -1.0,
        }),
        "split" => match args.first() {
            None | Some(JsValue::Undefined) => JsValue::Array(vec![JsValue::Str(s.to_owned())]),
            Some(sep) => {
                let sep = to_string(sep);
                let parts: Vec<JsValue> = if sep.is_empty() {
                    s.chars().map(|c| JsValue::Str(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(|p| JsValue::Str(p.to_owned())).collect()
                };
                JsValue::Array(parts)
            }
        },
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let undefined = JsValue::Undefined;
            let (lo, hi) = slice_bounds(
                chars.len(),
                args.first().unwrap_or(&undefined),
                args.get(1).unwrap_or(&undefined),
            );
            JsValue::Str(chars[lo..hi.max(lo)].iter().collect())
        }
        "match" | "replace" | "search" => {
            return Err(ExprError::type_err(format!(
                "String.prototype.{name} is not supported"
            )))
        }
        _ => return Err(not_a_function(&JsValue::Str(s.to_owned()), name)),
    };
    Ok(out)
}

fn slice_bounds(len: usize, start: &JsValue, end: &JsValue) -> (usize, usize) {
    let resolve = |v: &JsValue, default: usize| -> usize {
        if matches!(v, JsValue::Undefined) {
            return default;
        }
        let n = to_number(v);
        if n.is_nan() {
            return 0;
        }
        let n = n.trunc();
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            (n as usize).min(len)
        }
    };
    (resolve(start, 0), resolve(end, len))
}

fn compile_regex(pattern: &str, flags: &str) -> Result<JsValue, ExprError> {
    let mut builder = RegexBuilder::new(pattern);
    builder.size_limit(REGEX_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'y' | 'u' => {}
            other => return Err(ExprError::parse(format!("invalid regex flag '{other}'"))),
        }
    }
    let re = builder
        .build()
        .map_err(|e| ExprError::parse(format!("invalid regex /{pattern}/: {e}")))?;
    Ok(JsValue::Regex(Rc::new(JsRegex {
        source: pattern.to_owned(),
        flags: flags.to_owned(),
        re,
    })))
}

// ---------------------------------------------------------------------------
// Property access
// ---------------------------------------------------------------------------

fn get_property(obj: &JsValue, name: &str) -> Result<JsValue, ExprError> {
    match obj {
        JsValue::Undefined | JsValue::Null => Err(ExprError::type_err(format!(
            "cannot read properties of {} (reading '{name}')",
            to_string(obj)
        ))),
        JsValue::Object(map) => Ok(map.get(name).cloned().unwrap_or(JsValue::Undefined)),
        JsValue::Array(items) if name == "length" => Ok(JsValue::Num(items.len() as f64)),
        JsValue::Str(s) if name == "length" => {
            Ok(JsValue::Num(s.encode_utf16().count() as f64))
        }
        JsValue::Regex(re) => Ok(match name {
            "source" => JsValue::Str(re.source.clone()),
            "flags" => JsValue::Str(re.flags.clone()),
            _ => JsValue::Undefined,
        }),
        _ => Ok(JsValue::Undefined),
    }
}

fn get_index(obj: &JsValue, key: &JsValue) -> Result<JsValue, ExprError> {
    match (obj, key) {
        (JsValue::Array(items), JsValue::Num(n)) => Ok(array_slot(items.len(), *n)
            .map(|i| items[i].clone())
            .unwrap_or(JsValue::Undefined)),
        (JsValue::Str(s), JsValue::Num(n)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(array_slot(chars.len(), *n)
                .map(|i| JsValue::Str(chars[i].to_string()))
                .unwrap_or(JsValue::Undefined))
        }
        _ => get_property(obj, &to_string(key)),
    }
}

fn array_slot(len: usize, n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && (n as usize) < len).then_some(n as usize)
}

fn not_a_function(receiver: &JsValue, name: &str) -> ExprError {
    ExprError::type_err(format!("{}.{name} is not a function", type_of(receiver)))
}

// ---------------------------------------------------------------------------
// Operators and conversions
// ---------------------------------------------------------------------------

fn binary(op: BinOp, l: &JsValue, r: &JsValue) -> Result<JsValue, ExprError> {
    let num = |f: fn(f64, f64) -> f64| JsValue::Num(f(to_number(l), to_number(r)));
    Ok(match op {
        BinOp::StrictEq => JsValue::Bool(strict_eq(l, r)),
        BinOp::StrictNe => JsValue::Bool(!strict_eq(l, r)),
        BinOp::LooseEq => JsValue::Bool(loose_eq(l, r)),
        BinOp::LooseNe => JsValue::Bool(!loose_eq(l, r)),
        BinOp::Lt => JsValue::Bool(compare(l, r, |o| o.is_lt())),
        BinOp::Le => JsValue::Bool(compare(l, r, |o| o.is_le())),
        BinOp::Gt => JsValue::Bool(compare(l, r, |o| o.is_gt())),
        BinOp::Ge => JsValue::Bool(compare(l, r, |o| o.is_ge())),
        BinOp::Add => {
            if is_stringish(l) || is_stringish(r) {
                let (a, b) = (to_string(l), to_string(r));
                if a.len() + b.len() > MAX_STRING_LEN {
                    return Err(ExprError::eval("string too long"));
                }
                JsValue::Str(a + &b)
            } else {
                num(|a, b| a + b)
            }
        }
        BinOp::Sub => num(|a, b| a - b),
        BinOp::Mul => num(|a, b| a * b),
        BinOp::Div => num(|a, b| a / b),
        BinOp::Rem => num(|a, b| a % b),
        BinOp::Pow => num(f64::powf),
    })
}

fn is_stringish(v: &JsValue) -> bool {
    matches!(
        v,
        JsValue::Str(_) | JsValue::Array(_) | JsValue::Object(_) | JsValue::Regex(_) | JsValue::Function(_)
    )
}

fn compare(l: &JsValue, r: &JsValue, pick: fn(std::cmp::Ordering) -> bool) -> bool {
    if let (JsValue::Str(a), JsValue::Str(b)) = (l, r) {
        return pick(a.encode_utf16().cmp(b.encode_utf16()));
    }
    match to_number(l).partial_cmp(&to_number(r)) {
        Some(o) => pick(o),
        None => false,
    }
}

/// `===`, with structural comparison for arrays and objects.
fn strict_eq(l: &JsValue, r: &JsValue) -> bool {
    match (l, r) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
        (JsValue::Num(a), JsValue::Num(b)) => a == b,
        (JsValue::Str(a), JsValue::Str(b)) => a == b,
        (JsValue::Array(a), JsValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_eq(x, y))
        }
        (JsValue::Object(a), JsValue::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| strict_eq(v, w)))
        }
        (JsValue::Regex(a), JsValue::Regex(b)) => Rc::ptr_eq(a, b),
        (JsValue::Function(a), JsValue::Function(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn same_value_zero(l: &JsValue, r: &JsValue) -> bool {
    match (l, r) {
        (JsValue::Num(a), JsValue::Num(b)) if a.is_nan() && b.is_nan() => true,
        _ => strict_eq(l, r),
    }
}

fn loose_eq(l: &JsValue, r: &JsValue) -> bool {
    match (l, r) {
        (JsValue::Undefined | JsValue::Null, JsValue::Undefined | JsValue::Null) => true,
        (JsValue::Undefined | JsValue::Null, _) | (_, JsValue::Undefined | JsValue::Null) => false,
        (JsValue::Num(_), JsValue::Str(_))
        | (JsValue::Str(_), JsValue::Num(_))
        | (JsValue::Bool(_), _)
        | (_, JsValue::Bool(_)) => to_number(l) == to_number(r),
        _ => strict_eq(l, r),
    }
}

fn is_nullish(v: &JsValue) -> bool {
    matches!(v, JsValue::Undefined | JsValue::Null)
}

fn truthy(v: &JsValue) -> bool {
    match v {
        JsValue::Undefined | JsValue::Null => false,
        JsValue::Bool(b) => *b,
        JsValue::Num(n) => *n != 0.0 && !n.is_nan(),
        JsValue::Str(s) => !s.is_empty(),
        _ => true,
    }
}

fn to_number(v: &JsValue) -> f64 {
    match v {
        JsValue::Undefined => f64::NAN,
        JsValue::Null => 0.0,
        JsValue::Bool(b) => f64::from(u8::from(*b)),
        JsValue::Num(n) => *n,
        JsValue::Str(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                match t {
                    "Infinity" | "+Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ if t.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
                        f64::NAN
                    }
                    _ => t.parse().unwrap_or(f64::NAN),
                }
            }
        }
        JsValue::Array(items) => match items.as_slice() {
            [] => 0.0,
            [only] => to_number(&JsValue::Str(to_string(only))),
            _ => f64::NAN,
        },
        _ => f64::NAN,
    }
}

fn to_string(v: &JsValue) -> String {
    match v {
        JsValue::Undefined => "undefined".into(),
        JsValue::Null => "null".into(),
        JsValue::Bool(b) => b.to_string(),
        JsValue::Num(n) => number_to_string(*n),
        JsValue::Str(s) => s.clone(),
        JsValue::Array(items) => items
            .iter()
            .map(|v| match v {
                JsValue::Undefined | JsValue::Null => String::new(),
                other => to_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        JsValue::Object(_) => "[object Object]".into(),
        JsValue::Regex(re) => format!("/{}/{}", re.source, re.flags),
        JsValue::Function(_) => "function () { [native code] }".into(),
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn type_of(v: &JsValue) -> &'static str {
    match v {
        JsValue::Undefined => "undefined",
        JsValue::Bool(_) => "boolean",
        JsValue::Num(_) => "number",
        JsValue::Str(_) => "string",
        JsValue::Function(_) => "function",
        JsValue::Null | JsValue::Array(_) | JsValue::Object(_) | JsValue::Regex(_) => "object",
    }
}

fn check_str(s: String) -> Result<JsValue, ExprError> {
    if s.len() > MAX_STRING_LEN {
        return Err(ExprError::eval("string too long"));
    }
    Ok(JsValue::Str(s))
}

// ---------------------------------------------------------------------------
// JSON bridge
// ---------------------------------------------------------------------------

fn from_json(v: &Value) -> JsValue {
    match v {
        Value::Null => JsValue::Null,
        Value::Bool(b) => JsValue::Bool(*b),
        Value::Number(n) => JsValue::Num(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => JsValue::Str(s.clone()),
        Value::Array(items) => JsValue::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => JsValue::Object(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
        ),
    }
}

/// Integral numbers come back as JSON integers; non-finite ones and
/// `undefined` become `null`, as `JSON.stringify` would.
fn to_json(v: &JsValue) -> Value {
    match v {
        JsValue::Undefined | JsValue::Null | JsValue::Function(_) => Value::Null,
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                Value::from(*n as i64)
            } else {
                Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        JsValue::Str(s) => Value::String(s.clone()),
        JsValue::Array(items) if items.len() <= MAX_ARRAY_LEN => {
            Value::Array(items.iter().map(to_json).collect())
        }
        JsValue::Array(_) => Value::Null,
        JsValue::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        JsValue::Regex(_) => Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_equality_coerces() {
        assert!(loose_eq(&JsValue::Num(1.0), &JsValue::Str("1".into())));
        assert!(loose_eq(&JsValue::Null, &JsValue::Undefined));
        assert!(!strict_eq(&JsValue::Num(1.0), &JsValue::Str("1".into())));
        assert!(!strict_eq(&JsValue::Num(f64::NAN), &JsValue::Num(f64::NAN)));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn to_number_matches_js_rules() {
        assert_eq!(to_number(&JsValue::Str(" 42 ".into())), 42.0);
        assert_eq!(to_number(&JsValue::Str("".into())), 0.0);
        assert!(to_number(&JsValue::Str("abc".into())).is_nan());
        assert!(to_number(&JsValue::Undefined).is_nan());
    }

    #[test]
    fn integral_results_become_json_integers() {
        assert_eq!(to_json(&JsValue::Num(3.0)), Value::from(3));
        assert_eq!(to_json(&JsValue::Num(f64::INFINITY)), Value::Null);
    }
}

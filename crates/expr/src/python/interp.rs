//! Tree-walking evaluator for the Python expression subset.
//!
//! Values are plain `serde_json::Value`s. Integers and floats keep their JSON
//! representation; tuples and `dict.items()` pairs become arrays.

use std::cmp::Ordering;
use std::collections::HashMap;

use rand::Rng;
use serde_json::{Map, Number, Value};

use super::parser::{BinOp, Clause, CmpOp, Expr, Target, UnaryOp};
use crate::{Bindings, ExprError};

/// Upper bound on the length of any list or string built by an expression.
const MAX_COLLECTION_LEN: usize = 100_000;

/// Upper bound on the number of nodes one evaluation may visit.
const MAX_STEPS: usize = 1_000_000;

const BUILTINS: &[&str] = &[
    "len", "min", "max", "sum", "str", "int", "float", "bool", "random", "randint",
];

pub(crate) struct Interpreter<'a> {
    globals: &'a Bindings,
    locals: Vec<HashMap<String, Value>>,
    steps: usize,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(globals: &'a Bindings) -> Self {
        Self {
            globals,
            locals: Vec::new(),
            steps: 0,
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ExprError::eval("evaluation budget exceeded"));
        }
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) | Expr::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Expr::Dict(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    let key = dict_key(self.eval(k)?)?;
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                subscript(&target, &index)
            }
            Expr::Slice {
                target,
                lower,
                upper,
            } => {
                let target = self.eval(target)?;
                let lower = self.optional_int(lower.as_deref())?;
                let upper = self.optional_int(upper.as_deref())?;
                slice(&target, lower, upper)
            }
            Expr::Attr { name, .. } => Err(ExprError::type_err(format!(
                "attribute '{name}' can only be called"
            ))),
            Expr::Call { func, args } => self.call(func, args),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => match as_num(&value) {
                        Some(Num::Int(i)) => i
                            .checked_neg()
                            .map(Value::from)
                            .ok_or_else(|| ExprError::eval("integer overflow")),
                        Some(Num::Float(f)) => float(-f),
                        None => Err(unsupported_unary("-", &value)),
                    },
                    UnaryOp::Pos => match as_num(&value) {
                        Some(Num::Int(i)) => Ok(Value::from(i)),
                        Some(Num::Float(f)) => float(f),
                        None => Err(unsupported_unary("+", &value)),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)
            }
            Expr::And(operands) => {
                let mut last = Value::Bool(true);
                for operand in operands {
                    last = self.eval(operand)?;
                    if !truthy(&last) {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Or(operands) => {
                let mut last = Value::Bool(false);
                for operand in operands {
                    last = self.eval(operand)?;
                    if truthy(&last) {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, right_expr) in rest {
                    let right = self.eval(right_expr)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse {
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
            Expr::ListComp { elt, clauses } => {
                let mut out = Vec::new();
                self.comprehend(clauses, &mut |interp: &mut Self| {
                    out.push(interp.eval(elt)?);
                    check_len(out.len())
                })?;
                Ok(Value::Array(out))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let mut out = Map::new();
                self.comprehend(clauses, &mut |interp: &mut Self| {
                    let k = dict_key(interp.eval(key)?)?;
                    let v = interp.eval(value)?;
                    out.insert(k, v);
                    check_len(out.len())
                })?;
                Ok(Value::Object(out))
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ExprError> {
        for scope in self.locals.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if BUILTINS.contains(&name) {
            return Err(ExprError::type_err(format!(
                "built-in '{name}' can only be called"
            )));
        }
        Err(ExprError::UndefinedName(name.to_owned()))
    }

    fn optional_int(&mut self, expr: Option<&Expr>) -> Result<Option<i64>, ExprError> {
        match expr {
            None => Ok(None),
            Some(e) => match self.eval(e)? {
                Value::Null => Ok(None),
                v => match as_num(&v) {
                    Some(Num::Int(i)) => Ok(Some(i)),
                    _ => Err(ExprError::type_err("slice indices must be integers")),
                },
            },
        }
    }

    /// Run `body` once per binding produced by the nested `for` clauses.
    fn comprehend(
        &mut self,
        clauses: &[Clause],
        body: &mut dyn FnMut(&mut Self) -> Result<(), ExprError>,
    ) -> Result<(), ExprError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return body(self);
        };
        let iterable = self.eval(&clause.iter)?;
        let items = iterate(&iterable)?;

        self.locals.push(HashMap::new());
        let result = self.comprehend_items(clause, rest, items, body);
        self.locals.pop();
        result
    }

    fn comprehend_items(
        &mut self,
        clause: &Clause,
        rest: &[Clause],
        items: Vec<Value>,
        body: &mut dyn FnMut(&mut Self) -> Result<(), ExprError>,
    ) -> Result<(), ExprError> {
        'items: for item in items {
            if let Some(scope) = self.locals.last_mut() {
                bind_target(scope, &clause.target, item)?;
            }
            for cond in &clause.conds {
                if !truthy(&self.eval(cond)?) {
                    continue 'items;
                }
            }
            self.comprehend(rest, body)?;
        }
        Ok(())
    }

    fn call(&mut self, func: &Expr, args: &[Expr]) -> Result<Value, ExprError> {
        match func {
            Expr::Attr { target, name } => {
                let receiver = self.eval(target)?;
                let args = self.eval_args(args)?;
                call_method(&receiver, name, &args)
            }
            Expr::Name(name) if self.is_builtin(name) => {
                let args = self.eval_args(args)?;
                call_builtin(name, &args)
            }
            Expr::Name(name) => {
                // Bound values are data, never callables.
                self.lookup(name)?;
                Err(ExprError::type_err(format!("'{name}' is not callable")))
            }
            _ => Err(ExprError::type_err("expression is not callable")),
        }
    }

    fn is_builtin(&self, name: &str) -> bool {
        BUILTINS.contains(&name)
            && !self.globals.contains_key(name)
            && self.locals.iter().all(|s| !s.contains_key(name))
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ExprError> {
        args.iter().map(|a| self.eval(a)).collect()
    }
}

fn bind_target(
    scope: &mut HashMap<String, Value>,
    target: &Target,
    value: Value,
) -> Result<(), ExprError> {
    match target {
        Target::Name(name) => {
            scope.insert(name.clone(), value);
            Ok(())
        }
        Target::Tuple(targets) => {
            let items = match value {
                Value::Array(items) => items,
                other => {
                    return Err(ExprError::type_err(format!(
                        "cannot unpack non-sequence {}",
                        type_name(&other)
                    )))
                }
            };
            if items.len() != targets.len() {
                return Err(ExprError::eval(format!(
                    "expected {} values to unpack, got {}",
                    targets.len(),
                    items.len()
                )));
            }
            for (t, v) in targets.iter().zip(items) {
                bind_target(scope, t, v)?;
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Built-ins and methods
// ---------------------------------------------------------------------------

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match name {
        "len" => {
            let [v] = expect_args::<1>(name, args)?;
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                other => {
                    return Err(ExprError::type_err(format!(
                        "object of type '{}' has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(n as i64))
        }
        "min" | "max" => {
            let items = if args.len() == 1 {
                iterate(&args[0])?
            } else {
                args.to_vec()
            };
            let want = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut iter = items.into_iter();
            let mut best = iter
                .next()
                .ok_or_else(|| ExprError::eval(format!("{name}() arg is an empty sequence")))?;
            for item in iter {
                if order(&item, &best)? == want {
                    best = item;
                }
            }
            Ok(best)
        }
        "sum" => {
            let (iterable, start) = match args {
                [it] => (it, Value::from(0)),
                [it, start] => (it, start.clone()),
                _ => return Err(arity(name, "1 or 2", args.len())),
            };
            iterate(iterable)?
                .iter()
                .try_fold(start, |acc, v| binary(BinOp::Add, &acc, v))
        }
        "str" => {
            if args.is_empty() {
                return Ok(Value::String(String::new()));
            }
            let [v] = expect_args::<1>(name, args)?;
            Ok(Value::String(py_str(v)))
        }
        "int" => {
            if args.is_empty() {
                return Ok(Value::from(0));
            }
            let [v] = expect_args::<1>(name, args)?;
            to_int(v)
        }
        "float" => {
            if args.is_empty() {
                return float(0.0);
            }
            let [v] = expect_args::<1>(name, args)?;
            to_float(v)
        }
        "bool" => {
            if args.is_empty() {
                return Ok(Value::Bool(false));
            }
            let [v] = expect_args::<1>(name, args)?;
            Ok(Value::Bool(truthy(v)))
        }
        "random" => {
            expect_args::<0>(name, args)?;
            float(rand::thread_rng().gen::<f64>())
        }
        "randint" => {
            let [lo, hi] = expect_args::<2>(name, args)?;
            match (as_num(lo), as_num(hi)) {
                (Some(Num::Int(lo)), Some(Num::Int(hi))) if lo <= hi => {
                    Ok(Value::from(rand::thread_rng().gen_range(lo..=hi)))
                }
                (Some(Num::Int(_)), Some(Num::Int(_))) => {
                    Err(ExprError::eval("empty range for randint()"))
                }
                _ => Err(ExprError::type_err("randint() arguments must be integers")),
            }
        }
        other => Err(ExprError::UndefinedName(other.to_owned())),
    }
}

fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value, ExprError> {
    if name.starts_with('_') {
        return Err(ExprError::type_err(format!(
            "access to attribute '{name}' is not allowed"
        )));
    }

    match receiver {
        Value::String(s) => string_method(s, name, args),
        Value::Object(map) => match name {
            "items" => {
                expect_args::<0>(name, args)?;
                Ok(Value::Array(
                    map.iter()
                        .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                        .collect(),
                ))
            }
            "keys" => {
                expect_args::<0>(name, args)?;
                Ok(Value::Array(map.keys().cloned().map(Value::String).collect()))
            }
            "values" => {
                expect_args::<0>(name, args)?;
                Ok(Value::Array(map.values().cloned().collect()))
            }
            "get" => match args {
                [Value::String(k)] => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
                [Value::String(k), default] => Ok(map.get(k).cloned().unwrap_or(default.clone())),
                _ => Err(ExprError::type_err("dict.get() expects a string key")),
            },
            _ => Err(no_attribute(receiver, name)),
        },
        Value::Array(items) => match name {
            "count" => {
                let [needle] = expect_args::<1>(name, args)?;
                Ok(Value::from(
                    items.iter().filter(|v| py_eq(v, needle)).count() as i64,
                ))
            }
            "index" => {
                let [needle] = expect_args::<1>(name, args)?;
                items
                    .iter()
                    .position(|v| py_eq(v, needle))
                    .map(|i| Value::from(i as i64))
                    .ok_or_else(|| ExprError::eval("value is not in list"))
            }
            _ => Err(no_attribute(receiver, name)),
        },
        _ => Err(no_attribute(receiver, name)),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let str_arg = |args: &[Value]| -> Result<String, ExprError> {
        match args {
            [Value::String(a)] => Ok(a.clone()),
            _ => Err(ExprError::type_err(format!(
                "str.{name}() expects one string argument"
            ))),
        }
    };

    if !args.is_empty()
        && matches!(name, "lower" | "upper" | "strip" | "lstrip" | "rstrip" | "isdigit")
    {
        return Err(arity(name, "0", args.len()));
    }

    let out = match name {
        "lower" => Value::String(s.to_lowercase()),
        "upper" => Value::String(s.to_uppercase()),
        "strip" => Value::String(s.trim().to_owned()),
        "lstrip" => Value::String(s.trim_start().to_owned()),
        "rstrip" => Value::String(s.trim_end().to_owned()),
        "startswith" => Value::Bool(s.starts_with(str_arg(args)?.as_str())),
        "endswith" => Value::Bool(s.ends_with(str_arg(args)?.as_str())),
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "split" => {
            let parts: Vec<Value> = match args {
                [] => s.split_whitespace().map(|p| Value::String(p.into())).collect(),
                _ => {
                    let sep = str_arg(args)?;
                    if sep.is_empty() {
                        return Err(ExprError::eval("empty separator"));
                    }
                    s.split(sep.as_str()).map(|p| Value::String(p.into())).collect()
                }
            };
            Value::Array(parts)
        }
        "replace" => match args {
            [Value::String(from), Value::String(to)] => Value::String(s.replace(from.as_str(), to)),
            _ => return Err(ExprError::type_err("str.replace() expects two strings")),
        },
        _ => return Err(no_attribute(&Value::String(s.into()), name)),
    };
    Ok(out)
}

fn expect_args<'v, const N: usize>(
    name: &str,
    args: &'v [Value],
) -> Result<[&'v Value; N], ExprError> {
    if args.len() != N {
        return Err(arity(name, &N.to_string(), args.len()));
    }
    let mut out = [&Value::Null; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg;
    }
    Ok(out)
}

fn arity(name: &str, expected: &str, got: usize) -> ExprError {
    ExprError::type_err(format!(
        "{name}() takes {expected} argument(s) but {got} were given"
    ))
}

fn no_attribute(receiver: &Value, name: &str) -> ExprError {
    ExprError::type_err(format!(
        "'{}' object has no attribute '{name}'",
        type_name(receiver)
    ))
}

fn to_int(v: &Value) -> Result<Value, ExprError> {
    match v {
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        Value::Number(_) => match as_num(v) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            Some(Num::Float(f)) if f.is_finite() && f.abs() < i64::MAX as f64 => {
                Ok(Value::from(f.trunc() as i64))
            }
            _ => Err(ExprError::eval("cannot convert float to integer")),
        },
        Value::String(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ExprError::eval(format!("invalid literal for int(): '{s}'"))),
        other => Err(ExprError::type_err(format!(
            "int() argument must be a string or a number, not '{}'",
            type_name(other)
        ))),
    }
}

fn to_float(v: &Value) -> Result<Value, ExprError> {
    match v {
        Value::Bool(b) => float(if *b { 1.0 } else { 0.0 }),
        Value::Number(_) => float(as_num(v).map(Num::as_f64).unwrap_or(0.0)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExprError::eval(format!("could not convert string to float: '{s}'")))
            .and_then(float),
        other => Err(ExprError::type_err(format!(
            "float() argument must be a string or a number, not '{}'",
            type_name(other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    if let (Some(a), Some(b)) = (as_num(l), as_num(r)) {
        return arith(op, a, b);
    }

    match (op, l, r) {
        (BinOp::Add, Value::String(a), Value::String(b)) => {
            check_len(a.len() + b.len())?;
            Ok(Value::String(format!("{a}{b}")))
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            check_len(a.len() + b.len())?;
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s))
            if matches!(as_num(n), Some(Num::Int(_))) =>
        {
            let times = repeat_count(n)?;
            check_len(s.len().saturating_mul(times))?;
            Ok(Value::String(s.repeat(times)))
        }
        (BinOp::Mul, Value::Array(a), n) | (BinOp::Mul, n, Value::Array(a))
            if matches!(as_num(n), Some(Num::Int(_))) =>
        {
            let times = repeat_count(n)?;
            check_len(a.len().saturating_mul(times))?;
            Ok(Value::Array(
                std::iter::repeat(a.iter().cloned()).take(times).flatten().collect(),
            ))
        }
        _ => Err(ExprError::type_err(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op_symbol(op),
            type_name(l),
            type_name(r)
        ))),
    }
}

fn repeat_count(n: &Value) -> Result<usize, ExprError> {
    match as_num(n) {
        Some(Num::Int(i)) => Ok(i.max(0) as usize),
        _ => Err(ExprError::type_err("can't multiply sequence by non-int")),
    }
}

fn arith(op: BinOp, a: Num, b: Num) -> Result<Value, ExprError> {
    let overflow = || ExprError::eval("integer overflow");
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return match op {
            BinOp::Add => x.checked_add(y).map(Value::from).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(y).map(Value::from).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(y).map(Value::from).ok_or_else(overflow),
            BinOp::Div => {
                if y == 0 {
                    return Err(zero_division());
                }
                float(x as f64 / y as f64)
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err(zero_division());
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                let adjust = x % y != 0 && ((x < 0) != (y < 0));
                Ok(Value::from(if adjust { q - 1 } else { q }))
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(zero_division());
                }
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                Ok(Value::from(if r != 0 && (r < 0) != (y < 0) { r + y } else { r }))
            }
            BinOp::Pow if y >= 0 => u32::try_from(y)
                .ok()
                .and_then(|e| x.checked_pow(e))
                .map(Value::from)
                .ok_or_else(overflow),
            BinOp::Pow => float((x as f64).powf(y as f64)),
        };
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    match op {
        BinOp::Add => float(x + y),
        BinOp::Sub => float(x - y),
        BinOp::Mul => float(x * y),
        BinOp::Div if y == 0.0 => Err(zero_division()),
        BinOp::Div => float(x / y),
        BinOp::FloorDiv if y == 0.0 => Err(zero_division()),
        BinOp::FloorDiv => float((x / y).floor()),
        BinOp::Mod if y == 0.0 => Err(zero_division()),
        BinOp::Mod => float(x - y * (x / y).floor()),
        BinOp::Pow => float(x.powf(y)),
    }
}

fn zero_division() -> ExprError {
    ExprError::eval("division by zero")
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    Ok(match op {
        CmpOp::Eq => py_eq(l, r),
        CmpOp::Ne => !py_eq(l, r),
        CmpOp::Lt => order(l, r)? == Ordering::Less,
        CmpOp::Le => order(l, r)? != Ordering::Greater,
        CmpOp::Gt => order(l, r)? == Ordering::Greater,
        CmpOp::Ge => order(l, r)? != Ordering::Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => is_same(l, r),
        CmpOp::IsNot => !is_same(l, r),
    })
}

/// `is` is only meaningful for the singletons `None`, `True` and `False`.
fn is_same(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, ExprError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|v| py_eq(v, needle))),
        Value::Object(map) => match needle {
            Value::String(k) => Ok(map.contains_key(k)),
            _ => Ok(false),
        },
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(ExprError::type_err(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        other => Err(ExprError::type_err(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

fn py_eq(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_num(l), as_num(r)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        };
    }
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| py_eq(v, other)))
        }
        _ => false,
    }
}

fn order(l: &Value, r: &Value) -> Result<Ordering, ExprError> {
    if let (Some(a), Some(b)) = (as_num(l), as_num(r)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| ExprError::eval("cannot order NaN")),
        };
    }
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let o = order(x, y)?;
                if o != Ordering::Equal {
                    return Ok(o);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(ExprError::type_err(format!(
            "comparison not supported between instances of '{}' and '{}'",
            type_name(l),
            type_name(r)
        ))),
    }
}

fn subscript(target: &Value, index: &Value) -> Result<Value, ExprError> {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ExprError::MissingKey(key.clone())),
        (Value::Object(_), other) => Err(ExprError::MissingKey(py_str(other))),
        (Value::Array(items), idx) => {
            let i = seq_index(idx, items.len())?;
            Ok(items[i].clone())
        }
        (Value::String(s), idx) => {
            let chars: Vec<char> = s.chars().collect();
            let i = seq_index(idx, chars.len())?;
            Ok(Value::String(chars[i].to_string()))
        }
        (other, _) => Err(ExprError::type_err(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn seq_index(idx: &Value, len: usize) -> Result<usize, ExprError> {
    let i = match as_num(idx) {
        Some(Num::Int(i)) if !idx.is_boolean() => i,
        _ => return Err(ExprError::type_err("indices must be integers")),
    };
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ExprError::eval("index out of range"));
    }
    Ok(resolved as usize)
}

fn slice(target: &Value, lower: Option<i64>, upper: Option<i64>) -> Result<Value, ExprError> {
    let clamp = |bound: Option<i64>, len: usize, default: usize| -> usize {
        match bound {
            None => default,
            Some(b) if b < 0 => (len as i64 + b).max(0) as usize,
            Some(b) => (b as usize).min(len),
        }
    };
    match target {
        Value::Array(items) => {
            let (lo, hi) = (clamp(lower, items.len(), 0), clamp(upper, items.len(), items.len()));
            Ok(Value::Array(if lo < hi { items[lo..hi].to_vec() } else { Vec::new() }))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = (clamp(lower, chars.len(), 0), clamp(upper, chars.len(), chars.len()));
            Ok(Value::String(if lo < hi { chars[lo..hi].iter().collect() } else { String::new() }))
        }
        other => Err(ExprError::type_err(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn iterate(v: &Value) -> Result<Vec<Value>, ExprError> {
    match v {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(ExprError::type_err(format!(
            "'{}' object is not iterable",
            type_name(other)
        ))),
    }
}

fn dict_key(v: Value) -> Result<String, ExprError> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(ExprError::type_err(format!(
            "dict keys must be strings, not '{}'",
            type_name(&other)
        ))),
    }
}

fn check_len(len: usize) -> Result<(), ExprError> {
    if len > MAX_COLLECTION_LEN {
        return Err(ExprError::eval("result too large"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        _ => None,
    }
}

fn float(f: f64) -> Result<Value, ExprError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExprError::eval("result is not a finite number"))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn unsupported_unary(op: &str, v: &Value) -> ExprError {
    ExprError::type_err(format!("bad operand type for unary {op}: '{}'", type_name(v)))
}

/// Python's `str()` rendering.
fn py_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => py_repr(other),
    }
}

fn py_repr(v: &Value) -> String {
    match v {
        Value::Null => "None".into(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => {
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 && f.abs() < 1e16 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
        },
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(py_repr).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("'{k}': {}", py_repr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

//! Tree-walking evaluation and the built-in function table.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::ExpressionError;

/// Which placeholders a predicate argument may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LambdaKind {
    Element,
    Reduce,
}

/// Arity and predicate shape of a built-in
#[derive(Debug, Clone, Copy)]
pub(super) struct Signature {
    pub min_args: usize,
    pub max_args: Option<usize>,
    /// The second argument is evaluated per element rather than once
    pub lambda: Option<LambdaKind>,
}

impl Signature {
    const fn fixed(n: usize) -> Self {
        Self {
            min_args: n,
            max_args: Some(n),
            lambda: None,
        }
    }

    const fn predicate() -> Self {
        Self {
            min_args: 2,
            max_args: Some(2),
            lambda: Some(LambdaKind::Element),
        }
    }

    pub fn describe_arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

pub(super) fn signature(name: &str) -> Option<Signature> {
    let sig = match name {
        "len" | "abs" | "floor" | "ceil" | "upper" | "lower" | "trim" | "keys" | "values"
        | "string" | "number" | "avg" => Signature::fixed(1),
        "round" => Signature {
            min_args: 1,
            max_args: Some(2),
            lambda: None,
        },
        "sum" | "min" | "max" => Signature {
            min_args: 1,
            max_args: None,
            lambda: None,
        },
        "contains" | "startsWith" | "endsWith" => Signature::fixed(2),
        "map" | "filter" | "any" | "all" | "count" => Signature::predicate(),
        "reduce" => Signature {
            min_args: 2,
            max_args: Some(3),
            lambda: Some(LambdaKind::Reduce),
        },
        _ => return None,
    };
    Some(sig)
}

/// Bindings visible while evaluating
struct Scope<'a> {
    env: &'a HashMap<String, Value>,
    element: Option<&'a Value>,
    acc: Option<&'a Value>,
}

pub(super) fn evaluate(expr: &Expr, env: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
    eval(
        expr,
        &Scope {
            env,
            element: None,
            acc: None,
        },
    )
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(name) => Ok(scope.env.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Element => Ok(scope.element.cloned().unwrap_or(Value::Null)),
        Expr::Accumulator => Ok(scope.acc.cloned().unwrap_or(Value::Null)),
        Expr::Member(base, field) => match eval(base, scope)? {
            Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_mismatch(&format!(".{}", field), "object", &other)),
        },
        Expr::Index(base, index) => {
            let base = eval(base, scope)?;
            let index = eval(index, scope)?;
            index_value(base, &index)
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!as_bool("!", &value)?)),
                UnaryOp::Neg => number(-as_number("-", &value)?),
            }
        }
        Expr::Binary(BinaryOp::And, l, r) => {
            if !as_bool("&&", &eval(l, scope)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool("&&", &eval(r, scope)?)?))
        }
        Expr::Binary(BinaryOp::Or, l, r) => {
            if as_bool("||", &eval(l, scope)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool("||", &eval(r, scope)?)?))
        }
        Expr::Binary(op, l, r) => {
            let left = eval(l, scope)?;
            let right = eval(r, scope)?;
            binary(*op, left, right)
        }
        Expr::Conditional(cond, then, otherwise) => {
            if as_bool("?:", &eval(cond, scope)?)? {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (key, e) in entries {
                map.insert(key.clone(), eval(e, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Call(name, args) => call(name, args, scope),
    }
}

fn index_value(base: Value, index: &Value) -> Result<Value, ExpressionError> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| type_mismatch("[]", "integer index", index))?;
            // negative indices count from the end
            let i = if i < 0 { items.len() as i64 + i } else { i };
            Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        (other, _) => Err(type_mismatch("[]", "array or object", &other)),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    let symbol = op.symbol();
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => number(to_f64(&a) + to_f64(&b)),
            (Value::String(a), b) => Ok(Value::String(a + &display(&b))),
            (a, Value::String(b)) => Ok(Value::String(display(&a) + &b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (a, _) => Err(type_mismatch(symbol, "numbers, strings or arrays", &a)),
        },
        BinaryOp::Sub => number(as_number(symbol, &left)? - as_number(symbol, &right)?),
        BinaryOp::Mul => number(as_number(symbol, &left)? * as_number(symbol, &right)?),
        BinaryOp::Div | BinaryOp::Rem => {
            let a = as_number(symbol, &left)?;
            let b = as_number(symbol, &right)?;
            if b == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            number(if op == BinaryOp::Div { a / b } else { a % b })
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare(symbol, &left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| values_equal(v, &left)))),
            Value::Object(map) => match left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(&key))),
                other => Err(type_mismatch("in", "string key", &other)),
            },
            Value::String(haystack) => Ok(Value::Bool(haystack.contains(&display(&left)))),
            other => Err(type_mismatch("in", "array, object or string", &other)),
        },
        // eval short-circuits these; this path only sees fully evaluated operands
        BinaryOp::And => Ok(Value::Bool(as_bool(symbol, &left)? && as_bool(symbol, &right)?)),
        BinaryOp::Or => Ok(Value::Bool(as_bool(symbol, &left)? || as_bool(symbol, &right)?)),
    }
}

fn call(name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match name {
        "map" | "filter" | "any" | "all" | "count" => {
            let items = as_array(name, eval(&args[0], scope)?)?;
            let mut mapped = Vec::with_capacity(items.len());
            let mut matched = 0usize;
            for item in &items {
                let inner = Scope {
                    env: scope.env,
                    element: Some(item),
                    acc: None,
                };
                let result = eval(&args[1], &inner)?;
                if name == "map" {
                    mapped.push(result);
                } else if as_bool(name, &result)? {
                    matched += 1;
                    if name == "filter" {
                        mapped.push(item.clone());
                    }
                }
            }
            Ok(match name {
                "map" | "filter" => Value::Array(mapped),
                "any" => Value::Bool(matched > 0),
                "all" => Value::Bool(matched == items.len()),
                _ => Value::from(matched),
            })
        }
        "reduce" => {
            let items = as_array(name, eval(&args[0], scope)?)?;
            let (mut acc, rest) = match args.get(2) {
                Some(init) => (eval(init, scope)?, &items[..]),
                None => match items.split_first() {
                    Some((first, rest)) => (first.clone(), rest),
                    None => return Ok(Value::Null),
                },
            };
            for item in rest {
                let inner = Scope {
                    env: scope.env,
                    element: Some(item),
                    acc: Some(&acc),
                };
                acc = eval(&args[1], &inner)?;
            }
            Ok(acc)
        }
        _ => {
            let values = args
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            builtin(name, values)
        }
    }
}

fn builtin(name: &str, mut args: Vec<Value>) -> Result<Value, ExpressionError> {
    // sum/min/max accept either one array or several numbers
    let numbers = |args: Vec<Value>| -> Result<Vec<f64>, ExpressionError> {
        let flat = match <[Value; 1]>::try_from(args) {
            Ok([Value::Array(items)]) => items,
            Ok([single]) => vec![single],
            Err(many) => many,
        };
        flat.iter().map(|v| as_number(name, v)).collect()
    };

    match name {
        "sum" => number(numbers(args)?.iter().sum()),
        "min" | "max" => {
            let values = numbers(args)?;
            let picked = values.iter().copied().reduce(|a, b| {
                if (name == "min") == (b < a) {
                    b
                } else {
                    a
                }
            });
            picked.map(number).unwrap_or(Ok(Value::Null))
        }
        "avg" => {
            let values = numbers(args)?;
            if values.is_empty() {
                return Ok(Value::Null);
            }
            number(values.iter().sum::<f64>() / values.len() as f64)
        }
        "len" => match &args[0] {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(m) => Ok(Value::from(m.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(type_mismatch(name, "string, array or object", other)),
        },
        "abs" => number(as_number(name, &args[0])?.abs()),
        "floor" => number(as_number(name, &args[0])?.floor()),
        "ceil" => number(as_number(name, &args[0])?.ceil()),
        "round" => {
            let value = as_number(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => as_number(name, d)? as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            number((value * factor).round() / factor)
        }
        "upper" => Ok(Value::String(as_str(name, &args[0])?.to_uppercase())),
        "lower" => Ok(Value::String(as_str(name, &args[0])?.to_lowercase())),
        "trim" => Ok(Value::String(as_str(name, &args[0])?.trim().to_string())),
        "startsWith" => Ok(Value::Bool(
            as_str(name, &args[0])?.starts_with(as_str(name, &args[1])?),
        )),
        "endsWith" => Ok(Value::Bool(
            as_str(name, &args[0])?.ends_with(as_str(name, &args[1])?),
        )),
        "contains" => {
            let needle = args.pop().unwrap_or(Value::Null);
            binary(BinaryOp::In, needle, args.pop().unwrap_or(Value::Null))
        }
        "keys" | "values" => match args.pop() {
            Some(Value::Object(map)) => Ok(Value::Array(if name == "keys" {
                map.keys().cloned().map(Value::String).collect()
            } else {
                map.values().cloned().collect()
            })),
            Some(other) => Err(type_mismatch(name, "object", &other)),
            None => Ok(Value::Null),
        },
        "string" => Ok(Value::String(display(&args[0]))),
        "number" => match &args[0] {
            Value::Number(_) => Ok(args[0].clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| type_mismatch(name, "numeric string", &args[0]))
                .and_then(number),
            Value::Bool(b) => Ok(Value::from(u8::from(*b))),
            other => Err(type_mismatch(name, "number or numeric string", other)),
        },
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

/// Convert an f64 result back to JSON, keeping integral values integral
pub(super) fn number(n: f64) -> Result<Value, ExpressionError> {
    if !n.is_finite() {
        return Err(ExpressionError::TypeMismatch {
            operation: "arithmetic".to_string(),
            expected: "finite number".to_string(),
            found: n.to_string(),
        });
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Ok(Value::from(n as i64))
    } else {
        Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null))
    }
}

fn to_f64(n: &serde_json::Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

fn as_number(operation: &str, value: &Value) -> Result<f64, ExpressionError> {
    match value {
        Value::Number(n) => Ok(to_f64(n)),
        other => Err(type_mismatch(operation, "number", other)),
    }
}

pub(super) fn as_bool(operation: &str, value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(type_mismatch(operation, "boolean", other)),
    }
}

fn as_str<'v>(operation: &str, value: &'v Value) -> Result<&'v str, ExpressionError> {
    value
        .as_str()
        .ok_or_else(|| type_mismatch(operation, "string", value))
}

fn as_array(operation: &str, value: Value) -> Result<Vec<Value>, ExpressionError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(type_mismatch(operation, "array", &other)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => to_f64(x) == to_f64(y),
        _ => a == b,
    }
}

fn compare(operation: &str, a: &Value, b: &Value) -> Result<Ordering, ExpressionError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => to_f64(x)
            .partial_cmp(&to_f64(y))
            .ok_or_else(|| type_mismatch(operation, "comparable numbers", a)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Number(_), other) | (Value::String(_), other) => {
            Err(type_mismatch(operation, "value of the same type", other))
        }
        (other, _) => Err(type_mismatch(operation, "number or string", other)),
    }
}

/// String form used for concatenation: strings unquoted, everything else as JSON
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_mismatch(operation: &str, expected: &str, found: &Value) -> ExpressionError {
    ExpressionError::TypeMismatch {
        operation: operation.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

//! Expression evaluator
//!
//! A small compile-then-run language used by loop conditions, break
//! conditions and the data-mapping nodes. Expressions are parsed once into a
//! [`Program`] and evaluated against a variable environment of JSON values.
//!
//! ```text
//! price > 100 ? price * 0.9 : price
//! sum(items)
//! filter(orders, .total > 10 and .status == "paid")
//! reduce(items, #acc + #.qty, 0)
//! ```
//!
//! Inside the predicate argument of `map`, `filter`, `any`, `all`, `count`
//! and `reduce`, `#` is the current element and `.field` is shorthand for
//! `#.field`. `#acc` is the running accumulator of `reduce`.

mod ast;
mod interpreter;
mod lexer;
mod parser;

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use ast::Expr;

/// Errors raised while compiling or running an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("'{0}' is only valid inside a collection predicate")]
    MisplacedPlaceholder(String),

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Type mismatch in '{operation}': expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Expression '{expression}' must evaluate to a boolean, got {found}")]
    NotBoolean { expression: String, found: String },
}

/// Variable names an expression may reference
///
/// `EnvShape::any()` accepts every name; unknown variables then evaluate to
/// `null` at run time.
#[derive(Debug, Clone, Default)]
pub struct EnvShape {
    names: Option<HashSet<String>>,
}

impl EnvShape {
    /// Accept any variable name
    pub fn any() -> Self {
        Self { names: None }
    }

    /// Only accept the given names
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Shape of an existing environment
    pub fn from_env(env: &HashMap<String, Value>) -> Self {
        Self::new(env.keys().cloned())
    }

    fn allows(&self, name: &str) -> bool {
        self.names.as_ref().map_or(true, |names| names.contains(name))
    }
}

/// A compiled expression
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    expr: Expr,
}

/// Parse an expression and check its root variables against `shape`
pub fn compile(source: &str, shape: &EnvShape) -> Result<Program, ExpressionError> {
    let tokens = lexer::tokenize(source)?;
    let expr = parser::Parser::new(tokens, source.len()).parse()?;

    let mut names = Vec::new();
    expr.variables(&mut names);
    if let Some(unknown) = names.into_iter().find(|name| !shape.allows(name)) {
        return Err(ExpressionError::UnknownVariable(unknown.to_string()));
    }

    Ok(Program {
        source: source.to_string(),
        expr,
    })
}

/// Compile with an open shape and run once
pub fn eval(source: &str, env: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
    compile(source, &EnvShape::any())?.run(env)
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to an arbitrary value
    pub fn run(&self, env: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
        interpreter::evaluate(&self.expr, env)
    }

    /// Evaluate as a condition; a non-boolean result is an error
    pub fn run_bool(&self, env: &HashMap<String, Value>) -> Result<bool, ExpressionError> {
        match self.run(env)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean {
                expression: self.source.clone(),
                found: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ternary_discount() {
        let program = compile("price > 100 ? price * 0.9 : price", &EnvShape::any()).unwrap();
        assert_eq!(program.run(&env(&[("price", json!(150))])).unwrap(), json!(135));
        assert_eq!(program.run(&env(&[("price", json!(80))])).unwrap(), json!(80));
    }

    #[test]
    fn test_sum_of_items() {
        let result = eval("sum(items)", &env(&[("items", json!([1, 2, 3, 4, 5]))])).unwrap();
        assert_eq!(result, json!(15));
    }

    #[test]
    fn test_collection_functions() {
        let e = env(&[(
            "orders",
            json!([
                {"total": 5, "status": "paid"},
                {"total": 20, "status": "paid"},
                {"total": 30, "status": "open"}
            ]),
        )]);

        assert_eq!(
            eval("map(orders, .total * 2)", &e).unwrap(),
            json!([10, 40, 60])
        );
        assert_eq!(
            eval("len(filter(orders, .total > 10 and .status == 'paid'))", &e).unwrap(),
            json!(1)
        );
        assert_eq!(eval("reduce(orders, #acc + #.total, 0)", &e).unwrap(), json!(55));
        assert_eq!(eval("count(orders, .status == 'open')", &e).unwrap(), json!(1));
        assert_eq!(eval("any(orders, .total > 25)", &e).unwrap(), json!(true));
        assert_eq!(eval("all(orders, .total > 25)", &e).unwrap(), json!(false));
        assert_eq!(eval("max(map(orders, .total))", &e).unwrap(), json!(30));
    }

    #[test]
    fn test_reduce_without_initial_value() {
        let e = env(&[("xs", json!([2, 3, 4]))]);
        assert_eq!(eval("reduce(xs, #acc * #)", &e).unwrap(), json!(24));
        assert_eq!(eval("reduce([], #acc + #)", &e).unwrap(), Value::Null);
    }

    #[test]
    fn test_strings_and_members() {
        let e = env(&[("user", json!({"name": " Ada ", "tags": ["x", "y"]}))]);
        assert_eq!(
            eval("'hi ' + upper(trim(user.name))", &e).unwrap(),
            json!("hi ADA")
        );
        assert_eq!(eval("user.tags[-1]", &e).unwrap(), json!("y"));
        assert_eq!(eval("'x' in user.tags", &e).unwrap(), json!(true));
        assert_eq!(eval("user.missing.deeper", &e).unwrap(), Value::Null);
        assert_eq!(eval("startsWith(user.name, ' A')", &e).unwrap(), json!(true));
    }

    #[test]
    fn test_literals() {
        let e = HashMap::new();
        assert_eq!(
            eval("{a: 1, 'b': [true, null]}", &e).unwrap(),
            json!({"a": 1, "b": [true, null]})
        );
        assert_eq!(eval("round(2.456, 2)", &e).unwrap(), json!(2.46));
        assert_eq!(eval("7 % 4 + -1", &e).unwrap(), json!(2));
        assert_eq!(eval("number('42') + 1", &e).unwrap(), json!(43));
    }

    #[test]
    fn test_run_bool() {
        let program = compile("item.value >= 3", &EnvShape::any()).unwrap();
        assert!(program
            .run_bool(&env(&[("item", json!({"value": 3}))]))
            .unwrap());
        assert!(!program
            .run_bool(&env(&[("item", json!({"value": 1}))]))
            .unwrap());

        let not_bool = compile("1 + 1", &EnvShape::any()).unwrap();
        assert!(matches!(
            not_bool.run_bool(&HashMap::new()),
            Err(ExpressionError::NotBoolean { .. })
        ));
    }

    #[test]
    fn test_env_shape() {
        let shape = EnvShape::new(["price"]);
        assert!(compile("price * 2", &shape).is_ok());
        assert_eq!(
            compile("price * qty", &shape).unwrap_err(),
            ExpressionError::UnknownVariable("qty".to_string())
        );
        // keywords and placeholders are not variables
        assert!(compile("map([1], # * 2) == nil or true", &shape).is_ok());
    }

    #[test]
    fn test_runtime_errors() {
        let e = env(&[("s", json!("text"))]);
        assert_eq!(eval("1 / 0", &e).unwrap_err(), ExpressionError::DivisionByZero);
        assert!(matches!(
            eval("s - 1", &e),
            Err(ExpressionError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval("1 && true", &e),
            Err(ExpressionError::TypeMismatch { .. })
        ));
    }
}

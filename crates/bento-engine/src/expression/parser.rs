//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, equality, comparison and
//! `in`, additive, multiplicative, unary, postfix (member, index, call).

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::interpreter::{signature, LambdaKind};
use super::lexer::{Spanned, Token};
use super::ExpressionError;

pub(super) struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    /// Enclosing collection predicates, innermost last
    lambdas: Vec<LambdaKind>,
}

impl Parser {
    pub(super) fn new(tokens: Vec<Spanned>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end: source_len,
            lambdas: Vec::new(),
        }
    }

    pub(super) fn parse(mut self) -> Result<Expr, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(ExpressionError::Syntax {
                position: 0,
                message: "empty expression".to_string(),
            });
        }
        let expr = self.conditional()?;
        if let Some((token, position)) = self.tokens.get(self.pos) {
            return Err(ExpressionError::Syntax {
                position: *position,
                message: format!("unexpected token {:?}", token),
            });
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn error(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message,
        }
    }

    fn conditional(&mut self) -> Result<Expr, ExpressionError> {
        let cond = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.conditional()?;
            self.expect(Token::Colon, "':' in conditional")?;
            let otherwise = self.conditional()?;
            return Ok(Expr::Conditional(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                Some(Token::Ident(name)) if name == "in" => BinaryOp::In,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = self.field_name()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat(&Token::LBracket) {
                let index = self.conditional()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn field_name(&mut self) -> Result<String, ExpressionError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            _ => {
                self.pos -= 1;
                Err(self.error("expected field name after '.'".to_string()))
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_literal(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.conditional()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.conditional()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => self.object(),
            Some(Token::Element) => {
                self.require_lambda("#")?;
                Ok(Expr::Element)
            }
            Some(Token::Accumulator) => {
                if self.lambdas.last() != Some(&LambdaKind::Reduce) {
                    return Err(ExpressionError::MisplacedPlaceholder("#acc".to_string()));
                }
                Ok(Expr::Accumulator)
            }
            Some(Token::Dot) => {
                self.require_lambda(".field")?;
                let name = self.field_name()?;
                Ok(Expr::Member(Box::new(Expr::Element), name))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.call(name),
                _ => Ok(Expr::Variable(name)),
            },
            Some(token) => Err(ExpressionError::Syntax {
                position,
                message: format!("unexpected token {:?}", token),
            }),
            None => Err(ExpressionError::Syntax {
                position,
                message: "unexpected end of expression".to_string(),
            }),
        }
    }

    fn object(&mut self) -> Result<Expr, ExpressionError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.advance() {
                Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected object key".to_string()));
                }
            };
            self.expect(Token::Colon, "':' after object key")?;
            entries.push((key, self.conditional()?));
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(Token::Comma, "',' or '}'")?;
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExpressionError> {
        let sig = signature(&name).ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                let is_lambda = sig.lambda.is_some() && args.len() == 1;
                if let (true, Some(kind)) = (is_lambda, sig.lambda) {
                    self.lambdas.push(kind);
                    let arg = self.conditional();
                    self.lambdas.pop();
                    args.push(arg?);
                } else {
                    args.push(self.conditional()?);
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }

        if args.len() < sig.min_args || sig.max_args.is_some_and(|max| args.len() > max) {
            return Err(ExpressionError::Arity {
                function: name,
                expected: sig.describe_arity(),
                found: args.len(),
            });
        }
        Ok(Expr::Call(name, args))
    }

    fn require_lambda(&self, placeholder: &str) -> Result<(), ExpressionError> {
        if self.lambdas.is_empty() {
            Err(ExpressionError::MisplacedPlaceholder(placeholder.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Integral literals become JSON integers so results compare cleanly
fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse(src: &str) -> Result<Expr, ExpressionError> {
        Parser::new(tokenize(src)?, src.len()).parse()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(Value::from(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Literal(Value::from(2))),
                    Box::new(Expr::Literal(Value::from(3))),
                )),
            )
        );
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        assert!(matches!(expr, Expr::Conditional(_, _, ref otherwise)
            if matches!(**otherwise, Expr::Conditional(..))));
    }

    #[test]
    fn test_member_shorthand_in_predicate() {
        let expr = parse("filter(items, .value > 2)").unwrap();
        let Expr::Call(name, args) = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "filter");
        assert!(matches!(&args[1], Expr::Binary(BinaryOp::Gt, l, _)
            if **l == Expr::Member(Box::new(Expr::Element), "value".into())));
    }

    #[test]
    fn test_placeholder_outside_predicate_is_rejected() {
        assert!(matches!(parse("# + 1"), Err(ExpressionError::MisplacedPlaceholder(_))));
        assert!(matches!(
            parse("map(xs, #acc)"),
            Err(ExpressionError::MisplacedPlaceholder(_))
        ));
        assert!(parse("reduce(xs, #acc + #, 0)").is_ok());
    }

    #[test]
    fn test_unknown_function_and_arity() {
        assert!(matches!(parse("nope(1)"), Err(ExpressionError::UnknownFunction(_))));
        assert!(matches!(parse("sum()"), Err(ExpressionError::Arity { .. })));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("a ? b").is_err());
    }
}

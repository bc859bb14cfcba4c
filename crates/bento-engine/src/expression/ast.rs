use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    In,
}

impl BinaryOp {
    pub(super) fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::In => "in",
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Literal(Value),
    Variable(String),
    Element,
    Accumulator,
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Root variable names referenced anywhere in the tree
    pub(super) fn variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Variable(name) => out.push(name),
            Expr::Literal(_) | Expr::Element | Expr::Accumulator => {}
            Expr::Member(base, _) => base.variables(out),
            Expr::Unary(_, inner) => inner.variables(out),
            Expr::Index(l, r) | Expr::Binary(_, l, r) => {
                l.variables(out);
                r.variables(out);
            }
            Expr::Conditional(c, a, b) => {
                c.variables(out);
                a.variables(out);
                b.variables(out);
            }
            Expr::Array(items) | Expr::Call(_, items) => {
                items.iter().for_each(|e| e.variables(out));
            }
            Expr::Object(entries) => entries.iter().for_each(|(_, e)| e.variables(out)),
        }
    }
}

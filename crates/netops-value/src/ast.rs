//! Syntax tree produced by the parser.

use std::sync::Arc;

use crate::value::{BasicType, Value};

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub decls: Arc<Vec<Decl>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Local name; defaults to the last path segment.
    pub alias: String,
    pub path: String,
}

/// A declaration inside a struct body (or at file top level).
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Field {
        label: Label,
        optional: bool,
        value: Expr,
    },
    /// An expression whose fields are embedded into the enclosing struct.
    Embed(Expr),
    Comprehension {
        clauses: Vec<Clause>,
        body: Arc<Vec<Decl>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    /// Identifier, definition (`#Name`) or plain quoted string.
    Static(String),
    /// Interpolated string label or `(expr)`.
    Dynamic(Expr),
}

impl Label {
    pub fn as_static(&self) -> Option<&str> {
        match self {
            Label::Static(s) => Some(s),
            Label::Dynamic(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `for key, value in source` (`key` absent for `for value in source`).
    For {
        key: Option<String>,
        value: String,
        source: Expr,
    },
    If(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    Interp(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Top,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Vec<StrPart>),
    Type(BasicType),
    Ref(String),
    Struct(Arc<Vec<Decl>>),
    List {
        elems: Vec<Expr>,
        rest: Option<Box<Expr>>,
    },
    Select(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unify(Box<Expr>, Box<Expr>),
    /// `(expr, is_default)` arms.
    Disjunction(Vec<(Expr, bool)>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    /// An already-evaluated value spliced into an expression.
    Literal(Value),
}

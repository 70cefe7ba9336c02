//! Abstract syntax for iota compilation units.
//!
//! The parser builds this tree; semantic analysis fills in the `ty` and
//! `slot` annotations that the bytecode emitter reads.

use std::fmt;

/// The iota types. `Void` is only legal as a method return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    Boolean,
    Void,
}

impl Type {
    /// The descriptor code for this type (`I`, `Z`, or `V`).
    pub fn descriptor(self) -> char {
        match self {
            Type::Int => 'I',
            Type::Boolean => 'Z',
            Type::Void => 'V',
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Boolean => write!(f, "boolean"),
            Type::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub line: usize,
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Total local slots (parameters plus declarations); set by analysis.
    pub max_locals: usize,
}

impl MethodDecl {
    /// JVM-style method descriptor, e.g. `(IZ)I`.
    pub fn descriptor(&self) -> String {
        let mut s = String::from("(");
        for p in &self.params {
            s.push(p.ty.descriptor());
        }
        s.push(')');
        s.push(self.return_type.descriptor());
        s
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Vec<Stmt>),
    VarDecl {
        line: usize,
        name: String,
        ty: Type,
        init: Option<Expr>,
        /// Local slot; set by analysis.
        slot: Option<u8>,
    },
    If {
        condition: Expr,
        then_part: Box<Stmt>,
        else_part: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Return {
        line: usize,
        value: Option<Expr>,
    },
    /// An expression in statement position (assignment or call).
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit {
        line: usize,
        value: i32,
    },
    BoolLit {
        line: usize,
        value: bool,
    },
    Var {
        line: usize,
        name: String,
        /// Local slot; set by analysis.
        slot: Option<u8>,
        /// Declared type; set by analysis.
        ty: Option<Type>,
    },
    Call {
        line: usize,
        name: String,
        args: Vec<Expr>,
        /// Resolved descriptor; set by analysis.
        descriptor: Option<String>,
        /// Resolved return type; set by analysis.
        return_type: Option<Type>,
        /// True when the call result is discarded (statement position).
        is_statement: bool,
    },
    Assign {
        line: usize,
        name: String,
        value: Box<Expr>,
        slot: Option<u8>,
        /// True when the assigned value is not itself used as a value.
        is_statement: bool,
    },
    Binary {
        line: usize,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        line: usize,
        op: UnOp,
        operand: Box<Expr>,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::IntLit { line, .. }
            | Expr::BoolLit { line, .. }
            | Expr::Var { line, .. }
            | Expr::Call { line, .. }
            | Expr::Assign { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Unary { line, .. } => *line,
        }
    }
}

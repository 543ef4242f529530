//! Syntax tree of the script language.

use waypoint_engine::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `not x`
    Not,
}

/// Binary operators other than `and`/`or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A variable.
    Name(String),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// `callee(args...)`
    Call {
        /// Name of the called routine.
        callee: String,
        /// Arguments, in order.
        args: Vec<Expr>,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Its operand.
        operand: Box<Expr>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `and` / `or`.
    Logical {
        /// The operator.
        op: LogicalOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand, evaluated only when needed.
        rhs: Box<Expr>,
    },
}

/// A `def` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Routine name.
    pub name: String,
    /// Parameter names.
    pub params: Vec<String>,
    /// Decorator expressions as written, without the `@`.
    pub decorators: Vec<String>,
    /// First line of the definition: the first decorator, or the `def` line.
    pub first_line: u32,
    /// Line of the `def` header.
    pub header_line: u32,
    /// Last line of the body, nested definitions included.
    pub last_line: u32,
    /// Body statements.
    pub body: Vec<Stmt>,
}

/// A statement and the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// 1-based source line.
    pub line: u32,
    /// What the statement does.
    pub kind: StmtKind,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `def name(params):` with an indented body.
    Def(Box<FunctionDef>),
    /// `target = lambda params: body`
    Lambda {
        /// Bound name.
        target: String,
        /// Parameter names.
        params: Vec<String>,
        /// The returned expression.
        body: Expr,
    },
    /// `target = value`
    Assign {
        /// Bound name.
        target: String,
        /// Assigned expression.
        value: Expr,
    },
    /// `return [value]`
    Return(Option<Expr>),
    /// `assert test`
    Assert(Expr),
    /// `pass`
    Pass,
    /// An expression evaluated for its effects.
    Expr(Expr),
}

impl Stmt {
    /// Last source line covered by the statement.
    #[must_use]
    pub fn last_line(&self) -> u32 {
        match &self.kind {
            StmtKind::Def(def) => def.last_line,
            _ => self.line,
        }
    }
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements.
    pub body: Vec<Stmt>,
}

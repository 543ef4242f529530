//! The script language's lexer, syntax tree and parser.
//!
//! The language is line oriented: blocks are delimited by indentation, every
//! statement starts on its own line (or after a `;`), and `#` starts a comment.
//!
//! ```text
//! @trace
//! def f(x, y):
//!     g = lambda a: a + 1
//!     z = g(x) * y
//!     assert z != 0
//!     return z
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, FunctionDef, LogicalOp, Program, Stmt, StmtKind, UnaryOp};
pub use parser::{parse_expression, parse_program, parse_snippet};

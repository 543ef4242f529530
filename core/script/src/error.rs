//! Errors raised while parsing or running a script.

use thiserror::Error;
use waypoint_engine::HostError;

/// A source text that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error on line {line}: {message}")]
pub struct SyntaxError {
    /// 1-based line of the offending text.
    pub line: u32,
    /// What went wrong.
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Any error produced by the interpreter.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The source does not parse.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// A name is neither local, global, nor a builtin.
    #[error("line {line}: name `{name}` is not defined")]
    Name {
        /// Line of the lookup.
        line: u32,
        /// The missing name.
        name: String,
    },

    /// An operation was applied to values of the wrong type.
    #[error("line {line}: {message}")]
    Type {
        /// Line of the operation.
        line: u32,
        /// What went wrong.
        message: String,
    },

    /// Division by zero, overflow and similar.
    #[error("line {line}: {message}")]
    Runtime {
        /// Line of the operation.
        line: u32,
        /// What went wrong.
        message: String,
    },

    /// An `assert` statement failed.
    #[error("line {line}: assertion failed")]
    Assertion {
        /// Line of the `assert`.
        line: u32,
    },

    /// A routine was called with the wrong number of arguments.
    #[error("`{routine}` takes {expected} arguments but {found} were given")]
    Arity {
        /// The called routine.
        routine: String,
        /// Declared parameter count.
        expected: usize,
        /// Given argument count.
        found: usize,
    },

    /// No routine with that name is defined in the module.
    #[error("module `{module}` has no routine `{name}`")]
    UnknownRoutine {
        /// Module searched.
        module: String,
        /// Requested name.
        name: String,
    },

    /// Calls nested deeper than the interpreter allows.
    #[error("maximum call depth of {0} exceeded")]
    RecursionLimit(usize),

    /// A handler failed while the script was running.
    #[error("instrumentation failed: {0}")]
    Instrumentation(#[from] waypoint_engine::Error),
}

impl ScriptError {
    pub(crate) fn type_error(line: u32, message: impl Into<String>) -> Self {
        Self::Type {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn runtime(line: u32, message: impl Into<String>) -> Self {
        Self::Runtime {
            line,
            message: message.into(),
        }
    }
}

impl From<ScriptError> for HostError {
    fn from(err: ScriptError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<SyntaxError> for HostError {
    fn from(err: SyntaxError) -> Self {
        Self::new(err.to_string())
    }
}

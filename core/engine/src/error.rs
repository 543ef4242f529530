//! Error types for the instrumentation engine.
//!
//! Errors are grouped by where they surface: resolution errors at trigger build
//! time, writeback, jump and lifecycle errors while a handler is used or fired, and
//! monitor errors whenever the registry talks to the host. Condition failures never
//! appear here; they are swallowed and read as "do not fire".

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any error produced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A location could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A callback could not bind its arguments or write its results back.
    #[error(transparent)]
    Writeback(#[from] WritebackError),

    /// A handler was used after it was removed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A jump callback could not move execution.
    #[error(transparent)]
    Jump(#[from] JumpError),

    /// The host monitor rejected a registry change.
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// A host operation (code injection, predicate, debugger) failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// A breakpoint callback fired but no debugger was configured.
    #[error("no debugger is attached to the instrumenter")]
    NoDebugger,
}

/// Errors raised while turning identifiers into concrete locations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The identifier matched no instrumentable line.
    #[error("identifier `{identifier}` matches no instrumentable line in `{routine}`")]
    NoMatch {
        /// Canonical form of the identifier.
        identifier: String,
        /// Name of the anchor.
        routine: String,
    },

    /// Every identifier and anchor combination produced nothing.
    #[error("could not set any event based on the anchor and identifiers")]
    NoEvents,

    /// A source hash was given and does not match the anchor's current source.
    #[error("source hash mismatch for `{routine}`: expected {expected}, found {found}")]
    SourceHashMismatch {
        /// Name of the anchor.
        routine: String,
        /// Hash supplied by the caller.
        expected: String,
        /// Hash of the current source.
        found: String,
    },

    /// A relative offset or a source hash was used with the global anchor.
    #[error("{0} cannot be used with a global trigger")]
    GlobalAnchor(&'static str),

    /// `<start>` or `<return>` appeared inside an AND tuple.
    #[error("`{0}` cannot be combined with other identifiers")]
    SentinelInTuple(&'static str),

    /// An identifier could not be parsed.
    #[error("invalid identifier `{identifier}`: {reason}")]
    InvalidIdentifier {
        /// The offending text.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A string condition is not a valid expression.
    #[error("invalid condition expression `{expression}`: {reason}")]
    InvalidCondition {
        /// The condition source.
        expression: String,
        /// Parser message from the host.
        reason: String,
    },
}

/// Errors raised while binding callback arguments or applying a writeback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WritebackError {
    /// A declared parameter has no local of the same name.
    #[error("argument `{0}` not found in frame locals")]
    MissingArgument(String),

    /// `_retval` was declared by a callback fired outside a return event.
    #[error("`_retval` can only be used in <return> callbacks")]
    ReturnValueOutsideReturn,

    /// A writeback names a variable the frame does not have.
    #[error("cannot write back `{0}`: not a local of the frame")]
    UnknownLocal(String),

    /// The callback returned a value that is neither a map, none, nor the disable sentinel.
    #[error("callback must return a map for writeback or none, got {0}")]
    UnsupportedReturn(&'static str),

    /// A parameter list declared the same name twice.
    #[error("parameter `{0}` is declared more than once")]
    DuplicateParameter(String),
}

/// Errors raised by handler lifecycle operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `enable` on a removed handler.
    #[error("cannot enable a removed handler")]
    EnableRemoved,

    /// `disable` on a removed handler.
    #[error("cannot disable a removed handler")]
    DisableRemoved,

    /// `submit` on a removed handler.
    #[error("cannot submit a removed handler")]
    SubmitRemoved,

    /// `submit` of a handler that belongs to another instrumenter.
    #[error("the handler is already submitted to another instrumenter")]
    ForeignInstrumenter,
}

/// Errors raised by jump callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JumpError {
    /// The target resolved to no line of the executing routine.
    #[error("could not determine line number for target `{target}` in `{routine}`")]
    Unresolved {
        /// Canonical form of the target.
        target: String,
        /// Name of the executing routine.
        routine: String,
    },

    /// The host refused to move the current line.
    #[error("cannot jump to line {line}: {reason}")]
    Refused {
        /// Requested line.
        line: u32,
        /// Host explanation.
        reason: String,
    },
}

/// Failure of the host monitoring facility.
///
/// Registry state would drift from the host's view after such a failure, so it is
/// always propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("monitor error: {message}")]
pub struct MonitorError {
    message: String,
}

impl MonitorError {
    /// Creates a monitor error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by a host operation such as evaluation or execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    /// Creates a host error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

//! Interfaces between the engine and the host that runs the instrumented code.
//!
//! The engine never executes code itself. A host supplies:
//!
//! - [`Routine`]s and [`Namespace`]s: read-only views over compiled code and its source
//! - a [`Frame`] for every firing: the live bindings of the running invocation
//! - a [`Monitor`]: the facility that delivers line, start and return events
//! - optionally a [`Debugger`] that breakpoint callbacks hand frames to
//!
//! In the other direction the host calls [`EventHooks::on_event`] whenever a watched
//! event happens; the [`Instrumenter`](crate::Instrumenter) implements it.

use crate::{
    error::{Error, HostError, MonitorError},
    value::Value,
};
use bitflags::bitflags;
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

/// Stable identity of a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(u64);

impl RoutineId {
    /// Allocates a process-wide unique id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared handle to a routine.
pub type RoutineRef = Arc<dyn Routine>;

/// An immutable unit of compiled code.
///
/// Routines are keys for the engine; it never mutates them.
pub trait Routine: fmt::Debug + Send + Sync {
    /// Identity of the routine.
    fn id(&self) -> RoutineId;

    /// Human readable name.
    fn name(&self) -> &str;

    /// Line number of the first source line, decorators included.
    fn first_line(&self) -> u32;

    /// The source text of the routine, starting at [`Routine::first_line`].
    ///
    /// `None` when the source is not available.
    fn source_lines(&self) -> Option<Arc<[String]>>;

    /// Lines the monitor is able to stop at.
    fn lines(&self) -> &[u32];

    /// Routines defined directly inside this one.
    fn nested(&self) -> Vec<RoutineRef>;
}

/// A container of routines such as a module or a class.
pub trait Namespace: fmt::Debug + Send + Sync {
    /// Human readable name.
    fn name(&self) -> &str;

    /// Line number of the first source line.
    fn first_line(&self) -> u32;

    /// Source text of the namespace.
    fn source_lines(&self) -> Option<Arc<[String]>>;

    /// Routines statically declared on the namespace.
    fn members(&self) -> Vec<RoutineRef>;
}

/// Live state of one in-progress invocation.
pub trait Frame {
    /// Routine being executed.
    fn routine(&self) -> &RoutineRef;

    /// Line currently executing.
    fn line(&self) -> u32;

    /// Moves execution to `line` of the same routine.
    ///
    /// # Errors
    ///
    /// Hosts refuse when the frame cannot change lines at this point or the line is
    /// not a statement boundary of the routine.
    fn set_line(&mut self, line: u32) -> Result<(), HostError>;

    /// Value of a local binding.
    fn local(&self, name: &str) -> Option<Value>;

    /// Names of all local bindings.
    fn local_names(&self) -> Vec<String>;

    /// Rebinds an existing local.
    ///
    /// # Errors
    ///
    /// Fails when the host cannot store the value.
    fn set_local(&mut self, name: &str, value: Value) -> Result<(), HostError>;

    /// Value of a global binding.
    fn global(&self, name: &str) -> Option<Value>;

    /// Value being returned, only available while a return event is dispatched.
    fn return_value(&self) -> Option<&Value>;

    /// Evaluates an expression with the frame's bindings.
    ///
    /// # Errors
    ///
    /// Any failure raised while evaluating.
    fn eval(&mut self, expression: &str) -> Result<Value, HostError>;

    /// Executes statements with the frame's bindings as read and write namespace.
    ///
    /// # Errors
    ///
    /// Any failure raised while executing.
    fn exec(&mut self, statements: &str) -> Result<(), HostError>;

    /// Makes local mutations visible to the routine once the callback returns.
    ///
    /// # Errors
    ///
    /// Fails if the host cannot commit the bindings.
    fn sync_locals(&mut self) -> Result<(), HostError> {
        Ok(())
    }
}

/// The kinds of events a trigger can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A source line is about to execute.
    Line,
    /// A routine starts executing.
    Start,
    /// A routine is about to return.
    Return,
}

impl EventKind {
    /// The event class as a single-member set.
    #[must_use]
    pub const fn as_set(self) -> EventSet {
        match self {
            Self::Line => EventSet::LINE,
            Self::Start => EventSet::START,
            Self::Return => EventSet::RETURN,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Line => "line",
            Self::Start => "start",
            Self::Return => "return",
        })
    }
}

bitflags! {
    /// A set of event classes watched for a scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventSet: u8 {
        /// Line events.
        const LINE = 0b001;
        /// Start events.
        const START = 0b010;
        /// Return events.
        const RETURN = 0b100;
    }
}

/// Where a monitor delivers events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every routine.
    Global,
    /// One routine.
    Routine(RoutineId),
}

/// Verdict of a low-level dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Keep delivering events at this site.
    #[default]
    Continue,
    /// Stop delivering events at this exact site until the monitor is resynchronized.
    Disable,
}

/// Callbacks a host invokes for watched events.
pub trait EventHooks: Send + Sync {
    /// Called on the executing thread when a watched event fires.
    ///
    /// # Errors
    ///
    /// Errors raised by callbacks propagate into the running code.
    fn on_event(&self, frame: &mut dyn Frame, kind: EventKind) -> Result<Dispatch, Error>;
}

/// The host's execution monitoring facility.
pub trait Monitor: Send + Sync {
    /// Adds event classes to the set watched for `scope`.
    ///
    /// # Errors
    ///
    /// The monitor could not arm the events.
    fn watch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError>;

    /// Removes event classes from the set watched for `scope`.
    ///
    /// # Errors
    ///
    /// The monitor could not disarm the events.
    fn unwatch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError>;

    /// Event classes currently watched for `scope`.
    fn watched(&self, scope: Scope) -> EventSet;

    /// Re-arms every site previously switched off with [`Dispatch::Disable`].
    ///
    /// # Errors
    ///
    /// The monitor could not rebuild its dispatch state.
    fn resynchronize(&self) -> Result<(), MonitorError>;

    /// Registers the hooks to call for watched events.
    ///
    /// # Errors
    ///
    /// Hooks are already registered by another tool.
    fn register_hooks(&self, tool: &str, hooks: Weak<dyn EventHooks>) -> Result<(), MonitorError>;

    /// Checks that `source` parses as a standalone expression.
    ///
    /// # Errors
    ///
    /// A message describing the syntax error.
    fn check_expression(&self, source: &str) -> Result<(), HostError>;
}

/// An interactive debugger that takes over a frame.
pub trait Debugger: Send + Sync {
    /// Drives an interactive session on `frame` until the user resumes.
    ///
    /// # Errors
    ///
    /// The session failed.
    fn interact(&self, frame: &mut dyn Frame) -> Result<(), HostError>;
}

//! Waypoint's instrumentation engine
//!
//! This crate attaches behavior to chosen points of running code without editing
//! that code. It is host agnostic: whatever executes the code implements the
//! interfaces in [`host`], and the engine decides which handlers run when the host
//! reports an event.
//!
//! # Overview
//!
//! - [`Identifier`]: a location specifier (line, source prefix, pattern, relative
//!   offset, `<start>`/`<return>`, or an AND-tuple of these)
//! - [`Resolver`]: maps identifiers to concrete `(routine, line)` points
//! - [`Trigger`]: resolved points plus an optional firing condition
//! - [`Callback`]: the action run on firing (inject, invoke, jump, breakpoint)
//! - [`Handler`]: one trigger bound to its callbacks, with an enable/disable/remove
//!   lifecycle
//! - [`Instrumenter`]: the registry and dispatcher the host monitor calls into
//!
//! # Example
//!
//! ```rust,ignore
//! use waypoint_engine::{Callback, Instrumenter};
//!
//! let instrumenter = Instrumenter::builder().tool_name("demo").build(monitor)?;
//! let trigger = instrumenter.when(routine).at("return x").build()?;
//! let handler = instrumenter.attach(trigger, Callback::inject("x = 1"))?;
//!
//! // ... run the code, then
//! handler.remove()?;
//! ```

pub mod callback;
pub mod error;
pub mod handler;
pub mod host;
pub mod identifier;
pub mod instrumenter;
pub mod resolver;
pub mod trigger;
pub mod value;

#[cfg(test)]
mod testing;

pub use callback::{Argument, Arguments, Callback, NativeFunction};
pub use error::{
    Error, HostError, JumpError, LifecycleError, MonitorError, ResolutionError, Result,
    WritebackError,
};
pub use handler::{Handler, HandlerId};
pub use host::{
    Debugger, Dispatch, EventHooks, EventKind, EventSet, Frame, Monitor, Namespace, Routine,
    RoutineId, RoutineRef, Scope,
};
pub use identifier::Identifier;
pub use instrumenter::{Instrumenter, InstrumenterBuilder};
pub use resolver::{Anchor, Event, Resolver, Site, source_hash};
pub use trigger::{Condition, Fire, Trigger, TriggerBuilder};
pub use value::{Bindings, Value};


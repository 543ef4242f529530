//! Debuggers the CLI can attach to breakpoint handlers.

mod console;

pub(crate) use console::ConsoleDebugger;

//! A small indentation-based scripting language that hosts `waypoint_engine`.
//!
//! The crate provides everything an instrumenter needs from a runtime: routines
//! with line tables and source text ([`CodeBlock`]), namespaces ([`Module`]), live
//! frames ([`ScriptFrame`]) and an event monitoring facility ([`Monitoring`]).
//!
//! ```rust,ignore
//! use waypoint_engine::{Callback, Instrumenter};
//! use waypoint_script::Interpreter;
//!
//! let interp = Interpreter::new();
//! let module = interp.load("demo", "def f(x):\n    y = x + 1\n    return y")?;
//!
//! let instrumenter = Instrumenter::builder().build(interp.monitoring().clone())?;
//! let f = module.routine("f").unwrap();
//! instrumenter.attach(instrumenter.when(f).at("y = x + 1").build()?, Callback::inject("x = 10"))?;
//!
//! assert_eq!(interp.call(&module, "f", vec![1.into()])?, 11.into());
//! ```

pub mod code;
pub mod error;
pub mod interp;
pub mod monitor;
pub mod syntax;

pub use code::{BlockKind, CodeBlock, Module};
pub use error::{ScriptError, SyntaxError};
pub use interp::{Interpreter, MAX_CALL_DEPTH, ScriptFrame};
pub use monitor::Monitoring;

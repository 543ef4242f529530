//! Actions run when a trigger fires.
//!
//! A [`Callback`] is one of four kinds: source injected into the frame, a native
//! function bound to the frame's locals, a jump to another line of the running
//! routine, or a hand-off to an interactive debugger.
//!
//! Native functions declare their parameter names up front. At call time each
//! name is bound from the frame:
//!
//! - `_frame` receives the frame itself
//! - `_retval` receives the value being returned (return events only)
//! - any other name receives the local of the same name, which must exist
//!
//! A function may return a map to write locals back, `None`, or
//! [`Value::Disable`] to switch its handler off.

use crate::{
    error::{Error, HostError, JumpError, WritebackError},
    host::{Dispatch, Frame},
    identifier::Identifier,
    instrumenter::Instrumenter,
    resolver::{Anchor, Resolver},
    value::Value,
};
use std::{fmt, sync::Arc};

/// Parameter name bound to the frame.
pub const FRAME_PARAM: &str = "_frame";
/// Parameter name bound to the return value.
pub const RETVAL_PARAM: &str = "_retval";

type NativeFn = dyn Fn(&Arguments<'_>) -> Result<Value, HostError> + Send + Sync;

/// A Rust closure with declared parameter names.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    params: Arc<[String]>,
    body: Arc<NativeFn>,
}

impl NativeFunction {
    /// Wraps `body`, which receives its arguments in the order of `params`.
    ///
    /// # Errors
    ///
    /// A parameter name is declared twice.
    pub fn new<I, S, F>(params: I, body: F) -> Result<Self, WritebackError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Arguments<'_>) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        let mut names: Vec<String> = Vec::new();
        for param in params {
            let param = param.into();
            if names.contains(&param) {
                return Err(WritebackError::DuplicateParameter(param));
            }
            names.push(param);
        }
        Ok(Self {
            name: Arc::from("<native>"),
            params: names.into(),
            body: Arc::new(body),
        })
    }

    /// Sets the name shown in logs.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Arc::from(name);
        self
    }

    /// Name of the function.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter names.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Binds the declared parameters from `frame` and calls the function.
    ///
    /// # Errors
    ///
    /// A parameter cannot be bound, or the function itself fails.
    pub fn call_in_frame(&self, frame: &dyn Frame) -> Result<Value, Error> {
        let mut values = Vec::with_capacity(self.params.len());
        for param in self.params.iter() {
            let arg = match param.as_str() {
                FRAME_PARAM => Argument::Frame(frame),
                RETVAL_PARAM => Argument::Value(
                    frame
                        .return_value()
                        .cloned()
                        .ok_or(WritebackError::ReturnValueOutsideReturn)?,
                ),
                name => Argument::Value(
                    frame
                        .local(name)
                        .ok_or_else(|| WritebackError::MissingArgument(name.to_owned()))?,
                ),
            };
            values.push(arg);
        }

        let args = Arguments {
            params: &self.params,
            values,
        };
        Ok((self.body)(&args)?)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// One bound argument.
pub enum Argument<'a> {
    /// A value read from the frame.
    Value(Value),
    /// The frame itself, for `_frame`.
    Frame(&'a dyn Frame),
}

impl fmt::Debug for Argument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Frame(frame) => f
                .debug_tuple("Frame")
                .field(&frame.routine().name())
                .finish(),
        }
    }
}

/// Arguments bound for a [`NativeFunction`] call.
#[derive(Debug)]
pub struct Arguments<'a> {
    params: &'a [String],
    values: Vec<Argument<'a>>,
}

impl<'a> Arguments<'a> {
    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the function declared no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at position `index`, `None` for the frame or out of range.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.values.get(index)? {
            Argument::Value(v) => Some(v),
            Argument::Frame(_) => None,
        }
    }

    /// The value bound to parameter `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.params.iter().position(|p| p == name)?;
        self.value(index)
    }

    /// The frame, if `_frame` was declared.
    #[must_use]
    pub fn frame(&self) -> Option<&'a dyn Frame> {
        self.values.iter().find_map(|arg| match arg {
            Argument::Frame(frame) => Some(*frame),
            Argument::Value(_) => None,
        })
    }
}

/// An action attached to a trigger.
#[derive(Debug, Clone)]
pub enum Callback {
    /// Executes source text in the frame.
    Inject(Arc<str>),
    /// Calls a native function bound to the frame's locals.
    Invoke(NativeFunction),
    /// Moves execution to another line of the running routine.
    Jump(Identifier),
    /// Hands the frame to the instrumenter's debugger.
    Breakpoint,
}

impl Callback {
    /// Callback that executes `source` in the frame.
    pub fn inject(source: impl AsRef<str>) -> Self {
        Self::Inject(Arc::from(source.as_ref()))
    }

    /// Callback that calls `function`.
    #[must_use]
    pub fn invoke(function: NativeFunction) -> Self {
        Self::Invoke(function)
    }

    /// Callback that jumps to `target`.
    pub fn jump(target: impl Into<Identifier>) -> Self {
        Self::Jump(target.into())
    }

    /// Callback that breaks into the debugger.
    #[must_use]
    pub const fn breakpoint() -> Self {
        Self::Breakpoint
    }

    /// Runs the callback against `frame`.
    ///
    /// # Errors
    ///
    /// Writeback, jump and host failures are returned as is; they are never silent.
    pub fn call(&self, frame: &mut dyn Frame, instrumenter: &Instrumenter) -> Result<Dispatch, Error> {
        let dispatch = match self {
            Self::Inject(source) => {
                frame.exec(source)?;
                Dispatch::Continue
            }
            Self::Invoke(function) => {
                let returned = function.call_in_frame(frame)?;
                write_back(frame, returned)?
            }
            Self::Jump(target) => {
                jump(frame, instrumenter.resolver(), target)?;
                Dispatch::Continue
            }
            Self::Breakpoint => {
                let debugger = instrumenter.debugger().ok_or(Error::NoDebugger)?;
                debugger.interact(frame)?;
                Dispatch::Continue
            }
        };
        frame.sync_locals()?;
        Ok(dispatch)
    }
}

fn write_back(frame: &mut dyn Frame, returned: Value) -> Result<Dispatch, Error> {
    match returned {
        Value::Map(bindings) => {
            if let Some(name) = bindings.keys().find(|name| frame.local(name).is_none()) {
                return Err(WritebackError::UnknownLocal(name.clone()).into());
            }
            for (name, value) in bindings {
                frame.set_local(&name, value)?;
            }
            Ok(Dispatch::Continue)
        }
        Value::None => Ok(Dispatch::Continue),
        Value::Disable => Ok(Dispatch::Disable),
        other => Err(WritebackError::UnsupportedReturn(other.type_name()).into()),
    }
}

fn jump(frame: &mut dyn Frame, resolver: &Resolver, target: &Identifier) -> Result<(), Error> {
    let routine = Arc::clone(frame.routine());
    let unresolved = || JumpError::Unresolved {
        target: target.to_string(),
        routine: routine.name().to_owned(),
    };

    if target.is_sentinel() {
        return Err(unresolved().into());
    }
    let target = Resolver::unify(&Anchor::Routine(Arc::clone(&routine)), target)?;
    let line = resolver.line_in(&routine, &target).ok_or_else(unresolved)?;

    log::debug!("jumping from line {} to line {line} in `{}`", frame.line(), routine.name());
    frame.set_line(line).map_err(|e| JumpError::Refused {
        line,
        reason: e.message().to_owned(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFrame, fake_instrumenter, sample_routine};

    fn frame() -> FakeFrame {
        FakeFrame::new(sample_routine(), 3).with_local("x", 0)
    }

    #[test]
    fn inject_executes_in_frame() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let outcome = Callback::inject("x = 1").call(&mut frame, &instrumenter).unwrap();
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(frame.local("x"), Some(Value::Int(1)));
        assert_eq!(frame.syncs, 1);
    }

    #[test]
    fn invoke_writes_back_locals() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let change = NativeFunction::new(["x"], |args| {
            let x = args.value(0).and_then(Value::as_int).unwrap_or_default();
            Ok(Value::map([("x", Value::Int(x + 1))]))
        })
        .unwrap();
        Callback::invoke(change).call(&mut frame, &instrumenter).unwrap();
        assert_eq!(frame.local("x"), Some(Value::Int(1)));
    }

    #[test]
    fn invoke_binds_the_frame() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let change = NativeFunction::new([FRAME_PARAM], |args| {
            let frame = args.frame().expect("frame is declared");
            let x = frame.local("x").and_then(|v| v.as_int()).unwrap_or_default();
            Ok(Value::map([("x", Value::Int(x + 10))]))
        })
        .unwrap();
        Callback::invoke(change).call(&mut frame, &instrumenter).unwrap();
        assert_eq!(frame.local("x"), Some(Value::Int(10)));
    }

    #[test]
    fn invoke_rejects_unknown_names() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();

        let missing = NativeFunction::new(["y"], |_| Ok(Value::None)).unwrap();
        let err = Callback::invoke(missing).call(&mut frame, &instrumenter).unwrap_err();
        assert!(matches!(err, Error::Writeback(WritebackError::MissingArgument(ref n)) if n == "y"));

        let writes_y = NativeFunction::new(["x"], |_| Ok(Value::map([("y", Value::Int(1))]))).unwrap();
        let err = Callback::invoke(writes_y).call(&mut frame, &instrumenter).unwrap_err();
        assert!(matches!(err, Error::Writeback(WritebackError::UnknownLocal(ref n)) if n == "y"));
        assert_eq!(frame.local("y"), None);
    }

    #[test]
    fn invoke_rejects_unsupported_returns() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let list = NativeFunction::new(["x"], |_| Ok(Value::List(vec![Value::Int(1)]))).unwrap();
        let err = Callback::invoke(list).call(&mut frame, &instrumenter).unwrap_err();
        assert!(matches!(err, Error::Writeback(WritebackError::UnsupportedReturn("list"))));
    }

    #[test]
    fn retval_only_in_return_events() {
        let (instrumenter, _) = fake_instrumenter();
        let peek = NativeFunction::new([RETVAL_PARAM], |args| {
            assert_eq!(args.get(RETVAL_PARAM), Some(&Value::Int(7)));
            Ok(Value::None)
        })
        .unwrap();

        let mut frame = frame();
        let err = Callback::invoke(peek.clone()).call(&mut frame, &instrumenter).unwrap_err();
        assert!(matches!(err, Error::Writeback(WritebackError::ReturnValueOutsideReturn)));

        let mut returning = frame.returning(Value::Int(7));
        Callback::invoke(peek).call(&mut returning, &instrumenter).unwrap();
    }

    #[test]
    fn disable_is_reported() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let off = NativeFunction::new(Vec::<String>::new(), |_| Ok(Value::Disable)).unwrap();
        assert_eq!(
            Callback::invoke(off).call(&mut frame, &instrumenter).unwrap(),
            Dispatch::Disable
        );
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        assert!(matches!(
            NativeFunction::new(["x", "x"], |_| Ok(Value::None)),
            Err(WritebackError::DuplicateParameter(_))
        ));
    }

    #[test]
    fn jump_moves_the_frame() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        Callback::jump("return x").call(&mut frame, &instrumenter).unwrap();
        assert_eq!(frame.line(), 4);
    }

    #[test]
    fn unresolvable_jump_is_an_error() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        let err = Callback::jump("nowhere").call(&mut frame, &instrumenter).unwrap_err();
        assert!(matches!(err, Error::Jump(JumpError::Unresolved { .. })));
        assert_eq!(frame.line(), 3);
    }

    #[test]
    fn breakpoint_without_debugger_fails() {
        let (instrumenter, _) = fake_instrumenter();
        let mut frame = frame();
        assert!(matches!(
            Callback::breakpoint().call(&mut frame, &instrumenter),
            Err(Error::NoDebugger)
        ));
    }
}

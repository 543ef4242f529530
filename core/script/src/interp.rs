//! Tree-walking interpreter.
//!
//! Every routine invocation gets a [`ScriptFrame`]. The interpreter reports a start
//! event on entry, a line event before the first statement of each line, and a
//! return event carrying the returned value. A line event handler may move the
//! frame to another statement of the same routine; execution then resumes there.

use crate::{
    code::{Body, CodeBlock, Module},
    error::ScriptError,
    monitor::Monitoring,
    syntax::{BinaryOp, Expr, LogicalOp, Stmt, StmtKind, UnaryOp, parse_expression, parse_program, parse_snippet},
};
use rustc_hash::FxHashMap;
use std::{cmp::Ordering, fmt, sync::Arc};
use waypoint_engine::{Bindings, EventKind, Frame, HostError, Routine, RoutineRef, Value};

/// Maximum depth of nested routine calls.
pub const MAX_CALL_DEPTH: usize = 100;

/// Runs scripts and reports their events to a [`Monitoring`].
#[derive(Debug)]
pub struct Interpreter {
    monitoring: Arc<Monitoring>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an interpreter with its own monitoring facility.
    #[must_use]
    pub fn new() -> Self {
        Self::with_monitoring(Arc::new(Monitoring::new()))
    }

    /// Creates an interpreter reporting to `monitoring`.
    #[must_use]
    pub const fn with_monitoring(monitoring: Arc<Monitoring>) -> Self {
        Self { monitoring }
    }

    /// The monitoring facility, to hand to an instrumenter.
    #[must_use]
    pub const fn monitoring(&self) -> &Arc<Monitoring> {
        &self.monitoring
    }

    /// Parses `source` and runs its top-level code.
    ///
    /// # Errors
    ///
    /// The source does not parse, or its top-level code fails.
    pub fn load(&self, name: &str, source: &str) -> Result<Arc<Module>, ScriptError> {
        let program = parse_program(source)?;
        let module = Arc::new(Module::compile(name, source, &program));
        let code = Arc::clone(module.code());
        let frame = ScriptFrame::new(self, &module, &code, 1);
        self.run(frame)?;
        log::debug!("loaded module `{name}`");
        Ok(module)
    }

    /// Calls the top-level routine `name` of `module`.
    ///
    /// # Errors
    ///
    /// The routine does not exist, is called with the wrong number of arguments, or
    /// fails.
    pub fn call(&self, module: &Module, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let code = module.function(name).ok_or_else(|| ScriptError::UnknownRoutine {
            module: module.code().name().to_owned(),
            name: name.to_owned(),
        })?;
        self.invoke(module, &code, args, 0)
    }

    fn invoke(
        &self,
        module: &Module,
        code: &Arc<CodeBlock>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ScriptError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::RecursionLimit(MAX_CALL_DEPTH));
        }
        if args.len() != code.params().len() {
            return Err(ScriptError::Arity {
                routine: code.name().to_owned(),
                expected: code.params().len(),
                found: args.len(),
            });
        }

        let mut frame = ScriptFrame::new(self, module, code, depth + 1);
        for (param, arg) in code.params().iter().zip(args) {
            frame.locals.insert(param.clone(), arg);
        }
        self.run(frame)
    }

    fn run(&self, mut frame: ScriptFrame<'_>) -> Result<Value, ScriptError> {
        let code = Arc::clone(&frame.code);
        frame.line = code.defined_at();
        self.monitoring.deliver(&mut frame, EventKind::Start)?;

        let value = match code.body() {
            Body::Block(body) => self.run_block(&mut frame, body)?.unwrap_or_default(),
            Body::Lambda(expr) => {
                self.line_event(&mut frame)?;
                self.eval(&mut frame, expr)?
            }
        };

        frame.return_value = Some(value);
        self.monitoring.deliver(&mut frame, EventKind::Return)?;
        Ok(frame.return_value.take().unwrap_or_default())
    }

    /// Fires a line event and returns the line a handler asked to jump to.
    fn line_event(&self, frame: &mut ScriptFrame<'_>) -> Result<Option<u32>, ScriptError> {
        frame.pending_jump = None;
        frame.jumpable = true;
        let delivered = self.monitoring.deliver(frame, EventKind::Line);
        frame.jumpable = false;
        delivered?;
        Ok(frame.pending_jump.take())
    }

    /// Runs `body`; `Some` carries the value of an executed `return`.
    fn run_block(&self, frame: &mut ScriptFrame<'_>, body: &[Stmt]) -> Result<Option<Value>, ScriptError> {
        let mut index = 0;
        let mut previous = None;
        while let Some(stmt) = body.get(index) {
            frame.line = stmt.line;
            if previous != Some(stmt.line)
                && let Some(target) = self.line_event(frame)?
            {
                index = body
                    .iter()
                    .position(|stmt| stmt.line == target)
                    .ok_or_else(|| ScriptError::runtime(target, "jump target is not a statement"))?;
                previous = Some(target);
                continue;
            }
            previous = Some(stmt.line);

            if let Some(value) = self.exec(frame, stmt)? {
                return Ok(Some(value));
            }
            index += 1;
        }
        Ok(None)
    }

    fn exec(&self, frame: &mut ScriptFrame<'_>, stmt: &Stmt) -> Result<Option<Value>, ScriptError> {
        match &stmt.kind {
            StmtKind::Def(def) => frame.define(&def.name, stmt.line)?,
            StmtKind::Lambda { target, .. } => frame.define(target, stmt.line)?,
            StmtKind::Assign { target, value } => {
                let value = self.eval(frame, value)?;
                frame.bind(target, value);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::None,
                };
                return Ok(Some(value));
            }
            StmtKind::Assert(test) => {
                if !self.eval(frame, test)?.is_truthy() {
                    return Err(ScriptError::Assertion { line: frame.line });
                }
            }
            StmtKind::Pass => {}
            StmtKind::Expr(expr) => {
                self.eval(frame, expr)?;
            }
        }
        Ok(None)
    }

    fn eval(&self, frame: &mut ScriptFrame<'_>, expr: &Expr) -> Result<Value, ScriptError> {
        let line = frame.line;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => frame.lookup(name).ok_or_else(|| ScriptError::Name {
                line,
                name: name.clone(),
            }),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(frame, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(frame, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_named(frame, callee, args)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(frame, operand)?;
                unary(*op, operand, line)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                binary(*op, &lhs, &rhs, line)
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                match (op, lhs.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(lhs),
                    _ => self.eval(frame, rhs),
                }
            }
        }
    }

    fn call_named(&self, frame: &ScriptFrame<'_>, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        if let Some(code) = frame.function(name) {
            return self.invoke(frame.module, &code, args, frame.depth);
        }
        if let Some(result) = builtin(name, &args, frame.line) {
            return result;
        }
        if frame.lookup(name).is_some() {
            return Err(ScriptError::type_error(frame.line, format!("`{name}` is not callable")));
        }
        Err(ScriptError::Name {
            line: frame.line,
            name: name.to_owned(),
        })
    }
}

/// Live state of one routine invocation.
pub struct ScriptFrame<'a> {
    interp: &'a Interpreter,
    module: &'a Module,
    code: Arc<CodeBlock>,
    routine: RoutineRef,
    locals: Bindings,
    functions: FxHashMap<String, Arc<CodeBlock>>,
    line: u32,
    return_value: Option<Value>,
    pending_jump: Option<u32>,
    jumpable: bool,
    depth: usize,
}

impl<'a> ScriptFrame<'a> {
    fn new(interp: &'a Interpreter, module: &'a Module, code: &Arc<CodeBlock>, depth: usize) -> Self {
        Self {
            interp,
            module,
            code: Arc::clone(code),
            routine: Arc::clone(code) as RoutineRef,
            locals: Bindings::new(),
            functions: FxHashMap::default(),
            line: code.first_line(),
            return_value: None,
            pending_jump: None,
            jumpable: false,
            depth,
        }
    }

    /// The module the frame runs in.
    #[must_use]
    pub const fn module(&self) -> &'a Module {
        self.module
    }

    /// The running code block.
    #[must_use]
    pub const fn code(&self) -> &Arc<CodeBlock> {
        &self.code
    }

    fn is_module(&self) -> bool {
        Arc::ptr_eq(&self.code, self.module.code())
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if self.is_module() {
            return self.module.global(name);
        }
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.module.global(name))
    }

    fn bind(&mut self, name: &str, value: Value) {
        if self.is_module() {
            self.module.set_global(name, value);
        } else {
            self.locals.insert(name.to_owned(), value);
        }
    }

    fn function(&self, name: &str) -> Option<Arc<CodeBlock>> {
        self.functions
            .get(name)
            .cloned()
            .or_else(|| self.module.function(name))
    }

    /// Binds the block defined by the statement on `line` to `name`.
    fn define(&mut self, name: &str, line: u32) -> Result<(), ScriptError> {
        let code = self
            .code
            .child_at(line)
            .cloned()
            .ok_or_else(|| ScriptError::runtime(line, format!("no code compiled for `{name}`")))?;
        if self.is_module() {
            self.module.set_function(name, code);
        } else {
            self.functions.insert(name.to_owned(), code);
        }
        Ok(())
    }

    fn has_statement_at(&self, line: u32) -> bool {
        match self.code.body() {
            Body::Block(body) => body.iter().any(|stmt| stmt.line == line),
            Body::Lambda(_) => self.code.lines().contains(&line),
        }
    }
}

impl Frame for ScriptFrame<'_> {
    fn routine(&self) -> &RoutineRef {
        &self.routine
    }

    fn line(&self) -> u32 {
        self.line
    }

    fn set_line(&mut self, line: u32) -> Result<(), HostError> {
        if !self.jumpable {
            return Err(HostError::new("the line can only be changed from a line event"));
        }
        if !self.has_statement_at(line) {
            return Err(HostError::new(format!(
                "line {line} is not a statement of `{}`",
                self.code.name()
            )));
        }
        self.pending_jump = Some(line);
        Ok(())
    }

    fn local(&self, name: &str) -> Option<Value> {
        if self.is_module() {
            self.module.global(name)
        } else {
            self.locals.get(name).cloned()
        }
    }

    fn local_names(&self) -> Vec<String> {
        if self.is_module() {
            self.module.global_names()
        } else {
            self.locals.keys().cloned().collect()
        }
    }

    fn set_local(&mut self, name: &str, value: Value) -> Result<(), HostError> {
        self.bind(name, value);
        Ok(())
    }

    fn global(&self, name: &str) -> Option<Value> {
        self.module.global(name)
    }

    fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    fn eval(&mut self, expression: &str) -> Result<Value, HostError> {
        let expr = parse_expression(expression)?;
        let interp = self.interp;
        Ok(interp.eval(self, &expr)?)
    }

    fn exec(&mut self, statements: &str) -> Result<(), HostError> {
        let interp = self.interp;
        for stmt in parse_snippet(statements)? {
            interp.exec(self, &stmt)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScriptFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFrame")
            .field("routine", &self.code.name())
            .field("line", &self.line)
            .field("locals", &self.locals)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

fn unary(op: UnaryOp, operand: Value, line: u32) -> Result<Value, ScriptError> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::runtime(line, "integer overflow")),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, value) => Err(ScriptError::type_error(
            line,
            format!("cannot negate a {}", value.type_name()),
        )),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

#[allow(clippy::float_cmp)]
fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, line: u32) -> Result<Value, ScriptError> {
    let overflow = || ScriptError::runtime(line, "integer overflow");
    let unsupported = || {
        ScriptError::type_error(
            line,
            format!(
                "unsupported operand types for {op:?}: {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ),
        )
    };

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare(lhs, rhs).ok_or_else(unsupported)?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::from(format!("{a}{b}"))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinaryOp::Mul, Value::Str(s), Value::Int(n)) => {
            Ok(Value::from(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Rem, Value::Int(_), Value::Int(0)) | (BinaryOp::Div, _, Value::Int(0)) => {
            Err(ScriptError::runtime(line, "division by zero"))
        }
        (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => {
            // The result takes the sign of the divisor.
            let r = a.checked_rem(*b).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }))
        }
        _ => {
            let (Some(a), Some(b)) = (as_float(lhs), as_float(rhs)) else {
                return Err(unsupported());
            };
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                    return Err(ScriptError::runtime(line, "division by zero"));
                }
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a - b * (a / b).floor(),
                _ => return Err(unsupported()),
            };
            Ok(Value::Float(value))
        }
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => as_float(lhs)?.partial_cmp(&as_float(rhs)?),
    }
}

/// Calls a builtin; `None` if `name` is not one.
fn builtin(name: &str, args: &[Value], line: u32) -> Option<Result<Value, ScriptError>> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(ScriptError::Arity {
                routine: name.to_owned(),
                expected: n,
                found: args.len(),
            })
        }
    };
    let wrong_type = |value: &Value| {
        Err(ScriptError::type_error(
            line,
            format!("{name}() does not accept a {}", value.type_name()),
        ))
    };

    let result = match name {
        "len" => arity(1).and_then(|()| match &args[0] {
            Value::Str(s) => Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
            Value::List(items) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
            Value::Map(map) => Ok(Value::Int(i64::try_from(map.len()).unwrap_or(i64::MAX))),
            other => wrong_type(other),
        }),
        "str" => arity(1).map(|()| match &args[0] {
            Value::Str(s) => Value::Str(Arc::clone(s)),
            other => Value::from(other.to_string()),
        }),
        "int" => arity(1).and_then(|()| match &args[0] {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(x) if x.is_finite() => Ok(Value::Int(x.trunc() as i64)),
            Value::Str(s) => s.trim().parse().map(Value::Int).map_err(|_| {
                ScriptError::runtime(line, format!("invalid integer literal {s:?}"))
            }),
            other => wrong_type(other),
        }),
        "abs" => arity(1).and_then(|()| match &args[0] {
            Value::Int(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ScriptError::runtime(line, "integer overflow")),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => wrong_type(other),
        }),
        "min" | "max" => {
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<&Value> = None;
            for arg in args {
                best = match best {
                    None => Some(arg),
                    Some(current) => match compare(arg, current) {
                        Some(ordering) if ordering == want => Some(arg),
                        Some(_) => Some(current),
                        None => return Some(wrong_type(arg)),
                    },
                };
            }
            best.cloned()
                .ok_or_else(|| ScriptError::runtime(line, format!("{name}() needs at least one argument")))
        }
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use test_case::test_case;

    fn run(source: &str, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let interp = Interpreter::new();
        let module = interp.load("test", source)?;
        interp.call(&module, name, args)
    }

    #[test]
    fn calls_nested_routines() {
        let source = indoc! {"
            base = 10

            def f(x, y):
                g = lambda a: a + base
                def h(b):
                    return b * 2
                return h(g(x)) - y
        "};
        assert_eq!(run(source, "f", vec![1.into(), 2.into()]).unwrap(), Value::Int(20));
    }

    #[test_case("7 / 2", Value::Float(3.5) ; "true division")]
    #[test_case("-7 % 3", Value::Int(2) ; "modulo takes divisor sign")]
    #[test_case("'ab' + 'c'", Value::from("abc") ; "string concatenation")]
    #[test_case("[1] + [2]", Value::List(vec![1.into(), 2.into()]) ; "list concatenation")]
    #[test_case("0 or 'x'", Value::from("x") ; "or returns operand")]
    #[test_case("1 < 2.5 and not None", Value::Bool(true) ; "mixed comparison")]
    #[test_case("len('abc') + abs(-2)", Value::Int(5) ; "builtins")]
    #[test_case("max(1, 4, 2)", Value::Int(4) ; "max")]
    #[test_case("str(1.0)", Value::from("1.0") ; "str of float")]
    fn expressions(expression: &str, expected: Value) {
        let source = format!("def f():\n    return {expression}");
        assert_eq!(run(&source, "f", vec![]).unwrap(), expected);
    }

    #[test]
    fn runtime_errors() {
        let source = indoc! {"
            def f(x):
                assert x
                return 1 / 0
        "};
        assert!(matches!(
            run(source, "f", vec![Value::Bool(false)]),
            Err(ScriptError::Assertion { line: 2 })
        ));
        assert!(matches!(
            run(source, "f", vec![Value::Bool(true)]),
            Err(ScriptError::Runtime { line: 3, .. })
        ));
        assert!(matches!(run(source, "f", vec![]), Err(ScriptError::Arity { .. })));
        assert!(matches!(
            run(source, "g", vec![]),
            Err(ScriptError::UnknownRoutine { .. })
        ));
    }

    #[test]
    fn unbounded_recursion_is_stopped() {
        let source = "def f(x):\n    return f(x)";
        assert!(matches!(
            run(source, "f", vec![1.into()]),
            Err(ScriptError::RecursionLimit(MAX_CALL_DEPTH))
        ));
    }

    #[test]
    fn module_code_populates_globals() {
        let interp = Interpreter::new();
        let module = interp
            .load("m", "def double(x):\n    return x * 2\nanswer = double(21)")
            .unwrap();
        assert_eq!(module.global("answer"), Some(Value::Int(42)));
        assert!(module.routine("double").is_some());
        assert!(module.routine("answer").is_none());
    }

    #[test]
    fn frame_eval_and_exec() {
        let interp = Interpreter::new();
        let module = interp.load("m", "def f(x):\n    return x").unwrap();
        let code = module.function("f").unwrap();
        let mut frame = ScriptFrame::new(&interp, &module, &code, 1);
        frame.locals.insert("x".into(), 2.into());

        frame.exec("y = x * 3; x = y + 1").unwrap();
        assert_eq!(frame.local("x"), Some(Value::Int(7)));
        assert_eq!(frame.eval("x == 7").unwrap(), Value::Bool(true));
        assert!(frame.exec("return 1").is_err());
        assert!(frame.set_line(2).is_err(), "not inside a line event");
    }
}

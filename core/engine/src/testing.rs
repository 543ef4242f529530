//! In-memory host used by the unit tests.

use crate::{
    error::{Error, HostError, MonitorError},
    host::{
        Dispatch, EventHooks, EventKind, EventSet, Frame, Monitor, Routine, RoutineId, RoutineRef,
        Scope,
    },
    instrumenter::Instrumenter,
    value::{Bindings, Value},
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug)]
pub(crate) struct FakeRoutine {
    pub(crate) id: RoutineId,
    pub(crate) name: String,
    pub(crate) first_line: u32,
    pub(crate) source: Option<Arc<[String]>>,
    pub(crate) lines: Vec<u32>,
    pub(crate) nested: Vec<RoutineRef>,
}

impl FakeRoutine {
    pub(crate) fn new(name: &str, first_line: u32, source: &str, lines: &[u32]) -> Self {
        Self {
            id: RoutineId::fresh(),
            name: name.to_owned(),
            first_line,
            source: Some(source.lines().map(str::to_owned).collect()),
            lines: lines.to_vec(),
            nested: Vec::new(),
        }
    }

    pub(crate) fn with_nested(mut self, nested: RoutineRef) -> Self {
        self.nested.push(nested);
        self
    }

    pub(crate) fn into_ref(self) -> RoutineRef {
        Arc::new(self)
    }
}

impl Routine for FakeRoutine {
    fn id(&self) -> RoutineId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn first_line(&self) -> u32 {
        self.first_line
    }
    fn source_lines(&self) -> Option<Arc<[String]>> {
        self.source.clone()
    }
    fn lines(&self) -> &[u32] {
        &self.lines
    }
    fn nested(&self) -> Vec<RoutineRef> {
        self.nested.clone()
    }
}

/// `f(x)` spanning lines 1 to 4, with `return x` on line 4.
pub(crate) fn sample_routine() -> RoutineRef {
    let source = "def f(x):\n    y = x\n    x = y\n    return x";
    FakeRoutine::new("f", 1, source, &[2, 3, 4]).into_ref()
}

/// A frame whose `eval`/`exec` understand literals, names, `==` and `name = atom`.
pub(crate) struct FakeFrame {
    routine: RoutineRef,
    line: u32,
    locals: Bindings,
    retval: Option<Value>,
    pub(crate) syncs: usize,
}

impl FakeFrame {
    pub(crate) fn new(routine: RoutineRef, line: u32) -> Self {
        Self {
            routine,
            line,
            locals: Bindings::new(),
            retval: None,
            syncs: 0,
        }
    }

    pub(crate) fn with_local(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.locals.insert(name.to_owned(), value.into());
        self
    }

    pub(crate) fn returning(mut self, value: Value) -> Self {
        self.retval = Some(value);
        self
    }

    fn atom(&self, text: &str) -> Result<Value, HostError> {
        let text = text.trim();
        match text {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::None),
            _ => text.parse::<i64>().map(Value::Int).or_else(|_| {
                self.locals
                    .get(text)
                    .cloned()
                    .ok_or_else(|| HostError::new(format!("name `{text}` is not defined")))
            }),
        }
    }
}

impl Frame for FakeFrame {
    fn routine(&self) -> &RoutineRef {
        &self.routine
    }

    fn line(&self) -> u32 {
        self.line
    }

    fn set_line(&mut self, line: u32) -> Result<(), HostError> {
        if !self.routine.lines().contains(&line) {
            return Err(HostError::new(format!("line {line} is not a statement")));
        }
        self.line = line;
        Ok(())
    }

    fn local(&self, name: &str) -> Option<Value> {
        self.locals.get(name).cloned()
    }

    fn local_names(&self) -> Vec<String> {
        self.locals.keys().cloned().collect()
    }

    fn set_local(&mut self, name: &str, value: Value) -> Result<(), HostError> {
        self.locals.insert(name.to_owned(), value);
        Ok(())
    }

    fn global(&self, _name: &str) -> Option<Value> {
        None
    }

    fn return_value(&self) -> Option<&Value> {
        self.retval.as_ref()
    }

    fn eval(&mut self, expression: &str) -> Result<Value, HostError> {
        match expression.split_once("==") {
            Some((lhs, rhs)) => Ok(Value::Bool(self.atom(lhs)? == self.atom(rhs)?)),
            None => self.atom(expression),
        }
    }

    fn exec(&mut self, statements: &str) -> Result<(), HostError> {
        for statement in statements.split([';', '\n']).filter(|s| !s.trim().is_empty()) {
            let (name, value) = statement
                .split_once('=')
                .ok_or_else(|| HostError::new(format!("cannot execute `{statement}`")))?;
            let value = self.atom(value)?;
            self.locals.insert(name.trim().to_owned(), value);
        }
        Ok(())
    }

    fn sync_locals(&mut self) -> Result<(), HostError> {
        self.syncs += 1;
        Ok(())
    }
}

/// Records what the instrumenter asks of the host.
#[derive(Default)]
pub(crate) struct FakeMonitor {
    watched: Mutex<FxHashMap<Scope, EventSet>>,
    disabled: Mutex<FxHashSet<(RoutineId, EventKind, u32)>>,
    hooks: Mutex<Option<Weak<dyn EventHooks>>>,
    pub(crate) resyncs: Mutex<usize>,
    /// Runs once, at the start of the next `unwatch`.
    before_unwatch: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeMonitor {
    /// Delivers an event the way a host would. `None` when nothing is watching.
    pub(crate) fn fire(&self, frame: &mut dyn Frame, kind: EventKind) -> Option<Result<Dispatch, Error>> {
        let id = frame.routine().id();
        let site = (id, kind, frame.line());
        let armed = self.watched(Scope::Routine(id)) | self.watched(Scope::Global);
        if !armed.contains(kind.as_set()) || self.disabled.lock().unwrap().contains(&site) {
            return None;
        }
        let hooks = self.hooks.lock().unwrap().as_ref()?.upgrade()?;
        let result = hooks.on_event(frame, kind);
        if let Ok(Dispatch::Disable) = result {
            self.disabled.lock().unwrap().insert(site);
        }
        Some(result)
    }

    pub(crate) fn resync_count(&self) -> usize {
        *self.resyncs.lock().unwrap()
    }

    pub(crate) fn before_next_unwatch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_unwatch.lock().unwrap() = Some(Box::new(hook));
    }
}

impl Monitor for FakeMonitor {
    fn watch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError> {
        *self.watched.lock().unwrap().entry(scope).or_default() |= events;
        Ok(())
    }

    fn unwatch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError> {
        let hook = self.before_unwatch.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let mut watched = self.watched.lock().unwrap();
        if let Some(current) = watched.get_mut(&scope) {
            current.remove(events);
            if current.is_empty() {
                watched.remove(&scope);
            }
        }
        Ok(())
    }

    fn watched(&self, scope: Scope) -> EventSet {
        self.watched
            .lock()
            .unwrap()
            .get(&scope)
            .copied()
            .unwrap_or_default()
    }

    fn resynchronize(&self) -> Result<(), MonitorError> {
        self.disabled.lock().unwrap().clear();
        *self.resyncs.lock().unwrap() += 1;
        Ok(())
    }

    fn register_hooks(&self, _tool: &str, hooks: Weak<dyn EventHooks>) -> Result<(), MonitorError> {
        *self.hooks.lock().unwrap() = Some(hooks);
        Ok(())
    }

    fn check_expression(&self, source: &str) -> Result<(), HostError> {
        let trimmed = source.trim();
        if trimmed.is_empty() || trimmed.ends_with(['=', '+', '-', '*', '/', '<', '>']) {
            return Err(HostError::new("unexpected end of expression"));
        }
        Ok(())
    }
}

pub(crate) fn fake_instrumenter() -> (Arc<Instrumenter>, Arc<FakeMonitor>) {
    let monitor = Arc::new(FakeMonitor::default());
    let instrumenter = Instrumenter::builder()
        .tool_name("test")
        .build(Arc::clone(&monitor) as Arc<dyn Monitor>)
        .unwrap();
    (instrumenter, monitor)
}

//! The registry between handlers and the host monitor.
//!
//! Handlers bound to a routine live in a per-routine entry of a [`DashMap`]; global
//! handlers live in a single bucket behind a [`RwLock`] and are matched against the
//! running routine on every firing. Dispatch copies the matching handlers out of the
//! registry before running any of them, so a callback may submit, remove or fire
//! handlers without deadlocking.
//!
//! Structural changes (submit, deregister, clear) are serialized by one mutex that
//! stays held until the monitor has been told what to watch, so a registry entry
//! always has its event class armed. Dispatch never takes it.

use crate::{
    callback::Callback,
    error::{Error, MonitorError},
    handler::Handler,
    host::{
        Debugger, Dispatch, EventHooks, EventKind, EventSet, Frame, Monitor, Routine, RoutineId,
        Scope,
    },
    resolver::{Anchor, Resolver, Site},
    trigger::{Trigger, TriggerBuilder},
};
use dashmap::DashMap;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
};

/// Tool name used when none is configured.
pub const DEFAULT_TOOL_NAME: &str = "waypoint";

/// Handlers of one scope, grouped by event class and location.
#[derive(Debug, Default)]
struct Buckets {
    /// Line handlers keyed by line; `None` holds the "any line" handlers.
    lines: IndexMap<Option<u32>, Vec<Handler>>,
    start: Vec<Handler>,
    ret: Vec<Handler>,
}

impl Buckets {
    fn bucket_mut(&mut self, kind: EventKind, line: Option<u32>) -> &mut Vec<Handler> {
        match kind {
            EventKind::Line => self.lines.entry(line).or_default(),
            EventKind::Start => &mut self.start,
            EventKind::Return => &mut self.ret,
        }
    }

    /// Appends `handler`; `false` if it is already there.
    fn insert(&mut self, kind: EventKind, line: Option<u32>, handler: &Handler) -> bool {
        let bucket = self.bucket_mut(kind, line);
        if bucket.iter().any(|h| h.ptr_eq(handler)) {
            return false;
        }
        bucket.push(handler.clone());
        true
    }

    /// Drops `handler` everywhere and returns the classes it was registered for.
    fn remove(&mut self, handler: &Handler) -> EventSet {
        let mut touched = EventSet::empty();
        let mut take = |bucket: &mut Vec<Handler>, kind: EventKind| {
            let before = bucket.len();
            bucket.retain(|h| !h.ptr_eq(handler));
            if bucket.len() != before {
                touched |= kind.as_set();
            }
        };
        for bucket in self.lines.values_mut() {
            take(bucket, EventKind::Line);
        }
        take(&mut self.start, EventKind::Start);
        take(&mut self.ret, EventKind::Return);
        self.lines.retain(|_, bucket| !bucket.is_empty());
        touched
    }

    /// Event classes that still have at least one handler.
    fn kinds(&self) -> EventSet {
        let mut kinds = EventSet::empty();
        kinds.set(EventSet::LINE, !self.lines.is_empty());
        kinds.set(EventSet::START, !self.start.is_empty());
        kinds.set(EventSet::RETURN, !self.ret.is_empty());
        kinds
    }

    fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    /// Handlers registered for `kind`; for line events the exact line comes first,
    /// then the "any line" bucket.
    fn collect(&self, kind: EventKind, line: u32, out: &mut Vec<Handler>) {
        match kind {
            EventKind::Line => {
                for key in [Some(line), None] {
                    if let Some(bucket) = self.lines.get(&key) {
                        out.extend(bucket.iter().cloned());
                    }
                }
            }
            EventKind::Start => out.extend(self.start.iter().cloned()),
            EventKind::Return => out.extend(self.ret.iter().cloned()),
        }
    }

    fn handlers(&self) -> impl Iterator<Item = &Handler> {
        self.lines
            .values()
            .flatten()
            .chain(self.start.iter())
            .chain(self.ret.iter())
    }
}

/// Configures an [`Instrumenter`].
#[derive(Default)]
#[must_use]
pub struct InstrumenterBuilder {
    tool: Option<String>,
    debugger: Option<Arc<dyn Debugger>>,
}

impl InstrumenterBuilder {
    /// Name the instrumenter registers under with the monitor.
    pub fn tool_name(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Debugger used by breakpoint callbacks.
    pub fn debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Creates the instrumenter and registers it with `monitor`.
    ///
    /// # Errors
    ///
    /// The monitor refused the registration.
    pub fn build(self, monitor: Arc<dyn Monitor>) -> Result<Arc<Instrumenter>, MonitorError> {
        let instrumenter = Arc::new(Instrumenter {
            tool: self.tool.unwrap_or_else(|| DEFAULT_TOOL_NAME.to_owned()),
            monitor,
            debugger: self.debugger,
            resolver: Resolver::new(),
            routines: DashMap::new(),
            global: RwLock::default(),
            edits: Mutex::new(()),
        });
        let weak = Arc::downgrade(&instrumenter);
        let hooks: Weak<dyn EventHooks> = weak;
        instrumenter
            .monitor
            .register_hooks(&instrumenter.tool, hooks)?;
        log::debug!("instrumenter `{}` registered", instrumenter.tool);
        Ok(instrumenter)
    }
}

impl fmt::Debug for InstrumenterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumenterBuilder")
            .field("tool", &self.tool)
            .field("debugger", &self.debugger.is_some())
            .finish()
    }
}

/// Registry of submitted handlers and the dispatcher the host monitor calls into.
pub struct Instrumenter {
    tool: String,
    monitor: Arc<dyn Monitor>,
    debugger: Option<Arc<dyn Debugger>>,
    resolver: Resolver,
    routines: DashMap<RoutineId, Buckets>,
    global: RwLock<Buckets>,
    edits: Mutex<()>,
}

impl Instrumenter {
    /// Starts configuring an instrumenter.
    pub fn builder() -> InstrumenterBuilder {
        InstrumenterBuilder::default()
    }

    /// The tool name registered with the monitor.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool
    }

    /// The host monitor.
    #[must_use]
    pub fn monitor(&self) -> &dyn Monitor {
        self.monitor.as_ref()
    }

    /// The location resolver and its caches.
    #[must_use]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The debugger breakpoint callbacks hand frames to.
    #[must_use]
    pub fn debugger(&self) -> Option<&Arc<dyn Debugger>> {
        self.debugger.as_ref()
    }

    /// Starts building a trigger on `anchor`.
    pub fn when(&self, anchor: impl Into<Anchor>) -> TriggerBuilder<'_> {
        TriggerBuilder::new(self, anchor.into())
    }

    /// Creates a handler for `trigger` and `callback` and submits it.
    ///
    /// # Errors
    ///
    /// The monitor rejected the registration.
    pub fn attach(self: &Arc<Self>, trigger: Trigger, callback: Callback) -> Result<Handler, Error> {
        let handler = Handler::new(trigger, callback);
        self.submit(&handler)?;
        Ok(handler)
    }

    /// Registers `handler` for every event of its trigger and arms the monitor.
    ///
    /// Watched event classes only grow here; classes other handlers asked for stay.
    ///
    /// # Errors
    ///
    /// The handler was removed or belongs to another instrumenter, or the monitor
    /// rejected the registration.
    pub fn submit(self: &Arc<Self>, handler: &Handler) -> Result<(), Error> {
        let _edits = self.edits();
        handler.bind(self)?;

        let mut watch: Vec<(Scope, EventSet)> = Vec::new();
        for event in handler.trigger().events() {
            let line = match event.site {
                Site::Line(line) => Some(line),
                Site::AnyLine | Site::Deferred(_) | Site::Routine => None,
            };
            let (scope, inserted) = match event.routine_id() {
                Some(id) => {
                    let inserted = self
                        .routines
                        .entry(id)
                        .or_default()
                        .insert(event.kind, line, handler);
                    (Scope::Routine(id), inserted)
                }
                None => {
                    let inserted = self
                        .global
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(event.kind, line, handler);
                    (Scope::Global, inserted)
                }
            };
            if inserted {
                match watch.iter_mut().find(|(s, _)| *s == scope) {
                    Some((_, events)) => *events |= event.kind.as_set(),
                    None => watch.push((scope, event.kind.as_set())),
                }
            }
        }

        for (scope, events) in watch {
            self.monitor.watch(scope, events)?;
        }
        self.monitor.resynchronize()?;
        log::debug!(
            "{} submitted on `{}` ({} events)",
            handler.id(),
            handler.trigger().anchor_name(),
            handler.trigger().events().len()
        );
        Ok(())
    }

    /// Retires `handler`: it is marked removed and dropped from the registry.
    ///
    /// # Errors
    ///
    /// The monitor rejected the deregistration.
    pub fn remove(&self, handler: &Handler) -> Result<(), Error> {
        if handler.is_removed() {
            self.deregister(handler)
        } else {
            handler.remove()
        }
    }

    /// Drops `handler` from every bucket and unwatches event classes left without
    /// handlers.
    pub(crate) fn deregister(&self, handler: &Handler) -> Result<(), Error> {
        let _edits = self.edits();
        let mut unwatch: Vec<(Scope, EventSet)> = Vec::new();

        let ids: FxHashSet<RoutineId> = handler
            .trigger()
            .events()
            .iter()
            .filter_map(|event| event.routine_id())
            .collect();
        for id in ids {
            let Some(mut buckets) = self.routines.get_mut(&id) else {
                continue;
            };
            let touched = buckets.remove(handler);
            let emptied = touched - buckets.kinds();
            let now_empty = buckets.is_empty();
            drop(buckets);
            if now_empty {
                self.routines.remove_if(&id, |_, buckets| buckets.is_empty());
            }
            if !emptied.is_empty() {
                unwatch.push((Scope::Routine(id), emptied));
            }
        }

        if handler.trigger().is_global() {
            let mut global = self.global.write().unwrap_or_else(PoisonError::into_inner);
            let touched = global.remove(handler);
            let emptied = touched - global.kinds();
            if !emptied.is_empty() {
                unwatch.push((Scope::Global, emptied));
            }
        }

        if unwatch.is_empty() {
            return Ok(());
        }
        for (scope, events) in unwatch {
            self.monitor.unwatch(scope, events)?;
        }
        self.monitor.resynchronize()?;
        log::debug!("{} deregistered", handler.id());
        Ok(())
    }

    /// Re-arms every site the monitor stopped delivering.
    ///
    /// # Errors
    ///
    /// The monitor failed to resynchronize.
    pub fn restart_events(&self) -> Result<(), Error> {
        self.monitor.resynchronize()?;
        Ok(())
    }

    /// Unwatches everything, empties the registry and drops resolver caches.
    ///
    /// Handlers are not marked removed; they simply stop being dispatched until
    /// submitted again.
    ///
    /// # Errors
    ///
    /// The monitor rejected an unwatch.
    pub fn clear_all(&self) -> Result<(), Error> {
        let _edits = self.edits();
        let ids: Vec<RoutineId> = self.routines.iter().map(|entry| *entry.key()).collect();
        self.routines.clear();
        for id in ids {
            let scope = Scope::Routine(id);
            self.monitor.unwatch(scope, self.monitor.watched(scope))?;
        }

        *self.global.write().unwrap_or_else(PoisonError::into_inner) = Buckets::default();
        self.monitor
            .unwatch(Scope::Global, self.monitor.watched(Scope::Global))?;

        self.resolver.clear();
        self.monitor.resynchronize()?;
        log::debug!("instrumenter `{}` cleared", self.tool);
        Ok(())
    }

    /// Whether `handler` is currently in the registry.
    #[must_use]
    pub fn is_registered(&self, handler: &Handler) -> bool {
        self.routines
            .iter()
            .any(|entry| entry.handlers().any(|h| h.ptr_eq(handler)))
            || self
                .global
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers()
                .any(|h| h.ptr_eq(handler))
    }

    /// Number of distinct registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        let mut ids = FxHashSet::default();
        for entry in &self.routines {
            ids.extend(entry.handlers().map(Handler::id));
        }
        ids.extend(
            self.global
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers()
                .map(Handler::id),
        );
        ids.len()
    }

    fn edits(&self) -> MutexGuard<'_, ()> {
        self.edits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matching(&self, frame: &dyn Frame, kind: EventKind) -> Vec<Handler> {
        let routine = frame.routine();
        let line = frame.line();
        let mut handlers = Vec::new();

        if let Some(buckets) = self.routines.get(&routine.id()) {
            buckets.collect(kind, line, &mut handlers);
        }

        let mut global = Vec::new();
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collect(kind, line, &mut global);
        handlers.extend(global.into_iter().filter(|handler| {
            kind != EventKind::Line || handler.trigger().has_line_event(&self.resolver, routine, line)
        }));

        let mut seen = FxHashSet::default();
        handlers.retain(|handler| seen.insert(handler.id()));
        handlers
    }
}

impl EventHooks for Instrumenter {
    fn on_event(&self, frame: &mut dyn Frame, kind: EventKind) -> Result<Dispatch, Error> {
        let handlers = self.matching(frame, kind);
        log::trace!(
            "{kind} event in `{}` at line {}: {} handlers",
            frame.routine().name(),
            frame.line(),
            handlers.len()
        );
        if handlers.is_empty() {
            return Ok(Dispatch::Disable);
        }

        let mut live = false;
        for handler in &handlers {
            if handler.is_removed() {
                continue;
            }
            if handler.fire(self, frame)? == Dispatch::Continue {
                live = true;
            }
        }

        Ok(if live {
            Dispatch::Continue
        } else {
            Dispatch::Disable
        })
    }
}

impl fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumenter")
            .field("tool", &self.tool)
            .field("routines", &self.routines.len())
            .field("handlers", &self.handler_count())
            .field("debugger", &self.debugger.is_some())
            .finish_non_exhaustive()
    }
}

//! The interpreter's event monitoring facility.
//!
//! [`Monitoring`] decides whether an event reaches the registered hooks: the event
//! class must be watched for the running routine or globally, and the exact site
//! must not have been disabled by an earlier dispatch. Disabled sites stay silent
//! until [`Monitor::resynchronize`].

use crate::{error::ScriptError, syntax::parse_expression};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    fmt,
    sync::{Mutex, PoisonError, RwLock, Weak},
};
use waypoint_engine::{
    Dispatch, EventHooks, EventKind, EventSet, Frame, HostError, Monitor, MonitorError, RoutineId,
    Scope,
};

#[derive(Debug, Default)]
struct State {
    watched: FxHashMap<Scope, EventSet>,
    disabled: FxHashSet<(RoutineId, EventKind, u32)>,
}

struct Registration {
    tool: String,
    hooks: Weak<dyn EventHooks>,
}

/// Per-interpreter monitoring state.
#[derive(Default)]
pub struct Monitoring {
    state: Mutex<State>,
    registration: RwLock<Option<Registration>>,
}

impl Monitoring {
    /// Creates a monitor that watches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the registered tool, if any.
    #[must_use]
    pub fn tool(&self) -> Option<String> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|registration| registration.tool.clone())
    }

    /// Number of sites currently disabled.
    #[must_use]
    pub fn disabled_sites(&self) -> usize {
        self.state().disabled.len()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn armed(&self, routine: RoutineId, kind: EventKind, line: u32) -> bool {
        let state = self.state();
        let watched = [Scope::Routine(routine), Scope::Global]
            .iter()
            .filter_map(|scope| state.watched.get(scope))
            .fold(EventSet::empty(), |acc, set| acc | *set);
        watched.contains(kind.as_set()) && !state.disabled.contains(&(routine, kind, line))
    }

    /// Delivers an event from the running frame to the registered hooks.
    ///
    /// No lock is held while the hooks run, so handlers may change what is watched.
    ///
    /// # Errors
    ///
    /// A handler failed; the error aborts the running script.
    pub fn deliver(&self, frame: &mut dyn Frame, kind: EventKind) -> Result<(), ScriptError> {
        let routine = frame.routine().id();
        let line = frame.line();
        if !self.armed(routine, kind, line) {
            return Ok(());
        }

        let hooks = self
            .registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|registration| registration.hooks.upgrade());
        let Some(hooks) = hooks else {
            return Ok(());
        };

        if hooks.on_event(frame, kind)? == Dispatch::Disable {
            log::trace!("disabling {kind} events at line {line} of {routine}");
            self.state().disabled.insert((routine, kind, line));
        }
        Ok(())
    }
}

impl Monitor for Monitoring {
    fn watch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError> {
        *self.state().watched.entry(scope).or_default() |= events;
        Ok(())
    }

    fn unwatch(&self, scope: Scope, events: EventSet) -> Result<(), MonitorError> {
        let mut state = self.state();
        if let Some(current) = state.watched.get_mut(&scope) {
            current.remove(events);
            if current.is_empty() {
                state.watched.remove(&scope);
            }
        }
        Ok(())
    }

    fn watched(&self, scope: Scope) -> EventSet {
        self.state().watched.get(&scope).copied().unwrap_or_default()
    }

    fn resynchronize(&self) -> Result<(), MonitorError> {
        self.state().disabled.clear();
        Ok(())
    }

    fn register_hooks(&self, tool: &str, hooks: Weak<dyn EventHooks>) -> Result<(), MonitorError> {
        let mut registration = self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = registration.as_ref()
            && current.hooks.strong_count() > 0
        {
            return Err(MonitorError::new(format!(
                "tool `{}` is already registered",
                current.tool
            )));
        }
        *registration = Some(Registration {
            tool: tool.to_owned(),
            hooks,
        });
        Ok(())
    }

    fn check_expression(&self, source: &str) -> Result<(), HostError> {
        parse_expression(source)?;
        Ok(())
    }
}

impl fmt::Debug for Monitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitoring")
            .field("state", &*self.state())
            .field("tool", &self.tool())
            .finish()
    }
}

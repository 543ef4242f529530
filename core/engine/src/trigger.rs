//! Triggers: resolved locations plus an optional firing condition.

use crate::{
    callback::{Callback, NativeFunction},
    error::{Error, ResolutionError},
    handler::Handler,
    host::{EventKind, Frame, RoutineRef},
    identifier::Identifier,
    instrumenter::Instrumenter,
    resolver::{self, Anchor, Event, Resolver, Site},
    value::Value,
};
use std::sync::Arc;

/// Gate evaluated every time a trigger's location is reached.
#[derive(Debug, Clone)]
pub enum Condition {
    /// An expression evaluated with the frame's bindings.
    Expr(String),
    /// A native function bound to the frame's locals.
    Predicate(NativeFunction),
}

impl From<&str> for Condition {
    fn from(expression: &str) -> Self {
        Self::Expr(expression.to_owned())
    }
}

impl From<String> for Condition {
    fn from(expression: String) -> Self {
        Self::Expr(expression)
    }
}

impl From<NativeFunction> for Condition {
    fn from(predicate: NativeFunction) -> Self {
        Self::Predicate(predicate)
    }
}

/// Answer of [`Trigger::should_fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// Run the callbacks.
    Yes,
    /// Skip this time.
    No,
    /// The condition asked for its handler to be disabled.
    Disable,
}

#[derive(Debug)]
struct Inner {
    anchor: String,
    events: Vec<Event>,
    condition: Option<Condition>,
    is_global: bool,
}

/// An immutable set of resolved events and an optional condition.
#[derive(Debug, Clone)]
pub struct Trigger {
    inner: Arc<Inner>,
}

impl Trigger {
    /// Name of the anchor the trigger was built on.
    #[must_use]
    pub fn anchor_name(&self) -> &str {
        &self.inner.anchor
    }

    /// Resolved events.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.inner.events
    }

    /// The firing condition, if any.
    #[must_use]
    pub fn condition(&self) -> Option<&Condition> {
        self.inner.condition.as_ref()
    }

    /// Returns `true` if the trigger is not bound to a routine.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.inner.is_global
    }

    /// Whether a line event at `line` of `routine` belongs to this global trigger.
    ///
    /// Bound triggers are matched by the registry and always answer `true`.
    #[must_use]
    pub fn has_line_event(&self, resolver: &Resolver, routine: &RoutineRef, line: u32) -> bool {
        if !self.is_global() {
            return true;
        }
        self.events().iter().any(|event| match &event.site {
            Site::AnyLine => event.kind == EventKind::Line,
            Site::Deferred(identifier) => resolver.matches(routine, line, identifier),
            Site::Line(_) | Site::Routine => false,
        })
    }

    /// Evaluates the condition against `frame`.
    ///
    /// Any failure while evaluating reads as [`Fire::No`].
    pub fn should_fire(&self, frame: &mut dyn Frame) -> Fire {
        let result = match self.condition() {
            None => return Fire::Yes,
            Some(Condition::Expr(expression)) => frame.eval(expression).map_err(Error::from),
            Some(Condition::Predicate(predicate)) => predicate.call_in_frame(frame),
        };

        match result {
            Ok(Value::Disable) => Fire::Disable,
            Ok(value) if value.is_truthy() => Fire::Yes,
            Ok(_) => Fire::No,
            Err(err) => {
                log::debug!(
                    "condition on `{}` failed at line {}: {err}",
                    self.anchor_name(),
                    frame.line()
                );
                Fire::No
            }
        }
    }

    /// Submits a handler that executes `source` when the trigger fires.
    ///
    /// # Errors
    ///
    /// The monitor rejected the registration.
    pub fn inject(&self, instrumenter: &Arc<Instrumenter>, source: &str) -> Result<Handler, Error> {
        instrumenter.attach(self.clone(), Callback::inject(source))
    }

    /// Submits a handler that calls `function` when the trigger fires.
    ///
    /// # Errors
    ///
    /// The monitor rejected the registration.
    pub fn invoke(
        &self,
        instrumenter: &Arc<Instrumenter>,
        function: NativeFunction,
    ) -> Result<Handler, Error> {
        instrumenter.attach(self.clone(), Callback::invoke(function))
    }

    /// Submits a handler that jumps to `target` when the trigger fires.
    ///
    /// # Errors
    ///
    /// The monitor rejected the registration.
    pub fn jump(
        &self,
        instrumenter: &Arc<Instrumenter>,
        target: impl Into<Identifier>,
    ) -> Result<Handler, Error> {
        instrumenter.attach(self.clone(), Callback::jump(target))
    }

    /// Submits a handler that breaks into the debugger when the trigger fires.
    ///
    /// # Errors
    ///
    /// The monitor rejected the registration.
    pub fn breakpoint(&self, instrumenter: &Arc<Instrumenter>) -> Result<Handler, Error> {
        instrumenter.attach(self.clone(), Callback::breakpoint())
    }
}

/// Builder returned by [`Instrumenter::when`].
#[derive(Debug)]
#[must_use = "a trigger does nothing until it is built and attached"]
pub struct TriggerBuilder<'a> {
    instrumenter: &'a Instrumenter,
    anchor: Anchor,
    identifiers: Vec<Identifier>,
    condition: Option<Condition>,
    source_hash: Option<String>,
}

impl<'a> TriggerBuilder<'a> {
    pub(crate) fn new(instrumenter: &'a Instrumenter, anchor: Anchor) -> Self {
        Self {
            instrumenter,
            anchor,
            identifiers: Vec::new(),
            condition: None,
            source_hash: None,
        }
    }

    /// Adds a location. Several locations are OR'd.
    pub fn at(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifiers.push(identifier.into());
        self
    }

    /// Sets the firing condition.
    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Requires the anchor's source to still hash to `hash`.
    pub fn source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_hash = Some(hash.into());
        self
    }

    /// Validates the condition and resolves the locations.
    ///
    /// # Errors
    ///
    /// The condition does not parse, the source hash does not match, or a location
    /// cannot be resolved.
    pub fn build(self) -> Result<Trigger, Error> {
        if let Some(Condition::Expr(expression)) = &self.condition {
            self.instrumenter
                .monitor()
                .check_expression(expression)
                .map_err(|e| ResolutionError::InvalidCondition {
                    expression: expression.clone(),
                    reason: e.message().to_owned(),
                })?;
        }

        if let Some(expected) = &self.source_hash {
            resolver::check_source_hash(&self.anchor, expected)?;
        }

        let events = self
            .instrumenter
            .resolver()
            .resolve(&self.anchor, &self.identifiers)?;

        Ok(Trigger {
            inner: Arc::new(Inner {
                anchor: self.anchor.name().to_owned(),
                events,
                condition: self.condition,
                is_global: self.anchor.is_global(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::Routine,
        testing::{FakeFrame, fake_instrumenter, sample_routine},
    };

    #[test]
    fn no_condition_always_fires() {
        let (instrumenter, _) = fake_instrumenter();
        let trigger = instrumenter.when(sample_routine()).at("return x").build().unwrap();
        let mut frame = FakeFrame::new(sample_routine(), 4);
        assert_eq!(trigger.should_fire(&mut frame), Fire::Yes);
    }

    #[test]
    fn expression_condition() {
        let (instrumenter, _) = fake_instrumenter();
        let trigger = instrumenter
            .when(sample_routine())
            .at("return x")
            .condition("x == 1")
            .build()
            .unwrap();

        let mut yes = FakeFrame::new(sample_routine(), 4).with_local("x", 1);
        let mut no = FakeFrame::new(sample_routine(), 4).with_local("x", 2);
        assert_eq!(trigger.should_fire(&mut yes), Fire::Yes);
        assert_eq!(trigger.should_fire(&mut no), Fire::No);
    }

    #[test]
    fn failing_condition_does_not_fire() {
        let (instrumenter, _) = fake_instrumenter();
        let trigger = instrumenter
            .when(sample_routine())
            .at("return x")
            .condition("missing == 1")
            .build()
            .unwrap();
        let mut frame = FakeFrame::new(sample_routine(), 4);
        assert_eq!(trigger.should_fire(&mut frame), Fire::No);
    }

    #[test]
    fn predicate_can_disable() {
        let (instrumenter, _) = fake_instrumenter();
        let off = NativeFunction::new(Vec::<String>::new(), |_| Ok(Value::Disable)).unwrap();
        let trigger = instrumenter
            .when(sample_routine())
            .at("return x")
            .condition(off)
            .build()
            .unwrap();
        let mut frame = FakeFrame::new(sample_routine(), 4);
        assert_eq!(trigger.should_fire(&mut frame), Fire::Disable);
    }

    #[test]
    fn invalid_condition_is_rejected() {
        let (instrumenter, _) = fake_instrumenter();
        let err = instrumenter
            .when(sample_routine())
            .at("return x")
            .condition("x ==")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn source_hash_mismatch_fails_build() {
        let (instrumenter, _) = fake_instrumenter();
        let err = instrumenter
            .when(sample_routine())
            .at("return x")
            .source_hash("0000000000000000")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::SourceHashMismatch { .. })
        ));

        let hash = resolver::source_hash(&Anchor::routine(sample_routine())).unwrap();
        assert!(
            instrumenter
                .when(sample_routine())
                .at("return x")
                .source_hash(hash)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn global_trigger_matches_running_routine() {
        let (instrumenter, _) = fake_instrumenter();
        let trigger = instrumenter.when(Anchor::Global).at("x = y").build().unwrap();
        assert!(trigger.is_global());

        let routine = sample_routine();
        let resolver = instrumenter.resolver();
        assert!(trigger.has_line_event(resolver, &routine, 3));
        assert!(!trigger.has_line_event(resolver, &routine, 4));
        assert_eq!(routine.lines(), &[2, 3, 4]);
    }

    #[test]
    fn global_trigger_rejects_drift_guard() {
        let (instrumenter, _) = fake_instrumenter();
        let err = instrumenter
            .when(Anchor::Global)
            .source_hash("abc")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::GlobalAnchor(_))
        ));
    }
}

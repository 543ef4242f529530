//! Handlers bind one trigger to its callbacks and own their lifecycle.
//!
//! A handler is `active` after creation, may be disabled and re-enabled any number
//! of times, and ends `removed`. Removal is terminal: a removed handler is never
//! invoked again and refuses `enable`/`disable`.

use crate::{
    callback::Callback,
    error::{Error, LifecycleError},
    host::{Dispatch, Frame},
    instrumenter::Instrumenter,
    trigger::{Fire, Trigger},
};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// Identity of a handler, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

struct Inner {
    id: HandlerId,
    trigger: Trigger,
    callbacks: Vec<Callback>,
    disabled: AtomicBool,
    removed: AtomicBool,
    /// The instrumenter the handler was submitted to. `removed` only flips while
    /// this is locked, so a submit and a remove never miss each other.
    instrumenter: Mutex<Option<Weak<Instrumenter>>>,
}

/// Shared handle to a trigger and its ordered callbacks.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<Inner>,
}

impl Handler {
    /// Creates an active handler with a single callback.
    #[must_use]
    pub fn new(trigger: Trigger, callback: Callback) -> Self {
        Self::with_callbacks(trigger, vec![callback])
    }

    /// Creates an active handler running `callbacks` in order.
    #[must_use]
    pub fn with_callbacks(trigger: Trigger, callbacks: Vec<Callback>) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            inner: Arc::new(Inner {
                id: HandlerId(NEXT.fetch_add(1, Ordering::Relaxed)),
                trigger,
                callbacks,
                disabled: AtomicBool::new(false),
                removed: AtomicBool::new(false),
                instrumenter: Mutex::new(None),
            }),
        }
    }

    /// Identity of the handler.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.inner.id
    }

    /// The trigger.
    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    /// The callbacks, in invocation order.
    #[must_use]
    pub fn callbacks(&self) -> &[Callback] {
        &self.inner.callbacks
    }

    /// Returns `true` unless disabled or removed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.inner.disabled.load(Ordering::Acquire) && !self.is_removed()
    }

    /// Returns `true` once [`Handler::remove`] was called.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same handler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Re-enables a disabled handler and re-arms sites the host stopped delivering.
    ///
    /// # Errors
    ///
    /// The handler was removed, or the monitor could not resynchronize.
    pub fn enable(&self) -> Result<(), Error> {
        if self.is_removed() {
            return Err(LifecycleError::EnableRemoved.into());
        }
        if self.inner.disabled.swap(false, Ordering::AcqRel) {
            log::debug!("{} enabled", self.id());
            if let Some(instrumenter) = self.instrumenter() {
                instrumenter.restart_events()?;
            }
        }
        Ok(())
    }

    /// Stops the handler from firing until [`Handler::enable`].
    ///
    /// # Errors
    ///
    /// The handler was removed.
    pub fn disable(&self) -> Result<(), Error> {
        if self.is_removed() {
            return Err(LifecycleError::DisableRemoved.into());
        }
        self.mark_disabled();
        Ok(())
    }

    /// Deregisters the handler. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// The monitor rejected the deregistration.
    pub fn remove(&self) -> Result<(), Error> {
        let instrumenter = {
            let slot = self.slot();
            if self.inner.removed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            slot.as_ref().and_then(Weak::upgrade)
        };
        log::debug!("{} removed", self.id());
        match instrumenter {
            Some(instrumenter) => instrumenter.deregister(self),
            None => Ok(()),
        }
    }

    /// Runs the handler for one firing.
    ///
    /// Returns [`Dispatch::Disable`] whenever the handler ends the firing disabled
    /// or removed.
    ///
    /// # Errors
    ///
    /// A callback failed.
    pub fn fire(&self, instrumenter: &Instrumenter, frame: &mut dyn Frame) -> Result<Dispatch, Error> {
        if self.is_enabled() {
            match self.trigger().should_fire(frame) {
                Fire::Disable => self.mark_disabled(),
                Fire::Yes => {
                    for callback in self.callbacks() {
                        if self.is_removed() {
                            break;
                        }
                        if callback.call(frame, instrumenter)? == Dispatch::Disable {
                            self.mark_disabled();
                        }
                    }
                }
                Fire::No => {}
            }
        }

        Ok(if self.is_enabled() {
            Dispatch::Continue
        } else {
            Dispatch::Disable
        })
    }

    /// Ties the handler to `instrumenter`.
    ///
    /// A handler belongs to one live instrumenter; it may be submitted to it again
    /// but not to another one.
    pub(crate) fn bind(&self, instrumenter: &Arc<Instrumenter>) -> Result<(), LifecycleError> {
        let mut slot = self.slot();
        if self.is_removed() {
            return Err(LifecycleError::SubmitRemoved);
        }
        let bound = slot.as_ref().and_then(Weak::upgrade);
        match bound {
            Some(bound) if !Arc::ptr_eq(&bound, instrumenter) => {
                Err(LifecycleError::ForeignInstrumenter)
            }
            Some(_) => Ok(()),
            None => {
                *slot = Some(Arc::downgrade(instrumenter));
                Ok(())
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Weak<Instrumenter>>> {
        self.inner
            .instrumenter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn instrumenter(&self) -> Option<Arc<Instrumenter>> {
        self.slot().as_ref().and_then(Weak::upgrade)
    }

    fn mark_disabled(&self) {
        if !self.inner.disabled.swap(true, Ordering::AcqRel) {
            log::debug!("{} disabled", self.id());
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.inner.id)
            .field("anchor", &self.trigger().anchor_name())
            .field("callbacks", &self.inner.callbacks.len())
            .field("enabled", &self.is_enabled())
            .field("removed", &self.is_removed())
            .finish()
    }
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Structured cancellation: a one-slot signal/handler pair that threads
//! through nested awaitables and aborts them promptly.
//!
//! The specification sketches the upstream slot as a
//! `Cell<Option<NonNull<dyn CancellationHandler>>>`. This port instead
//! represents a signal's handler cell behind an [`alloc::rc::Rc`] rather
//! than a raw weak pointer: a structured-concurrency tree never forms
//! reference cycles (a child's slot points at its parent's signal, and
//! parents always outlive children), so the extra refcount never needs to
//! become a `Weak`, and an entire class of dangling-pointer bugs is
//! removed from the hardest subsystem in the crate. See `DESIGN.md`.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

/// The action run when a [`CancellationSignal`] fires.
///
/// The specification's `CancellationHandler::cancel()` returns an optional
/// `Runnable` follow-up; in this port that follow-up is realized as a
/// direct call to a stored [`core::task::Waker`] inside the closure body,
/// since waking a task *is* the "post its continuation to the executor"
/// effect the source obtained by returning a `Runnable*`.
pub type CancellationHandler = Box<dyn FnMut()>;

struct Inner {
    handler: RefCell<Option<CancellationHandler>>,
}

/// A settable, single-handler notification channel.
///
/// Owns at most one handler at a time. `emit()` is non-reentrant: it
/// clears the handler cell before invoking the handler, so a handler that
/// calls back into `emit()` on the same signal observes an empty cell.
///
/// `Clone` is a cheap `Rc` bump: the combinators in [`crate::combinators`]
/// keep a clone of each child's signal alongside the slot handed to that
/// child, so that an external cancellation handler (itself `'static` and
/// detached from the combinator's own borrow) can still reach in and
/// `emit()` every child.
#[derive(Clone)]
pub struct CancellationSignal(Rc<Inner>);

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("has_handler", &self.has_handler())
            .finish()
    }
}

impl CancellationSignal {
    /// Creates a new signal with no installed handler.
    #[must_use]
    pub fn new() -> Self {
        CancellationSignal(Rc::new(Inner {
            handler: RefCell::new(None),
        }))
    }

    /// Returns a weak, copyable handle pointing at this signal's handler
    /// cell.
    #[must_use]
    pub fn slot(&self) -> CancellationSlot {
        CancellationSlot(Some(self.0.clone()))
    }

    /// Installs `handler`, replacing any previously installed handler.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if a handler is already installed: the
    /// specification requires at most one handler per signal at any
    /// instant, and a second `install` without an intervening `emit` or
    /// `clear` is a contract violation by the caller.
    pub fn install(&self, handler: CancellationHandler) {
        let mut slot = self.0.handler.borrow_mut();
        debug_assert!(
            slot.is_none(),
            "CancellationSignal::install called with a handler already installed"
        );
        *slot = Some(handler);
    }

    /// Clears the installed handler, if any, without invoking it.
    pub fn clear(&self) {
        self.0.handler.borrow_mut().take();
    }

    /// `true` if a handler is currently installed.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.0.handler.borrow().is_some()
    }

    /// Reads the current handler out of the cell, clears the cell, then
    /// invokes the handler if one was present.
    ///
    /// Emitting a signal with no installed handler is a no-op, including
    /// a second `emit()` while the first handler's `cancel()` logic is
    /// still running (the cell was already cleared by the time a
    /// reentrant `emit()` could observe it).
    pub fn emit(&self) {
        let handler = self.0.handler.borrow_mut().take();
        match handler {
            Some(mut handler) => {
                tracing::trace!("cancellation signal fired, invoking handler");
                handler();
            }
            None => tracing::trace!("cancellation signal fired with no handler installed"),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak, copyable handle pointing at a [`CancellationSignal`]'s handler
/// cell.
///
/// `is_connected()` means the slot points to some signal; `has_handler()`
/// means that signal currently holds a handler.
#[derive(Clone, Default)]
pub struct CancellationSlot(Option<Rc<Inner>>);

impl fmt::Debug for CancellationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSlot")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl CancellationSlot {
    /// A slot that points at no signal.
    #[must_use]
    pub const fn disconnected() -> Self {
        CancellationSlot(None)
    }

    /// `true` if this slot points at a signal.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0.is_some()
    }

    /// `true` if connected and the referenced signal currently holds a
    /// handler.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.0
            .as_ref()
            .is_some_and(|inner| inner.handler.borrow().is_some())
    }

    /// Installs `handler` on the referenced signal, if connected.
    ///
    /// Returns `true` if a handler was installed.
    pub fn install_if_connected(&self, handler: CancellationHandler) -> bool {
        match &self.0 {
            Some(inner) => {
                let mut slot = inner.handler.borrow_mut();
                debug_assert!(slot.is_none());
                *slot = Some(handler);
                true
            }
            None => false,
        }
    }

    /// Clears the referenced signal's handler cell, if connected, without
    /// invoking it.
    pub fn clear_if_connected(&self) {
        if let Some(inner) = &self.0 {
            inner.handler.borrow_mut().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc as StdRc;
    use core::cell::Cell;

    #[test]
    fn emit_with_no_handler_is_noop() {
        let signal = CancellationSignal::new();
        signal.emit(); // must not panic
    }

    #[test]
    fn emit_invokes_handler_exactly_once() {
        let signal = CancellationSignal::new();
        let calls = StdRc::new(Cell::new(0));
        let calls2 = calls.clone();
        signal.install(Box::new(move || calls2.set(calls2.get() + 1)));
        signal.emit();
        signal.emit(); // handler already consumed, must be a no-op
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reentrant_emit_is_noop() {
        let signal = Rc::new(CancellationSignal::new());
        let signal2 = signal.clone();
        let reentrant_calls = StdRc::new(Cell::new(0));
        let reentrant_calls2 = reentrant_calls.clone();
        signal.install(Box::new(move || {
            // Reentrant emit during cancel() must observe an empty cell.
            signal2.emit();
            reentrant_calls2.set(reentrant_calls2.get() + 1);
        }));
        signal.emit();
        assert_eq!(reentrant_calls.get(), 1);
    }

    #[test]
    fn slot_install_and_clear() {
        let signal = CancellationSignal::new();
        let slot = signal.slot();
        assert!(slot.is_connected());
        assert!(!slot.has_handler());
        slot.install_if_connected(Box::new(|| {}));
        assert!(slot.has_handler());
        slot.clear_if_connected();
        assert!(!slot.has_handler());
    }

    #[test]
    fn disconnected_slot_install_is_noop() {
        let slot = CancellationSlot::disconnected();
        assert!(!slot.install_if_connected(Box::new(|| {})));
    }
}

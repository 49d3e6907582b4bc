// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `waitCallback`: a one-shot hand-off slot for external collaborators
//! (drivers, ISR-adjacent code) that complete exactly once and cannot
//! otherwise participate in the await protocol.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::{ErrorCode, Outcome};

enum State<T> {
    Empty,
    Waiting(Waker),
    Ready(T),
    Cancelled,
}

/// A slot a single external service completes at most once.
///
/// `CallbackSlot` is the specification's `waitCallback(service)` "service":
/// the driver holds (or is handed) a `CallbackSlot<T>` and calls
/// [`CallbackSlot::complete`] from wherever it learns the result, while a
/// task suspends on [`wait`].
pub struct CallbackSlot<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CallbackSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        CallbackSlot {
            state: Rc::new(RefCell::new(State::Empty)),
        }
    }

    /// Delivers `value` to the parked waiter, if any.
    ///
    /// A slot completes at most once: calling this again after a prior
    /// `complete` (or after the waiter cancelled) is a no-op.
    pub fn complete(&self, value: T) {
        let mut state = self.state.borrow_mut();
        match &*state {
            State::Empty => *state = State::Ready(value),
            State::Waiting(_) => {
                let State::Waiting(waker) = core::mem::replace(&mut *state, State::Ready(value))
                else {
                    unreachable!()
                };
                drop(state);
                waker.wake();
            }
            State::Ready(_) | State::Cancelled => {}
        }
    }

    /// Returns a cancellable awaitable that resolves once [`complete`] is
    /// called.
    ///
    /// [`complete`]: CallbackSlot::complete
    #[must_use]
    pub fn wait(slot: &CallbackSlot<T>) -> WaitCallback<T> {
        WaitCallback {
            state: slot.state.clone(),
            upstream: CancellationSlot::disconnected(),
        }
    }
}

/// The cancellable awaitable produced by [`CallbackSlot::wait`].
#[pin_project(PinnedDrop)]
pub struct WaitCallback<T> {
    state: Rc<RefCell<State<T>>>,
    upstream: CancellationSlot,
}

impl<T> Future for WaitCallback<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut state = this.state.borrow_mut();
        match &*state {
            State::Ready(_) => {
                let State::Ready(value) = core::mem::replace(&mut *state, State::Cancelled) else {
                    unreachable!()
                };
                drop(state);
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Success(value))
            }
            State::Cancelled => {
                drop(state);
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
            State::Empty | State::Waiting(_) => {
                *state = State::Waiting(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T: 'static> CancellableAwaitable for WaitCallback<T> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        let state = this.state.clone();
        slot.install_if_connected(alloc::boxed::Box::new(move || {
            let mut guard = state.borrow_mut();
            if matches!(&*guard, State::Waiting(_)) {
                let State::Waiting(waker) = core::mem::replace(&mut *guard, State::Cancelled)
                else {
                    unreachable!()
                };
                drop(guard);
                waker.wake();
            } else if matches!(&*guard, State::Empty) {
                *guard = State::Cancelled;
            }
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<T> PinnedDrop for WaitCallback<T> {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        let mut state = self.state.borrow_mut();
        if matches!(&*state, State::Waiting(_)) {
            *state = State::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;

    #[test]
    fn complete_before_wait_resolves_synchronously() {
        let slot: CallbackSlot<i32> = CallbackSlot::new();
        slot.complete(42);
        let mut w = core::pin::pin!(CallbackSlot::wait(&slot));
        assert_eq!(poll_once(w.as_mut()), Poll::Ready(Outcome::Success(42)));
    }

    #[test]
    fn wait_then_complete_wakes() {
        let slot: CallbackSlot<i32> = CallbackSlot::new();
        let mut w = core::pin::pin!(CallbackSlot::wait(&slot));
        assert_eq!(poll_once(w.as_mut()), Poll::Pending);
        slot.complete(7);
        assert_eq!(poll_once(w.as_mut()), Poll::Ready(Outcome::Success(7)));
    }

    #[test]
    fn dropping_parked_waiter_marks_slot_cancelled() {
        let slot: CallbackSlot<i32> = CallbackSlot::new();
        {
            let mut w = core::pin::pin!(CallbackSlot::wait(&slot));
            assert_eq!(poll_once(w.as_mut()), Poll::Pending);
        }
        slot.complete(1); // no-op: slot already cancelled by the dropped waiter
        let mut w2 = core::pin::pin!(CallbackSlot::wait(&slot));
        assert_eq!(
            poll_once(w2.as_mut()),
            Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
        );
    }
}

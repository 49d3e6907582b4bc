// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `Event`: a clear/set latch with FIFO cancellable waiters.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::{ErrorCode, Outcome};

struct WaiterShared {
    woken: Cell<bool>,
    cancelled: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// A clear/set latch. Waiters parked on [`wait`] resume in FIFO order
/// when the event is set or fired.
///
/// `Event` is meant to be shared via `Rc<Event>` by every task that
/// waits on it.
pub struct Event {
    is_set: Cell<bool>,
    waiters: RefCell<VecDeque<Rc<WaiterShared>>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Creates a clear (unset) event.
    #[must_use]
    pub fn new() -> Self {
        Event {
            is_set: Cell::new(false),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// `true` if the event is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.is_set.get()
    }

    /// Latches the event and wakes every currently parked waiter; they
    /// resume with success.
    pub fn set(&self) {
        self.is_set.set(true);
        self.wake_all_parked();
    }

    /// Unlatches the event without waking anyone.
    pub fn clear(&self) {
        self.is_set.set(false);
    }

    /// Wakes every currently parked waiter without changing the latch
    /// state.
    pub fn fire_once(&self) {
        self.wake_all_parked();
    }

    fn wake_all_parked(&self) {
        let mut waiters = self.waiters.borrow_mut();
        tracing::trace!(parked = waiters.len(), "event: waking parked waiters");
        for waiter in waiters.drain(..) {
            waiter.woken.set(true);
            if let Some(waker) = waiter.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }

    /// Returns a cancellable awaitable that completes as soon as the
    /// event is set (synchronously, if already set) or fired.
    #[must_use]
    pub fn wait(event: &Rc<Event>) -> Wait {
        Wait {
            event: event.clone(),
            waiter: None,
            upstream: CancellationSlot::disconnected(),
        }
    }
}

/// The cancellable awaitable produced by [`Event::wait`].
#[pin_project(PinnedDrop)]
pub struct Wait {
    event: Rc<Event>,
    waiter: Option<Rc<WaiterShared>>,
    upstream: CancellationSlot,
}

impl Future for Wait {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.waiter.is_none() {
            if this.event.is_set() {
                this.upstream.clear_if_connected();
                return Poll::Ready(Outcome::Success(()));
            }
            let waiter = Rc::new(WaiterShared {
                woken: Cell::new(false),
                cancelled: Cell::new(false),
                waker: RefCell::new(Some(cx.waker().clone())),
            });
            this.event.waiters.borrow_mut().push_back(waiter.clone());

            let upstream_for_handler = this.upstream.clone();
            let waiter_for_handler = waiter.clone();
            let event_for_handler = this.event.clone();
            this.upstream.install_if_connected(alloc::boxed::Box::new(move || {
                if !waiter_for_handler.woken.get() {
                    event_for_handler
                        .waiters
                        .borrow_mut()
                        .retain(|w| !Rc::ptr_eq(w, &waiter_for_handler));
                    waiter_for_handler.woken.set(true);
                    waiter_for_handler.cancelled.set(true);
                    upstream_for_handler.clear_if_connected();
                    if let Some(waker) = waiter_for_handler.waker.borrow_mut().take() {
                        waker.wake();
                    }
                }
            }));
            *this.waiter = Some(waiter);
            return Poll::Pending;
        }

        let waiter = this.waiter.as_ref().expect("checked above");
        if waiter.woken.get() {
            this.upstream.clear_if_connected();
            if waiter.cancelled.get() {
                return Poll::Ready(Outcome::Err(ErrorCode::Cancelled));
            }
            return Poll::Ready(Outcome::Success(()));
        }
        *waiter.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl CancellableAwaitable for Wait {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl PinnedDrop for Wait {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if let Some(waiter) = &self.waiter {
            self.event
                .waiters
                .borrow_mut()
                .retain(|w| !Rc::ptr_eq(w, waiter));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;

    #[test]
    fn wait_on_set_event_completes_synchronously() {
        let event = Rc::new(Event::new());
        event.set();
        let mut w = core::pin::pin!(Event::wait(&event));
        assert_eq!(poll_once(w.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn parked_waiters_resume_in_fifo_order_on_set() {
        let event = Rc::new(Event::new());
        let mut a = core::pin::pin!(Event::wait(&event));
        let mut b = core::pin::pin!(Event::wait(&event));
        assert_eq!(poll_once(a.as_mut()), Poll::Pending);
        assert_eq!(poll_once(b.as_mut()), Poll::Pending);
        event.set();
        assert_eq!(poll_once(a.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(poll_once(b.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn clear_does_not_wake() {
        let event = Rc::new(Event::new());
        let mut w = core::pin::pin!(Event::wait(&event));
        assert_eq!(poll_once(w.as_mut()), Poll::Pending);
        event.clear();
        assert_eq!(poll_once(w.as_mut()), Poll::Pending);
    }
}

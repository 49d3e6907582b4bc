// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `Semaphore`: a counting permit pool with cancellable `acquire()` and a
//! non-suspending `release()` that hands permits directly to parked
//! waiters.

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

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaiterState {
    Pending,
    Granted,
    Cancelled,
}

struct Waiter {
    state: Cell<WaiterState>,
    waker: RefCell<Option<Waker>>,
}

/// A counting semaphore. `release()` never suspends: if a waiter is
/// parked, the released permit is handed to it directly rather than
/// being added back to the count, so the count and the waiter queue are
/// never both non-empty at once.
pub struct Semaphore {
    count: Cell<usize>,
    waiters: RefCell<VecDeque<Rc<Waiter>>>,
}

impl Semaphore {
    /// Creates a semaphore with `permits` available permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Semaphore {
            count: Cell::new(permits),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Number of permits currently available without parking.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.count.get()
    }

    /// Attempts to acquire a permit without suspending.
    pub fn try_acquire(&self) -> bool {
        if self.count.get() > 0 {
            self.count.set(self.count.get() - 1);
            true
        } else {
            false
        }
    }

    /// Returns a cancellable awaitable that resolves once a permit has
    /// been acquired.
    #[must_use]
    pub fn acquire(semaphore: &Rc<Semaphore>) -> Acquire {
        Acquire {
            semaphore: semaphore.clone(),
            waiter: None,
            upstream: CancellationSlot::disconnected(),
        }
    }

    /// Releases one permit. If a waiter is parked, ownership passes to
    /// the oldest live one directly; otherwise the count is incremented.
    pub fn release(&self) {
        loop {
            let Some(next) = self.waiters.borrow_mut().pop_front() else {
                self.count.set(self.count.get() + 1);
                return;
            };
            if next.state.get() == WaiterState::Cancelled {
                continue;
            }
            next.state.set(WaiterState::Granted);
            if let Some(waker) = next.waker.borrow_mut().take() {
                waker.wake();
            }
            return;
        }
    }
}

/// The cancellable awaitable produced by [`Semaphore::acquire`].
#[pin_project(PinnedDrop)]
pub struct Acquire {
    semaphore: Rc<Semaphore>,
    waiter: Option<Rc<Waiter>>,
    upstream: CancellationSlot,
}

impl Future for Acquire {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.waiter.is_none() {
            if this.semaphore.try_acquire() {
                this.upstream.clear_if_connected();
                return Poll::Ready(Outcome::Success(()));
            }
            let waiter = Rc::new(Waiter {
                state: Cell::new(WaiterState::Pending),
                waker: RefCell::new(Some(cx.waker().clone())),
            });
            this.semaphore
                .waiters
                .borrow_mut()
                .push_back(waiter.clone());

            let waiter_for_handler = waiter.clone();
            let upstream_for_handler = this.upstream.clone();
            this.upstream.install_if_connected(alloc::boxed::Box::new(move || {
                if waiter_for_handler.state.get() == WaiterState::Pending {
                    waiter_for_handler.state.set(WaiterState::Cancelled);
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
        match waiter.state.get() {
            WaiterState::Pending => {
                *waiter.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
            WaiterState::Granted => {
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Success(()))
            }
            WaiterState::Cancelled => {
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
        }
    }
}

impl CancellableAwaitable for Acquire {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl PinnedDrop for Acquire {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if let Some(waiter) = &self.waiter {
            if waiter.state.get() == WaiterState::Pending {
                waiter.state.set(WaiterState::Cancelled);
            }
            self.semaphore
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
    fn try_acquire_drains_permits() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn release_hands_off_to_parked_waiter_without_touching_count() {
        let sem = Rc::new(Semaphore::new(0));
        let mut a = core::pin::pin!(Semaphore::acquire(&sem));
        let mut b = core::pin::pin!(Semaphore::acquire(&sem));
        assert_eq!(poll_once(a.as_mut()), Poll::Pending);
        assert_eq!(poll_once(b.as_mut()), Poll::Pending);

        sem.release();
        assert_eq!(poll_once(a.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(poll_once(b.as_mut()), Poll::Pending);
        assert_eq!(sem.available_permits(), 0);

        sem.release();
        assert_eq!(poll_once(b.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn cancelled_waiter_is_skipped_on_release() {
        let sem = Rc::new(Semaphore::new(0));
        let mut a = core::pin::pin!(Semaphore::acquire(&sem));
        assert_eq!(poll_once(a.as_mut()), Poll::Pending);
        drop(a);

        sem.release();
        assert_eq!(sem.available_permits(), 1);
    }
}

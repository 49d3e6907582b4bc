// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `Mutex`/`LockGuard`: FIFO hand-off mutual exclusion with no unlocked
//! intermediate state between a release and the next acquire.

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

/// A mutual-exclusion lock with FIFO waiter ordering.
///
/// `Mutex` has no unlocked intermediate state on hand-off: releasing the
/// lock with a waiter present transfers ownership to that waiter
/// directly, without another task ever observing the lock as free in
/// between.
pub struct Mutex {
    locked: Cell<bool>,
    waiters: RefCell<VecDeque<Rc<Waiter>>>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Mutex {
            locked: Cell::new(false),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Attempts to acquire the lock without suspending.
    ///
    /// Returns `None` if already locked.
    pub fn try_lock(self: &Rc<Self>) -> Option<LockGuard> {
        if self.locked.get() {
            None
        } else {
            self.locked.set(true);
            Some(LockGuard {
                mutex: self.clone(),
            })
        }
    }

    /// Returns a cancellable awaitable that resolves to a [`LockGuard`]
    /// once the lock is acquired.
    #[must_use]
    pub fn lock(mutex: &Rc<Mutex>) -> Lock {
        Lock {
            mutex: mutex.clone(),
            waiter: None,
            upstream: CancellationSlot::disconnected(),
        }
    }

    fn unlock(&self) {
        loop {
            let Some(next) = self.waiters.borrow_mut().pop_front() else {
                self.locked.set(false);
                return;
            };
            if next.state.get() == WaiterState::Cancelled {
                // Already cancelled while parked; keep looking for a
                // live waiter to hand off to.
                continue;
            }
            next.state.set(WaiterState::Granted);
            tracing::trace!("mutex: handing off to next waiter");
            if let Some(waker) = next.waker.borrow_mut().take() {
                waker.wake();
            }
            return;
        }
    }
}

/// An owning guard over a held [`Mutex`]. Dropping it (or calling
/// [`LockGuard::unlock`] explicitly) releases the lock and wakes at most
/// one waiter.
pub struct LockGuard {
    mutex: Rc<Mutex>,
}

impl core::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockGuard").finish()
    }
}

impl PartialEq for LockGuard {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.mutex, &other.mutex)
    }
}

impl LockGuard {
    /// Releases the lock explicitly, equivalent to dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// The cancellable awaitable produced by [`Mutex::lock`].
#[pin_project(PinnedDrop)]
pub struct Lock {
    mutex: Rc<Mutex>,
    waiter: Option<Rc<Waiter>>,
    upstream: CancellationSlot,
}

impl Future for Lock {
    type Output = Outcome<LockGuard>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.waiter.is_none() {
            if let Some(guard) = this.mutex.try_lock() {
                this.upstream.clear_if_connected();
                return Poll::Ready(Outcome::Success(guard));
            }
            let waiter = Rc::new(Waiter {
                state: Cell::new(WaiterState::Pending),
                waker: RefCell::new(Some(cx.waker().clone())),
            });
            this.mutex.waiters.borrow_mut().push_back(waiter.clone());

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
                Poll::Ready(Outcome::Success(LockGuard {
                    mutex: this.mutex.clone(),
                }))
            }
            WaiterState::Cancelled => {
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
        }
    }
}

impl CancellableAwaitable for Lock {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl PinnedDrop for Lock {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if let Some(waiter) = &self.waiter {
            if waiter.state.get() == WaiterState::Pending {
                waiter.state.set(WaiterState::Cancelled);
            }
            self.mutex
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
    fn try_lock_then_contend() {
        let mutex = Rc::new(Mutex::new());
        let guard = mutex.try_lock().expect("should acquire uncontended");
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    // S2 — mutex hand-off: three lockers, FIFO order of grant.
    #[test]
    fn fifo_hand_off_across_three_waiters() {
        let mutex = Rc::new(Mutex::new());
        let guard = mutex.try_lock().unwrap();

        let mut a = core::pin::pin!(Mutex::lock(&mutex));
        let mut b = core::pin::pin!(Mutex::lock(&mutex));
        let mut c = core::pin::pin!(Mutex::lock(&mutex));
        assert_eq!(poll_once(a.as_mut()), Poll::Pending);
        assert_eq!(poll_once(b.as_mut()), Poll::Pending);
        assert_eq!(poll_once(c.as_mut()), Poll::Pending);

        drop(guard);
        let guard_a = match poll_once(a.as_mut()) {
            Poll::Ready(Outcome::Success(g)) => g,
            _ => panic!("expected A to acquire"),
        };
        assert_eq!(poll_once(b.as_mut()), Poll::Pending);

        drop(guard_a);
        let guard_b = match poll_once(b.as_mut()) {
            Poll::Ready(Outcome::Success(g)) => g,
            _ => panic!("expected B to acquire"),
        };
        assert_eq!(poll_once(c.as_mut()), Poll::Pending);

        drop(guard_b);
        assert!(matches!(poll_once(c.as_mut()), Poll::Ready(Outcome::Success(_))));
    }
}

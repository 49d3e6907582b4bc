// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `TimerService`: a deadline-ordered priority queue driving cancellable
//! delays, and the [`wait`] awaitable built on top of it.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BinaryHeap};
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::cmp::Reverse;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use core::time::Duration;

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::{ErrorCode, Outcome};
use crate::executor::Executor;
use crate::runnable::{FnRunnable, Runnable};
use crate::time::{Clock, Instant};

/// An opaque handle to a registered [`TimerEntry`], used to cancel it
/// before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

/// A deadline-ordered priority queue of pending [`Runnable`]s.
///
/// `tick()` pops and posts to the executor every entry whose deadline has
/// passed. Removal is lazy: a cancelled entry is dropped from the
/// id-indexed map immediately, but its stale slot in the heap is only
/// discarded when it would otherwise be popped.
pub struct TimerService {
    capacity: usize,
    next_id: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<(Instant, u64)>>>,
    entries: RefCell<BTreeMap<u64, Box<dyn Runnable>>>,
}

impl TimerService {
    /// Creates a timer service that rejects registration once `capacity`
    /// entries are pending.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        TimerService {
            capacity,
            next_id: Cell::new(0),
            heap: RefCell::new(BinaryHeap::new()),
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    /// Number of pending (not yet fired, not yet cancelled) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// `true` if no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Registers `runnable` to be posted to the executor at `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Exhausted`] if the queue is already at
    /// capacity.
    pub fn register(
        &self,
        deadline: Instant,
        runnable: Box<dyn Runnable>,
    ) -> Result<TimerHandle, ErrorCode> {
        if self.entries.borrow().len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "timer queue exhausted");
            return Err(ErrorCode::Exhausted);
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().insert(id, runnable);
        self.heap.borrow_mut().push(Reverse((deadline, id)));
        tracing::trace!(id, ?deadline, "registered timer entry");
        Ok(TimerHandle(id))
    }

    /// Removes a registered entry before it fires.
    ///
    /// Returns `true` if the entry was still pending and has been
    /// removed without running; returns `false` if it has already fired
    /// (or was never registered) — the caller must treat `false` as "the
    /// timer won the race".
    pub fn remove(&self, handle: TimerHandle) -> bool {
        self.entries.borrow_mut().remove(&handle.0).is_some()
    }

    /// Returns the earliest pending deadline, or [`Instant::MAX`] if
    /// empty.
    #[must_use]
    pub fn wake_at(&self) -> Instant {
        self.peel_stale();
        self.heap
            .borrow()
            .peek()
            .map_or(Instant::MAX, |Reverse((deadline, _))| *deadline)
    }

    fn peel_stale(&self) {
        loop {
            let top_id = self.heap.borrow().peek().map(|Reverse((_, id))| *id);
            match top_id {
                Some(id) if !self.entries.borrow().contains_key(&id) => {
                    self.heap.borrow_mut().pop();
                }
                _ => break,
            }
        }
    }

    /// Pops and posts to `executor` every entry whose deadline is `<= now`.
    pub fn tick(&self, now: Instant, executor: &Executor) {
        loop {
            self.peel_stale();
            let due = self
                .heap
                .borrow()
                .peek()
                .is_some_and(|Reverse((deadline, _))| *deadline <= now);
            if !due {
                break;
            }
            let Reverse((_, id)) = self.heap.borrow_mut().pop().expect("checked non-empty above");
            if let Some(runnable) = self.entries.borrow_mut().remove(&id) {
                tracing::trace!(id, ?now, "timer entry fired");
                executor.post(runnable);
            }
        }
    }
}

struct WaitShared {
    waker: RefCell<Option<Waker>>,
    fired: Cell<bool>,
    cancelled: Cell<bool>,
    handle: Cell<Option<TimerHandle>>,
}

enum WaitState {
    NotStarted { deadline: Instant },
    Immediate,
    Registered,
}

/// The cancellable awaitable produced by [`wait`].
#[pin_project(PinnedDrop)]
pub struct Wait {
    state: WaitState,
    timer: Rc<TimerService>,
    shared: Rc<WaitShared>,
    upstream: CancellationSlot,
}

/// Suspends the calling task until `clock.now() + duration`.
///
/// Registers a [`TimerEntry`](TimerHandle) with `timer`. If cancelled
/// while pending, it attempts to remove the entry: removal succeeding
/// means the wait is reported as `Cancelled`; removal failing means the
/// timer had already fired, so the wait is reported as a success (the
/// timer wins the race). `duration == Duration::ZERO` resolves on the
/// first poll without registering anything.
pub fn wait(timer: &Rc<TimerService>, clock: &dyn Clock, duration: Duration) -> Wait {
    let deadline = clock.now() + duration;
    let state = if duration.is_zero() {
        WaitState::Immediate
    } else {
        WaitState::NotStarted { deadline }
    };
    Wait {
        state,
        timer: timer.clone(),
        shared: Rc::new(WaitShared {
            waker: RefCell::new(None),
            fired: Cell::new(false),
            cancelled: Cell::new(false),
            handle: Cell::new(None),
        }),
        upstream: CancellationSlot::disconnected(),
    }
}

impl Future for Wait {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let WaitState::NotStarted { deadline } = *this.state {
            let shared = this.shared.clone();
            let timer_for_handler = this.timer.clone();
            let shared_for_handler = shared.clone();
            let handler = alloc::boxed::Box::new(move || {
                if let Some(handle) = shared_for_handler.handle.take() {
                    if timer_for_handler.remove(handle) {
                        shared_for_handler.cancelled.set(true);
                    } else {
                        shared_for_handler.fired.set(true);
                    }
                } else {
                    shared_for_handler.cancelled.set(true);
                }
                if let Some(waker) = shared_for_handler.waker.borrow_mut().take() {
                    waker.wake();
                }
            });
            this.upstream.install_if_connected(handler);

            let fire_shared = shared.clone();
            let runnable = FnRunnable::new(move || {
                fire_shared.fired.set(true);
                if let Some(waker) = fire_shared.waker.borrow_mut().take() {
                    waker.wake();
                }
            });
            match this.timer.register(deadline, alloc::boxed::Box::new(runnable)) {
                Ok(handle) => shared.handle.set(Some(handle)),
                Err(code) => {
                    *this.state = WaitState::Registered;
                    return Poll::Ready(Outcome::Err(code));
                }
            }
            *this.state = WaitState::Registered;
        } else if let WaitState::Immediate = *this.state {
            *this.state = WaitState::Registered;
            return Poll::Ready(Outcome::Success(()));
        }

        if this.shared.cancelled.get() {
            return Poll::Ready(Outcome::Err(ErrorCode::Cancelled));
        }
        if this.shared.fired.get() {
            return Poll::Ready(Outcome::Success(()));
        }
        *this.shared.waker.borrow_mut() = Some(cx.waker().clone());
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
        if let Some(handle) = self.shared.handle.take() {
            self.timer.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;
    use crate::time::ManualClock;

    #[test]
    fn zero_duration_resolves_immediately() {
        let timer = Rc::new(TimerService::new(8));
        let clock = ManualClock::new();
        let mut w = core::pin::pin!(wait(&timer, &clock, Duration::ZERO));
        assert_eq!(poll_once(w.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn fires_after_tick_past_deadline() {
        let timer = Rc::new(TimerService::new(8));
        let clock = ManualClock::new();
        let exec = Executor::new();
        let mut w = core::pin::pin!(wait(&timer, &clock, Duration::from_millis(10)));
        assert_eq!(poll_once(w.as_mut()), Poll::Pending);
        clock.advance(Duration::from_millis(15));
        timer.tick(clock.now(), &exec);
        exec.run_until_idle();
        assert_eq!(poll_once(w.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn exhausted_queue_reports_immediately() {
        let timer = Rc::new(TimerService::new(0));
        let clock = ManualClock::new();
        let mut w = core::pin::pin!(wait(&timer, &clock, Duration::from_millis(1)));
        assert_eq!(
            poll_once(w.as_mut()),
            Poll::Ready(Outcome::Err(ErrorCode::Exhausted))
        );
    }
}

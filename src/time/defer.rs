// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `DeferService`: the non-cancellable sibling of [`crate::time::timer`],
//! and the [`defer`] awaitable built on top of it.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BinaryHeap};
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::cmp::Reverse;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use core::time::Duration;

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::Outcome;
use crate::executor::Executor;
use crate::runnable::{FnRunnable, Runnable};
use crate::time::{Clock, Instant};

/// A deadline-ordered queue identical in shape to [`crate::time::timer::TimerService`]
/// but without entry removal: `defer(d)` guarantees at-least-`d` elapsed
/// before resumption and never needs to race a cancellation against the
/// timer firing.
pub struct DeferService {
    next_id: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<(Instant, u64)>>>,
    entries: RefCell<BTreeMap<u64, Box<dyn Runnable>>>,
}

impl Default for DeferService {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferService {
    /// Creates an empty defer service. Unlike [`crate::time::timer::TimerService`]
    /// this has no capacity limit: deferred work is never cancelled
    /// mid-flight, so the specification does not ask for an `Exhausted`
    /// path here.
    #[must_use]
    pub fn new() -> Self {
        DeferService {
            next_id: Cell::new(0),
            heap: RefCell::new(BinaryHeap::new()),
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    /// Number of pending entries.
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
    pub fn register(&self, deadline: Instant, runnable: Box<dyn Runnable>) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().insert(id, runnable);
        self.heap.borrow_mut().push(Reverse((deadline, id)));
    }

    /// Returns the earliest pending deadline, or [`Instant::MAX`] if
    /// empty.
    #[must_use]
    pub fn wake_at(&self) -> Instant {
        self.heap
            .borrow()
            .peek()
            .map_or(Instant::MAX, |Reverse((deadline, _))| *deadline)
    }

    /// Pops and posts to `executor` every entry whose deadline is `<= now`.
    pub fn tick(&self, now: Instant, executor: &Executor) {
        loop {
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
                executor.post(runnable);
            }
        }
    }
}

struct DeferShared {
    waker: RefCell<Option<Waker>>,
    fired: Cell<bool>,
}

/// The non-cancellable awaitable produced by [`defer`].
pub struct Defer {
    registered: bool,
    deadline: Instant,
    immediate: bool,
    defer: Rc<DeferService>,
    shared: Rc<DeferShared>,
}

/// Suspends the calling task until at least `duration` has elapsed,
/// guaranteed non-cancellable: `set_cancellation_slot` is a no-op.
pub fn defer(defer: &Rc<DeferService>, clock: &dyn Clock, duration: Duration) -> Defer {
    Defer {
        registered: false,
        deadline: clock.now() + duration,
        immediate: duration.is_zero(),
        defer: defer.clone(),
        shared: Rc::new(DeferShared {
            waker: RefCell::new(None),
            fired: Cell::new(false),
        }),
    }
}

impl Future for Defer {
    type Output = Outcome<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.immediate {
            return Poll::Ready(Outcome::Success(()));
        }
        if !self.registered {
            self.registered = true;
            let shared = self.shared.clone();
            let runnable = FnRunnable::new(move || {
                shared.fired.set(true);
                if let Some(waker) = shared.waker.borrow_mut().take() {
                    waker.wake();
                }
            });
            self.defer.register(self.deadline, Box::new(runnable));
        }
        if self.shared.fired.get() {
            return Poll::Ready(Outcome::Success(()));
        }
        *self.shared.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl CancellableAwaitable for Defer {
    fn set_cancellation_slot(self: Pin<&mut Self>, _slot: CancellationSlot) {
        // `defer` is explicitly non-cancellable per the specification.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;
    use crate::time::ManualClock;

    #[test]
    fn zero_duration_resolves_immediately() {
        let defer_service = Rc::new(DeferService::new());
        let clock = ManualClock::new();
        let mut d = core::pin::pin!(defer(&defer_service, &clock, Duration::ZERO));
        assert_eq!(poll_once(d.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn fires_after_tick_past_deadline() {
        let defer_service = Rc::new(DeferService::new());
        let clock = ManualClock::new();
        let exec = Executor::new();
        let mut d = core::pin::pin!(defer(&defer_service, &clock, Duration::from_millis(10)));
        assert_eq!(poll_once(d.as_mut()), Poll::Pending);
        clock.advance(Duration::from_millis(10));
        defer_service.tick(clock.now(), &exec);
        exec.run_until_idle();
        assert_eq!(poll_once(d.as_mut()), Poll::Ready(Outcome::Success(())));
    }
}

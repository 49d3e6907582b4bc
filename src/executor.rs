// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The cooperative executor: a strict-FIFO ready queue of [`Runnable`]s.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::Outcome;
use crate::runnable::{self, Runnable};
use crate::time::Instant;

/// A strict-FIFO queue of ready-to-run work, drained cooperatively.
///
/// `tick()` swaps the queue out, drains the swapped-out batch by running
/// each entry's tail-call chain to completion, and only then makes work
/// posted *during* that drain visible to the next `tick()`. This bounds
/// one `tick()` call to the frontier that was ready when it started,
/// exactly as the specification requires: "work appended during `runAll`
/// runs only after the current chain terminates."
pub struct Executor {
    ready: RefCell<VecDeque<Box<dyn Runnable>>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Creates an executor with an empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Executor {
            ready: RefCell::new(VecDeque::new()),
        }
    }

    /// Creates an executor whose ready queue has pre-reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Executor {
            ready: RefCell::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends `runnable` to the back of the ready queue.
    pub fn post(&self, runnable: Box<dyn Runnable>) {
        self.ready.borrow_mut().push_back(runnable);
        tracing::trace!(len = self.len(), "posted runnable");
    }

    /// Number of entries currently in the ready queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ready.borrow().len()
    }

    /// `true` if the ready queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.borrow().is_empty()
    }

    /// Returns `now` if the ready queue is non-empty, else [`Instant::MAX`]
    /// ("never" — there is no executor-driven reason to wake a sleeping
    /// host before then).
    #[must_use]
    pub fn wake_at(&self, now: Instant) -> Instant {
        if self.is_empty() {
            Instant::MAX
        } else {
            now
        }
    }

    /// Drains the current frontier of the ready queue.
    ///
    /// Every entry present at the start of this call is run to the end of
    /// its tail-call chain (`run_chain`). Work posted by those chains is
    /// *not* run in this call — it becomes the next frontier, run by the
    /// next `tick()`. Returns the number of chains started.
    pub fn tick(&self) -> usize {
        let frontier: VecDeque<Box<dyn Runnable>> =
            core::mem::take(&mut *self.ready.borrow_mut());
        let count = frontier.len();
        tracing::trace!(count, "tick: draining frontier");
        for runnable in frontier {
            runnable::run_chain(runnable);
        }
        count
    }

    /// Runs `tick()` until the ready queue is empty.
    ///
    /// Useful in tests and simple hosts where no timer-driven work is
    /// expected to arrive mid-drain; real embedded hosts should prefer a
    /// bounded loop driven by `wake_at`.
    pub fn run_until_idle(&self) {
        while !self.is_empty() {
            self.tick();
        }
    }
}

/// Returns a non-cancellable awaitable that posts the current continuation
/// to `executor` and suspends, resuming on a later `tick()`.
///
/// Preserves FIFO ordering with other work posted to the same executor:
/// the repost goes to the back of the ready queue exactly like any other
/// `post()`.
#[must_use]
pub fn yield_now(executor: &Rc<Executor>) -> Yield {
    Yield {
        executor: executor.clone(),
        posted: false,
    }
}

/// The awaitable produced by [`yield_now`].
pub struct Yield {
    executor: Rc<Executor>,
    posted: bool,
}

impl Future for Yield {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.posted {
            return Poll::Ready(Outcome::Success(()));
        }
        this.posted = true;
        let waker = cx.waker().clone();
        this.executor
            .post(Box::new(runnable::FnRunnable::new(move || waker.wake())));
        Poll::Pending
    }
}

impl CancellableAwaitable for Yield {
    fn set_cancellation_slot(self: Pin<&mut Self>, _slot: CancellationSlot) {
        // yield_now is non-cancellable per the specification.
    }
}

#[cfg(test)]
mod yield_tests {
    use super::*;
    use crate::test_util::poll_once;

    #[test]
    fn yield_now_completes_on_second_poll_after_tick() {
        let exec = Rc::new(Executor::new());
        let mut y = core::pin::pin!(yield_now(&exec));
        assert_eq!(poll_once(y.as_mut()), Poll::Pending);
        assert_eq!(exec.len(), 1);
        exec.tick();
        assert_eq!(poll_once(y.as_mut()), Poll::Ready(Outcome::Success(())));
    }
}

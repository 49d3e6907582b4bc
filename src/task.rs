// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task frame and the await protocol: a suspendable computation with
//! a single upstream cancellation slot and a downstream cancellation
//! signal for whatever it awaits.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::{CancellationHandler, CancellationSignal, CancellationSlot};
use crate::error::{ErrorCode, Outcome};

struct TaskContextInner {
    cancelled: Cell<bool>,
    downstream: CancellationSignal,
    upstream: RefCell<CancellationSlot>,
    waker: RefCell<Option<Waker>>,
}

/// A handle given to a task's body, exposing this task's cancellation
/// state and the means to attach its downstream signal to whatever it
/// awaits.
///
/// This is the Rust realization of the specification's "task frame":
/// rather than a hidden ambient context reachable from anywhere inside a
/// `co_await`-ing function, the body receives this handle explicitly and
/// threads it through its own awaits via [`TaskContext::child`].
#[derive(Clone)]
pub struct TaskContext {
    inner: Rc<TaskContextInner>,
}

impl TaskContext {
    fn new() -> Self {
        TaskContext {
            inner: Rc::new(TaskContextInner {
                cancelled: Cell::new(false),
                downstream: CancellationSignal::new(),
                upstream: RefCell::new(CancellationSlot::disconnected()),
                waker: RefCell::new(None),
            }),
        }
    }

    /// The specification's "cancellation_state" query: whether this task
    /// has been marked cancelled.
    #[must_use]
    pub fn cancellation_state(&self) -> bool {
        self.inner.cancelled.get()
    }

    fn mark_cancelled(&self) {
        tracing::trace!("task marked cancelled");
        self.inner.cancelled.set(true);
        self.inner.downstream.emit();
        if let Some(waker) = self.inner.waker.borrow_mut().take() {
            waker.wake();
        }
    }

    fn make_cancel_handler(&self) -> CancellationHandler {
        let ctx = self.clone();
        alloc::boxed::Box::new(move || ctx.mark_cancelled())
    }

    /// Awaits `awaitable`, first attaching this task's downstream signal
    /// to it so that cancelling this task cancels `awaitable` too.
    ///
    /// If this task is already cancelled, `awaitable` is never polled at
    /// all — the task "skips all subsequent awaits, flowing straight to
    /// its terminal state" — and `Err(Cancelled)` is returned directly.
    pub async fn child<A, T>(&self, awaitable: A) -> Outcome<T>
    where
        A: CancellableAwaitable<Output = Outcome<T>>,
    {
        if self.cancellation_state() {
            return Outcome::Err(ErrorCode::Cancelled);
        }
        let mut awaitable = core::pin::pin!(awaitable);
        awaitable.as_mut().set_cancellation_slot(self.inner.downstream.slot());
        awaitable.await
    }

    /// Returns an RAII guard implementing the specification's
    /// "ignore_cancellation" scope: while held, this task's upstream slot
    /// is detached, so an external cancellation arriving during the scope
    /// is not observed until the guard is dropped, at which point the
    /// handler is reinstalled.
    #[must_use]
    pub fn ignore_cancellation(&self) -> IgnoreCancellationGuard {
        self.inner.upstream.borrow().clear_if_connected();
        IgnoreCancellationGuard { ctx: self.clone() }
    }
}

/// RAII guard returned by [`TaskContext::ignore_cancellation`].
pub struct IgnoreCancellationGuard {
    ctx: TaskContext,
}

impl Drop for IgnoreCancellationGuard {
    fn drop(&mut self) {
        let handler = self.ctx.make_cancel_handler();
        self.ctx.inner.upstream.borrow().install_if_connected(handler);
    }
}

/// A suspendable computation with a single continuation, a result slot
/// and a cancellation slot — the specification's "task frame".
///
/// `Task<F>` is itself a [`CancellableAwaitable`], so tasks compose: one
/// task's body can `ctx.child(other_task).await` another.
#[pin_project(PinnedDrop)]
pub struct Task<F: Future> {
    #[pin]
    inner: F,
    ctx: TaskContext,
}

impl<T, F: Future<Output = Outcome<T>>> Task<F> {
    /// Builds a task whose body is `body(ctx)`, where `ctx` is this
    /// task's own [`TaskContext`].
    pub fn with_context(body: impl FnOnce(TaskContext) -> F) -> Task<F> {
        let ctx = TaskContext::new();
        let inner = body(ctx.clone());
        Task { inner, ctx }
    }

    /// Builds a task directly from a future and a fresh, unattached
    /// context — used when the body does not need `ctx.child`/`ctx.ignore_cancellation`
    /// (e.g. a plain `async {}` block or a primitive awaitable wrapped
    /// directly for spawning).
    pub fn from_future(inner: F) -> Task<F> {
        Task {
            inner,
            ctx: TaskContext::new(),
        }
    }
}

impl<T, F: Future<Output = Outcome<T>>> Future for Task<F> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.ctx.cancellation_state() {
            return Poll::Ready(Outcome::Err(ErrorCode::Cancelled));
        }
        match this.inner.poll(cx) {
            Poll::Ready(v) => {
                this.ctx.inner.upstream.borrow().clear_if_connected();
                Poll::Ready(v)
            }
            Poll::Pending => {
                *this.ctx.inner.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, F: Future<Output = Outcome<T>>> CancellableAwaitable for Task<F> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.ctx.inner.upstream.borrow_mut() = slot.clone();
        let handler = this.ctx.make_cancel_handler();
        slot.install_if_connected(handler);
    }
}

#[pinned_drop]
impl<F: Future> PinnedDrop for Task<F> {
    fn drop(self: Pin<&mut Self>) {
        self.ctx.inner.upstream.borrow().clear_if_connected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;

    fn ready_task(value: i32) -> Task<impl Future<Output = Outcome<i32>>> {
        Task::from_future(async move { Outcome::Success(value) })
    }

    #[test]
    fn completed_task_clears_upstream() {
        let signal = CancellationSignal::new();
        let mut task = core::pin::pin!(ready_task(7));
        task.as_mut().set_cancellation_slot(signal.slot());
        assert!(signal.has_handler());
        assert_eq!(poll_once(task.as_mut()), Poll::Ready(Outcome::Success(7)));
        assert!(!signal.has_handler());
    }

    #[test]
    fn cancellation_before_poll_short_circuits() {
        let signal = CancellationSignal::new();
        let mut task = core::pin::pin!(ready_task(7));
        task.as_mut().set_cancellation_slot(signal.slot());
        signal.emit();
        assert_eq!(
            poll_once(task.as_mut()),
            Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
        );
    }
}

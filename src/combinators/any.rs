// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `any(t1,...,tn)`: the first child to complete triggers cancellation of
//! the rest, but the combinator itself only resumes once every child —
//! winner and cancelled siblings alike — has finished.
//!
//! A child finishing internally and an external cancellation of the `any`
//! itself can race to cancel the same siblings. A shared `cancel_state`
//! distinguishes who actually gets to act — "the winner is whichever ran
//! first; the other is a no-op" — so the remaining children are never
//! emitted twice.
//!
//! The "at least one child completes with `Success`" property only holds
//! when the `any` resolves because a child raced to completion on its own.
//! If the `any` itself is cancelled from outside before any child finishes,
//! every child resolves `Err(Cancelled)` and the combinator still resumes
//! with that all-cancelled tuple — there is no winner to report.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::Cell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::{CancellationSignal, CancellationSlot};
use crate::error::Outcome;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CancelState {
    /// No one has decided to cancel the remaining children yet.
    None,
    /// The `any` itself was cancelled from the outside.
    External,
    /// A child already completed and triggered cancellation of its
    /// siblings.
    Internal,
}

/// Awaits two children. As soon as either completes, the other is
/// cancelled; the combinator resumes once both results are in.
#[pin_project(PinnedDrop)]
pub struct Any2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    #[pin]
    a: A,
    #[pin]
    b: B,
    child_signal_a: CancellationSignal,
    child_signal_b: CancellationSignal,
    result_a: Option<Outcome<RA>>,
    result_b: Option<Outcome<RB>>,
    started: bool,
    cancel_state: Rc<Cell<CancelState>>,
    upstream: CancellationSlot,
}

/// Builds an [`Any2`] over `a` and `b`.
pub fn any2<A, B, RA, RB>(a: A, b: B) -> Any2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    Any2 {
        a,
        b,
        child_signal_a: CancellationSignal::new(),
        child_signal_b: CancellationSignal::new(),
        result_a: None,
        result_b: None,
        started: false,
        cancel_state: Rc::new(Cell::new(CancelState::None)),
        upstream: CancellationSlot::disconnected(),
    }
}

fn trigger_internal_if_first(cancel_state: &Cell<CancelState>) -> bool {
    if cancel_state.get() == CancelState::None {
        cancel_state.set(CancelState::Internal);
        tracing::trace!("any: first completion, cancelling remaining siblings");
        true
    } else {
        false
    }
}

impl<A, B, RA, RB> Future for Any2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    type Output = Outcome<(Outcome<RA>, Outcome<RB>)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        if !*this.started {
            *this.started = true;
            this.a.as_mut().set_cancellation_slot(this.child_signal_a.slot());
            this.b.as_mut().set_cancellation_slot(this.child_signal_b.slot());
        }
        if this.result_a.is_none() {
            if let Poll::Ready(r) = this.a.as_mut().poll(cx) {
                *this.result_a = Some(r);
                if this.result_b.is_none() && trigger_internal_if_first(this.cancel_state) {
                    this.child_signal_b.emit();
                }
            }
        }
        if this.result_b.is_none() {
            if let Poll::Ready(r) = this.b.as_mut().poll(cx) {
                *this.result_b = Some(r);
                if this.result_a.is_none() && trigger_internal_if_first(this.cancel_state) {
                    this.child_signal_a.emit();
                }
            }
        }
        if this.result_a.is_some() && this.result_b.is_some() {
            this.upstream.clear_if_connected();
            Poll::Ready(Outcome::Success((
                this.result_a.take().expect("checked above"),
                this.result_b.take().expect("checked above"),
            )))
        } else {
            Poll::Pending
        }
    }
}

impl<A, B, RA, RB> CancellableAwaitable for Any2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        let sig_a = this.child_signal_a.clone();
        let sig_b = this.child_signal_b.clone();
        let cancel_state = this.cancel_state.clone();
        slot.install_if_connected(Box::new(move || {
            if cancel_state.get() == CancelState::None {
                cancel_state.set(CancelState::External);
                sig_a.emit();
                sig_b.emit();
            }
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<A, B, RA, RB> PinnedDrop for Any2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if self.cancel_state.get() == CancelState::None {
            self.cancel_state.set(CancelState::External);
        }
        if self.result_a.is_none() {
            self.child_signal_a.emit();
        }
        if self.result_b.is_none() {
            self.child_signal_b.emit();
        }
    }
}

/// Awaits three children. As soon as any completes, the remaining two are
/// cancelled; the combinator resumes once all three results are in.
#[pin_project(PinnedDrop)]
pub struct Any3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    #[pin]
    a: A,
    #[pin]
    b: B,
    #[pin]
    c: C,
    child_signal_a: CancellationSignal,
    child_signal_b: CancellationSignal,
    child_signal_c: CancellationSignal,
    result_a: Option<Outcome<RA>>,
    result_b: Option<Outcome<RB>>,
    result_c: Option<Outcome<RC>>,
    started: bool,
    cancel_state: Rc<Cell<CancelState>>,
    upstream: CancellationSlot,
}

/// Builds an [`Any3`] over `a`, `b` and `c`.
pub fn any3<A, B, C, RA, RB, RC>(a: A, b: B, c: C) -> Any3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    Any3 {
        a,
        b,
        c,
        child_signal_a: CancellationSignal::new(),
        child_signal_b: CancellationSignal::new(),
        child_signal_c: CancellationSignal::new(),
        result_a: None,
        result_b: None,
        result_c: None,
        started: false,
        cancel_state: Rc::new(Cell::new(CancelState::None)),
        upstream: CancellationSlot::disconnected(),
    }
}

impl<A, B, C, RA, RB, RC> Future for Any3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    type Output = Outcome<(Outcome<RA>, Outcome<RB>, Outcome<RC>)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        if !*this.started {
            *this.started = true;
            this.a.as_mut().set_cancellation_slot(this.child_signal_a.slot());
            this.b.as_mut().set_cancellation_slot(this.child_signal_b.slot());
            this.c.as_mut().set_cancellation_slot(this.child_signal_c.slot());
        }
        let was_none = this.cancel_state.get() == CancelState::None;
        if this.result_a.is_none() {
            if let Poll::Ready(r) = this.a.as_mut().poll(cx) {
                *this.result_a = Some(r);
                if was_none && trigger_internal_if_first(this.cancel_state) {
                    this.child_signal_b.emit();
                    this.child_signal_c.emit();
                }
            }
        }
        if this.result_b.is_none() {
            if let Poll::Ready(r) = this.b.as_mut().poll(cx) {
                *this.result_b = Some(r);
                if this.cancel_state.get() == CancelState::None
                    && trigger_internal_if_first(this.cancel_state)
                {
                    this.child_signal_a.emit();
                    this.child_signal_c.emit();
                }
            }
        }
        if this.result_c.is_none() {
            if let Poll::Ready(r) = this.c.as_mut().poll(cx) {
                *this.result_c = Some(r);
                if this.cancel_state.get() == CancelState::None
                    && trigger_internal_if_first(this.cancel_state)
                {
                    this.child_signal_a.emit();
                    this.child_signal_b.emit();
                }
            }
        }
        if this.result_a.is_some() && this.result_b.is_some() && this.result_c.is_some() {
            this.upstream.clear_if_connected();
            Poll::Ready(Outcome::Success((
                this.result_a.take().expect("checked above"),
                this.result_b.take().expect("checked above"),
                this.result_c.take().expect("checked above"),
            )))
        } else {
            Poll::Pending
        }
    }
}

impl<A, B, C, RA, RB, RC> CancellableAwaitable for Any3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        let sig_a = this.child_signal_a.clone();
        let sig_b = this.child_signal_b.clone();
        let sig_c = this.child_signal_c.clone();
        let cancel_state = this.cancel_state.clone();
        slot.install_if_connected(Box::new(move || {
            if cancel_state.get() == CancelState::None {
                cancel_state.set(CancelState::External);
                sig_a.emit();
                sig_b.emit();
                sig_c.emit();
            }
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<A, B, C, RA, RB, RC> PinnedDrop for Any3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if self.result_a.is_none() {
            self.child_signal_a.emit();
        }
        if self.result_b.is_none() {
            self.child_signal_b.emit();
        }
        if self.result_c.is_none() {
            self.child_signal_c.emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::task::Task;
    use crate::test_util::poll_once;

    fn ready<T>(value: T) -> Task<impl Future<Output = Outcome<T>>> {
        Task::from_future(async move { Outcome::Success(value) })
    }

    /// A child that only resolves once its cancellation slot fires,
    /// modelling the "loser" of an `any()` race — e.g. `wait(d)` cancelled
    /// by the winner.
    #[pin_project(PinnedDrop)]
    struct NeverUnlessCancelled {
        upstream: CancellationSlot,
    }

    fn never_unless_cancelled() -> NeverUnlessCancelled {
        NeverUnlessCancelled {
            upstream: CancellationSlot::disconnected(),
        }
    }

    impl Future for NeverUnlessCancelled {
        type Output = Outcome<i32>;
        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.upstream.has_handler() || !self.upstream.is_connected() {
                Poll::Pending
            } else {
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
        }
    }

    impl CancellableAwaitable for NeverUnlessCancelled {
        fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
            let this = self.project();
            slot.install_if_connected(Box::new(|| {}));
            *this.upstream = slot;
        }
    }

    #[pinned_drop]
    impl PinnedDrop for NeverUnlessCancelled {
        fn drop(self: Pin<&mut Self>) {
            self.upstream.clear_if_connected();
        }
    }

    #[test]
    fn any2_first_completion_cancels_the_other_then_both_resolve() {
        let mut fut = core::pin::pin!(any2(ready(1), never_unless_cancelled()));
        match poll_once(fut.as_mut()) {
            Poll::Ready(Outcome::Success((Outcome::Success(1), Outcome::Err(ErrorCode::Cancelled)))) => {}
            _ => panic!("expected winner's value alongside the cancelled loser"),
        }
    }

    #[test]
    fn any2_external_cancellation_races_cleanly_with_internal_winner() {
        let signal = CancellationSignal::new();
        let mut fut = core::pin::pin!(any2(ready(1), never_unless_cancelled()));
        fut.as_mut().set_cancellation_slot(signal.slot());
        match poll_once(fut.as_mut()) {
            Poll::Ready(Outcome::Success((Outcome::Success(1), Outcome::Err(ErrorCode::Cancelled)))) => {}
            _ => panic!("expected winner's value alongside the cancelled loser"),
        }
        // Racing in after resolution must be a no-op, not a panic.
        signal.emit();
    }
}

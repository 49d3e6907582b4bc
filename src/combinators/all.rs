// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `all(t1,...,tn)`: waits for every child, propagating external
//! cancellation to all of them and never failing itself — cancelled
//! children simply contribute `Outcome::Err(Cancelled)` to the result
//! tuple.

use alloc::boxed::Box;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::{CancellationSignal, CancellationSlot};
use crate::error::Outcome;

/// Awaits two children, completing with both of their results once both
/// have finished.
#[pin_project(PinnedDrop)]
pub struct All2<A, B, RA, RB>
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
    upstream: CancellationSlot,
}

/// Builds an [`All2`] over `a` and `b`.
pub fn all2<A, B, RA, RB>(a: A, b: B) -> All2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    All2 {
        a,
        b,
        child_signal_a: CancellationSignal::new(),
        child_signal_b: CancellationSignal::new(),
        result_a: None,
        result_b: None,
        started: false,
        upstream: CancellationSlot::disconnected(),
    }
}

impl<A, B, RA, RB> Future for All2<A, B, RA, RB>
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
            }
        }
        if this.result_b.is_none() {
            if let Poll::Ready(r) = this.b.as_mut().poll(cx) {
                *this.result_b = Some(r);
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

impl<A, B, RA, RB> CancellableAwaitable for All2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        let sig_a = this.child_signal_a.clone();
        let sig_b = this.child_signal_b.clone();
        slot.install_if_connected(Box::new(move || {
            sig_a.emit();
            sig_b.emit();
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<A, B, RA, RB> PinnedDrop for All2<A, B, RA, RB>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
{
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        self.child_signal_a.emit();
        self.child_signal_b.emit();
    }
}

/// Awaits three children, completing with all three results once every
/// one has finished.
#[pin_project(PinnedDrop)]
pub struct All3<A, B, C, RA, RB, RC>
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
    upstream: CancellationSlot,
}

/// Builds an [`All3`] over `a`, `b` and `c`.
pub fn all3<A, B, C, RA, RB, RC>(a: A, b: B, c: C) -> All3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    All3 {
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
        upstream: CancellationSlot::disconnected(),
    }
}

impl<A, B, C, RA, RB, RC> Future for All3<A, B, C, RA, RB, RC>
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
        if this.result_a.is_none() {
            if let Poll::Ready(r) = this.a.as_mut().poll(cx) {
                *this.result_a = Some(r);
            }
        }
        if this.result_b.is_none() {
            if let Poll::Ready(r) = this.b.as_mut().poll(cx) {
                *this.result_b = Some(r);
            }
        }
        if this.result_c.is_none() {
            if let Poll::Ready(r) = this.c.as_mut().poll(cx) {
                *this.result_c = Some(r);
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

impl<A, B, C, RA, RB, RC> CancellableAwaitable for All3<A, B, C, RA, RB, RC>
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
        slot.install_if_connected(Box::new(move || {
            sig_a.emit();
            sig_b.emit();
            sig_c.emit();
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<A, B, C, RA, RB, RC> PinnedDrop for All3<A, B, C, RA, RB, RC>
where
    A: CancellableAwaitable<Output = Outcome<RA>>,
    B: CancellableAwaitable<Output = Outcome<RB>>,
    C: CancellableAwaitable<Output = Outcome<RC>>,
{
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        self.child_signal_a.emit();
        self.child_signal_b.emit();
        self.child_signal_c.emit();
    }
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `DynamicScope`: a runtime-sized, homogeneous collection of child
//! awaitables, joined with a single cancellable wait.
//!
//! Unlike [`super::all`]/[`super::any`], the set of children is not known
//! at construction: [`DynamicScope::add`] can be called at any time,
//! including while a [`DynamicScope::join`] is already suspended — "children
//! added during `join()` join the ongoing wait."

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::{CancellationSignal, CancellationSlot};
use crate::error::Outcome;

type ChildFuture = Pin<Box<dyn CancellableAwaitable<Output = Outcome<()>>>>;

struct ChildEntry {
    future: ChildFuture,
    signal: CancellationSignal,
    started: bool,
    done: bool,
}

/// A runtime-sized set of child awaitables, joined with a single
/// cancellable wait.
///
/// Every child is boxed to a common `dyn CancellableAwaitable<Output =
/// Outcome<()>>` trait object, mirroring the specification's "wraps the
/// awaitable in a child task frame" — a dynamic collection cannot be
/// monomorphized the way `all`/`any`'s fixed tuples are.
pub struct DynamicScope {
    children: RefCell<Vec<ChildEntry>>,
    joining: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Default for DynamicScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        DynamicScope {
            children: RefCell::new(Vec::new()),
            joining: Cell::new(false),
            waker: RefCell::new(None),
        }
    }

    /// Number of children not yet completed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.children.borrow().iter().filter(|c| !c.done).count()
    }

    /// Links `awaitable` into the scope.
    ///
    /// If a [`join`](DynamicScope::join) is already suspended, the new
    /// child starts on the very next poll of that join; otherwise it
    /// waits until `join()` is first awaited.
    pub fn add<A>(&self, awaitable: A)
    where
        A: CancellableAwaitable<Output = Outcome<()>> + 'static,
    {
        self.children.borrow_mut().push(ChildEntry {
            future: Box::pin(awaitable),
            signal: CancellationSignal::new(),
            started: false,
            done: false,
        });
        if self.joining.get() {
            if let Some(waker) = self.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }

    /// Returns a cancellable awaitable that starts every linked child (if
    /// not already started) and resumes once every child has completed.
    #[must_use]
    pub fn join(scope: &Rc<DynamicScope>) -> Join {
        Join {
            scope: scope.clone(),
            upstream: CancellationSlot::disconnected(),
        }
    }
}

impl Drop for DynamicScope {
    fn drop(&mut self) {
        debug_assert!(
            !self.joining.get(),
            "DynamicScope dropped while a join() is pending"
        );
        // Remaining children are simply dropped here: each child frame is
        // destroyed without running its continuation, matching the
        // specification's "abandon" path.
    }
}

/// The cancellable awaitable produced by [`DynamicScope::join`].
#[pin_project(PinnedDrop)]
pub struct Join {
    scope: Rc<DynamicScope>,
    upstream: CancellationSlot,
}

impl Future for Join {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.scope.joining.set(true);
        *this.scope.waker.borrow_mut() = Some(cx.waker().clone());

        let mut children = this.scope.children.borrow_mut();
        for child in children.iter_mut() {
            if child.done {
                continue;
            }
            if !child.started {
                child.started = true;
                child.future.as_mut().set_cancellation_slot(child.signal.slot());
            }
            if let Poll::Ready(_) = child.future.as_mut().poll(cx) {
                child.done = true;
            }
        }
        let all_done = children.iter().all(|c| c.done);
        drop(children);

        if all_done {
            this.scope.joining.set(false);
            this.scope.waker.borrow_mut().take();
            this.upstream.clear_if_connected();
            Poll::Ready(Outcome::Success(()))
        } else {
            Poll::Pending
        }
    }
}

impl CancellableAwaitable for Join {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        let scope = this.scope.clone();
        slot.install_if_connected(Box::new(move || {
            for child in scope.children.borrow_mut().iter() {
                if !child.done {
                    child.signal.emit();
                }
            }
        }));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl PinnedDrop for Join {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        self.scope.joining.set(false);
    }
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Test-only helpers shared by this crate's unit and integration tests.
//!
//! Mirrors the teacher's `libs/kasync/src/test_util.rs`: a no-op waker for
//! single-poll assertions, plus a counting waker for tests that need to
//! observe whether a wake actually happened.

use alloc::rc::Rc;
use core::cell::Cell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn no_op(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    RawWaker::new(core::ptr::null(), &VTABLE)
}

/// A [`Waker`] that does nothing when woken.
#[must_use]
pub fn noop_waker() -> Waker {
    // Safety: the vtable's functions satisfy the `Waker` contract (they are
    // callable for the `'static` lifetime of the process and never touch
    // the null data pointer).
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Polls `future` exactly once against a no-op waker and returns the
/// result, for tests that only need to assert `Ready`/`Pending`.
pub fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    future.poll(&mut cx)
}

/// A [`Waker`] that records how many times it has been woken.
#[derive(Clone, Default)]
pub struct CountingWaker(Rc<Cell<u32>>);

impl CountingWaker {
    /// Creates a fresh counting waker at zero.
    #[must_use]
    pub fn new() -> Self {
        CountingWaker(Rc::new(Cell::new(0)))
    }

    /// Number of times `wake`/`wake_by_ref` has been called.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.0.get()
    }

    /// Builds a real [`Waker`] backed by this counter.
    #[must_use]
    pub fn waker(&self) -> Waker {
        fn clone(data: *const ()) -> RawWaker {
            // Safety: `data` was produced by `Rc::into_raw` on a
            // `Cell<u32>` below and this clone keeps the refcount balanced.
            let rc = unsafe { Rc::from_raw(data.cast::<Cell<u32>>()) };
            let cloned = rc.clone();
            core::mem::forget(rc);
            RawWaker::new(Rc::into_raw(cloned).cast(), &VTABLE)
        }
        fn wake(data: *const ()) {
            // Safety: see `clone`.
            let rc = unsafe { Rc::from_raw(data.cast::<Cell<u32>>()) };
            rc.set(rc.get() + 1);
        }
        fn wake_by_ref(data: *const ()) {
            // Safety: see `clone`.
            let rc = unsafe { Rc::from_raw(data.cast::<Cell<u32>>()) };
            rc.set(rc.get() + 1);
            core::mem::forget(rc);
        }
        fn drop_fn(data: *const ()) {
            // Safety: see `clone`.
            unsafe { drop(Rc::from_raw(data.cast::<Cell<u32>>())) };
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_fn);
        let raw = RawWaker::new(Rc::into_raw(self.0.clone()).cast(), &VTABLE);
        // Safety: the vtable above upholds the `Waker` contract via
        // `Rc`-based refcounting over the shared `Cell<u32>`.
        unsafe { Waker::from_raw(raw) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_waker_counts() {
        let cw = CountingWaker::new();
        let waker = cw.waker();
        waker.wake_by_ref();
        waker.wake_by_ref();
        assert_eq!(cw.count(), 2);
    }
}

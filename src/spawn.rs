// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `spawn`: fire-and-forget task launching, plus [`ManualTask`] for
//! stepping a task without an executor.
//!
//! Task frames are heap-allocated. Before a frame is boxed, [`spawn_with`]
//! probes the supplied [`FrameAllocator`] for the frame's layout and
//! immediately releases the probe allocation — on failure this yields
//! `Err(OutOfMemory)` before the task is ever boxed or posted, so a
//! doomed spawn never leaks a partially constructed frame.

use alloc::alloc::{alloc, dealloc};
use alloc::boxed::Box;
use alloc::rc::Rc;
use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::ptr::NonNull;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::error::{ErrorCode, Outcome};
use crate::executor::Executor;
use crate::runnable::Runnable;
use crate::task::Task;

/// Pluggable heap allocator for task frames.
///
/// A stable-Rust restatement of `core::alloc::Allocator`: `try_alloc`
/// returns `None` on failure instead of the nightly trait's `Result`, and
/// `dealloc` carries the same safety contract as
/// [`alloc::alloc::GlobalAlloc::dealloc`] — `ptr` must have been produced
/// by a prior `try_alloc` call on an allocator compatible with this one
/// for the exact same `layout`.
pub trait FrameAllocator {
    /// Attempts to allocate `layout`, returning `None` on failure.
    fn try_alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases an allocation previously returned by `try_alloc`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator's `try_alloc` for
    /// exactly `layout`, and must not have already been deallocated.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default [`FrameAllocator`], backed by the global heap allocator.
pub struct GlobalFrameAllocator;

impl FrameAllocator for GlobalFrameAllocator {
    fn try_alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return NonNull::new(layout.align() as *mut u8);
        }
        // Safety: `layout` has non-zero size, satisfying `alloc`'s contract.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // Safety: caller guarantees `ptr`/`layout` match a prior
            // `try_alloc` on this allocator.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// A [`FrameAllocator`] that always fails, for exercising the
/// out-of-memory path at spawn time (scenario S6) without exhausting real
/// memory.
pub struct FailingFrameAllocator;

impl FrameAllocator for FailingFrameAllocator {
    fn try_alloc(&self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn dealloc(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

struct Shared<F: Future> {
    task: RefCell<Option<Pin<Box<Task<F>>>>>,
    queued: Cell<bool>,
    executor: Rc<Executor>,
}

/// The heap frame a spawned task runs in: a [`Runnable`] that polls the
/// task once per activation and reposts itself to the executor whenever
/// the task's waker fires, until the task completes.
struct SpawnFrame<F: Future>(Rc<Shared<F>>);

fn repost<F: 'static + Future>(shared: &Rc<Shared<F>>)
where
    Task<F>: Future,
{
    if !shared.queued.replace(true) {
        shared.executor.post(Box::new(SpawnFrame(shared.clone())));
    }
}

fn spawn_clone<F: 'static + Future>(data: *const ()) -> RawWaker
where
    Task<F>: Future,
{
    // Safety: `data` was produced by `Rc::into_raw` on a `Shared<F>` below;
    // this clone keeps the refcount balanced against the matching `drop`.
    let rc = unsafe { Rc::from_raw(data.cast::<Shared<F>>()) };
    let cloned = Rc::clone(&rc);
    core::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned).cast(), spawn_vtable::<F>())
}

fn spawn_wake<F: 'static + Future>(data: *const ())
where
    Task<F>: Future,
{
    // Safety: see `spawn_clone`.
    let rc = unsafe { Rc::from_raw(data.cast::<Shared<F>>()) };
    repost(&rc);
}

fn spawn_wake_by_ref<F: 'static + Future>(data: *const ())
where
    Task<F>: Future,
{
    // Safety: see `spawn_clone`.
    let rc = unsafe { Rc::from_raw(data.cast::<Shared<F>>()) };
    repost(&rc);
    core::mem::forget(rc);
}

fn spawn_drop<F: 'static + Future>(data: *const ())
where
    Task<F>: Future,
{
    // Safety: see `spawn_clone`.
    unsafe { drop(Rc::from_raw(data.cast::<Shared<F>>())) };
}

fn spawn_vtable<F: 'static + Future>() -> &'static RawWakerVTable
where
    Task<F>: Future,
{
    // A named `static` here would reference the enclosing function's `F`
    // from an outer item, which the language rejects; a const-promoted
    // temporary has no such restriction.
    &RawWakerVTable::new(
        spawn_clone::<F>,
        spawn_wake::<F>,
        spawn_wake_by_ref::<F>,
        spawn_drop::<F>,
    )
}

fn spawn_waker<F: 'static + Future>(shared: Rc<Shared<F>>) -> Waker
where
    Task<F>: Future,
{
    let raw = RawWaker::new(Rc::into_raw(shared).cast(), spawn_vtable::<F>());
    // Safety: `spawn_vtable::<F>()` upholds the `Waker` contract via
    // `Rc`-based refcounting over `Shared<F>`.
    unsafe { Waker::from_raw(raw) }
}

impl<F: 'static + Future> Runnable for SpawnFrame<F>
where
    Task<F>: Future,
{
    fn run(self: Box<Self>) -> Option<Box<dyn Runnable>> {
        let shared = self.0;
        shared.queued.set(false);
        let Some(mut task) = shared.task.borrow_mut().take() else {
            // A stale repost raced against completion (or a prior run
            // already took and finished the task): nothing to do.
            return None;
        };
        let waker = spawn_waker(shared.clone());
        let mut cx = Context::from_waker(&waker);
        match task.as_mut().poll(&mut cx) {
            Poll::Ready(_) => {}
            Poll::Pending => {
                *shared.task.borrow_mut() = Some(task);
            }
        }
        None
    }
}

/// Spawns `task` onto `executor` using the [`GlobalFrameAllocator`].
///
/// Returns `Err(OutOfMemory)` if the frame allocation probe fails; the
/// task is never boxed or posted in that case.
pub fn spawn<T, F>(executor: &Rc<Executor>, task: Task<F>) -> Outcome<()>
where
    T: 'static,
    F: Future<Output = Outcome<T>> + 'static,
{
    spawn_with(executor, &GlobalFrameAllocator, task)
}

/// Spawns `task` onto `executor`, probing `allocator` for the frame's
/// layout before ever boxing the task.
pub fn spawn_with<T, F>(
    executor: &Rc<Executor>,
    allocator: &dyn FrameAllocator,
    task: Task<F>,
) -> Outcome<()>
where
    T: 'static,
    F: Future<Output = Outcome<T>> + 'static,
{
    let layout = Layout::new::<Shared<F>>();
    match allocator.try_alloc(layout) {
        Some(ptr) => {
            // Safety: `ptr` was just returned by this allocator for
            // exactly `layout`.
            unsafe { allocator.dealloc(ptr, layout) };
        }
        None => {
            tracing::debug!(?layout, "spawn: frame allocation probe failed");
            return Outcome::Err(ErrorCode::OutOfMemory);
        }
    }

    let shared = Rc::new(Shared {
        task: RefCell::new(Some(Box::pin(task))),
        queued: Cell::new(true),
        executor: executor.clone(),
    });
    executor.post(Box::new(SpawnFrame(shared)));
    tracing::trace!("spawned task");
    Outcome::Success(())
}

fn manual_clone(data: *const ()) -> RawWaker {
    // Safety: `data` was produced by `Rc::into_raw` on a `Cell<bool>`
    // below, matching the refcount balance kept by `manual_drop`.
    let rc = unsafe { Rc::from_raw(data.cast::<Cell<bool>>()) };
    let cloned = Rc::clone(&rc);
    core::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned).cast(), &MANUAL_VTABLE)
}

fn manual_wake(data: *const ()) {
    // Safety: see `manual_clone`.
    let rc = unsafe { Rc::from_raw(data.cast::<Cell<bool>>()) };
    rc.set(true);
}

fn manual_wake_by_ref(data: *const ()) {
    // Safety: see `manual_clone`.
    let rc = unsafe { Rc::from_raw(data.cast::<Cell<bool>>()) };
    rc.set(true);
    core::mem::forget(rc);
}

fn manual_drop(data: *const ()) {
    // Safety: see `manual_clone`.
    unsafe { drop(Rc::from_raw(data.cast::<Cell<bool>>())) };
}

static MANUAL_VTABLE: RawWakerVTable =
    RawWakerVTable::new(manual_clone, manual_wake, manual_wake_by_ref, manual_drop);

fn manual_waker(woken: Rc<Cell<bool>>) -> Waker {
    let raw = RawWaker::new(Rc::into_raw(woken).cast(), &MANUAL_VTABLE);
    // Safety: `MANUAL_VTABLE` upholds the `Waker` contract via
    // `Rc`-based refcounting over the shared `Cell<bool>`.
    unsafe { Waker::from_raw(raw) }
}

/// A test-harness wrapper that steps a task manually, without an
/// executor.
///
/// Mirrors the specification's "test harness wrapper that exposes
/// `start()`, `done()`, and `result()` for stepping a task manually".
pub struct ManualTask<T, F: Future> {
    task: Pin<Box<Task<F>>>,
    woken: Rc<Cell<bool>>,
    result: Option<Outcome<T>>,
}

impl<T, F> ManualTask<T, F>
where
    F: Future<Output = Outcome<T>>,
{
    /// Wraps `task`, ready to be driven by repeated [`start`](Self::start)
    /// calls.
    #[must_use]
    pub fn new(task: Task<F>) -> Self {
        ManualTask {
            task: Box::pin(task),
            woken: Rc::new(Cell::new(true)),
            result: None,
        }
    }

    /// Polls the task once, if it is not done and has been (re)woken
    /// since the last call.
    ///
    /// A no-op if the task already completed or is not currently woken
    /// (i.e. it is suspended waiting on something that has not yet fired).
    pub fn start(&mut self) {
        if self.result.is_some() || !self.woken.replace(false) {
            return;
        }
        let waker = manual_waker(self.woken.clone());
        let mut cx = Context::from_waker(&waker);
        if let Poll::Ready(v) = self.task.as_mut().poll(&mut cx) {
            self.result = Some(v);
        }
    }

    /// `true` once the task has produced a result.
    #[must_use]
    pub fn done(&self) -> bool {
        self.result.is_some()
    }

    /// The task's result, once [`done`](Self::done) is `true`.
    #[must_use]
    pub fn result(&self) -> Option<&Outcome<T>> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    fn ready_task(value: i32) -> Task<impl Future<Output = Outcome<i32>>> {
        Task::from_future(async move { Outcome::Success(value) })
    }

    #[test]
    fn spawn_runs_to_completion_on_next_tick() {
        let exec = Rc::new(Executor::new());
        assert_eq!(spawn(&exec, ready_task(5)), Outcome::Success(()));
        assert_eq!(exec.len(), 1);
        exec.tick();
        assert!(exec.is_empty());
    }

    #[test]
    fn spawn_with_failing_allocator_yields_out_of_memory() {
        let exec = Rc::new(Executor::new());
        let result = spawn_with(&exec, &FailingFrameAllocator, ready_task(5));
        assert_eq!(result, Outcome::Err(ErrorCode::OutOfMemory));
        assert!(exec.is_empty(), "a failed spawn must never post anything");
    }

    #[test]
    fn manual_task_steps_without_an_executor() {
        let mut mt = ManualTask::new(ready_task(9));
        assert!(!mt.done());
        mt.start();
        assert!(mt.done());
        assert_eq!(mt.result(), Some(&Outcome::Success(9)));
    }

    #[test]
    fn manual_task_start_is_noop_without_a_wake() {
        let mut mt: ManualTask<i32, _> = ManualTask::new(Task::from_future(async {
            core::future::pending::<()>().await;
            Outcome::Success(0)
        }));
        mt.start();
        assert!(!mt.done());
        mt.start(); // not woken since the first poll: still a no-op
        assert!(!mt.done());
    }
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cross-module scenarios (S1-S6), run against a [`ManualClock`] and
//! [`Executor::tick`]/[`poll_once`] — no real time, no threads, fully
//! deterministic.

use std::cell::Cell;
use std::pin::pin;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use micrort::awaitable::CancellableAwaitable;
use micrort::cancel::CancellationSignal;
use micrort::combinators::all::all2;
use micrort::combinators::any::any2;
use micrort::error::{ErrorCode, Outcome};
use micrort::executor::Executor;
use micrort::spawn::{spawn, spawn_with, FailingFrameAllocator};
use micrort::sync::{Event, Mutex, MpmcChannel};
use micrort::task::Task;
use micrort::test_util::poll_once;
use micrort::time::cron::CronService;
use micrort::time::timer::{wait, TimerService};
use micrort::time::{Clock, Instant, ManualClock};

// S1 — timed-out operation: any(Event::wait(e), wait(10ms)) where `e` is
// never set. Advancing the clock past the deadline must resolve the whole
// thing with the timer as the winner and the event cancelled.
#[test]
fn s1_any_with_event_never_set_resolves_via_timeout() {
    let timer = Rc::new(TimerService::new(4));
    let clock = ManualClock::new();
    let exec = Executor::new();
    let event = Rc::new(Event::new());

    let mut fut = pin!(any2(
        Event::wait(&event),
        wait(&timer, &clock, Duration::from_millis(10)),
    ));
    assert_eq!(poll_once(fut.as_mut()), Poll::Pending);

    clock.advance(Duration::from_millis(15));
    timer.tick(clock.now(), &exec);
    exec.run_until_idle();

    // The timer resolves first and cancels the event; the event side only
    // observes that cancellation on its own next poll.
    assert_eq!(poll_once(fut.as_mut()), Poll::Pending);
    match poll_once(fut.as_mut()) {
        Poll::Ready(Outcome::Success((
            Outcome::Err(ErrorCode::Cancelled),
            Outcome::Success(()),
        ))) => {}
        other => panic!("expected the timer to win and the event to be cancelled, got {other:?}"),
    }
}

// S2 — mutex hand-off: three lockers queue up, and the lock transfers in
// strict FIFO order with no unlocked instant observable in between.
#[test]
fn s2_mutex_hands_off_to_waiters_in_fifo_order() {
    let mutex = Rc::new(Mutex::new());
    let guard = mutex.try_lock().expect("uncontended");

    let mut a = pin!(Mutex::lock(&mutex));
    let mut b = pin!(Mutex::lock(&mutex));
    let mut c = pin!(Mutex::lock(&mutex));
    assert_eq!(poll_once(a.as_mut()), Poll::Pending);
    assert_eq!(poll_once(b.as_mut()), Poll::Pending);
    assert_eq!(poll_once(c.as_mut()), Poll::Pending);

    drop(guard);
    let guard_a = match poll_once(a.as_mut()) {
        Poll::Ready(Outcome::Success(g)) => g,
        other => panic!("expected A to acquire, got {other:?}"),
    };
    assert_eq!(poll_once(b.as_mut()), Poll::Pending, "B must still be parked");

    drop(guard_a);
    let guard_b = match poll_once(b.as_mut()) {
        Poll::Ready(Outcome::Success(g)) => g,
        other => panic!("expected B to acquire, got {other:?}"),
    };
    assert_eq!(poll_once(c.as_mut()), Poll::Pending, "C must still be parked");

    drop(guard_b);
    assert!(matches!(poll_once(c.as_mut()), Poll::Ready(Outcome::Success(_))));
}

// S3 — channel FIFO under backpressure: sends beyond capacity queue up and
// drain in the order they were issued, not the order their slots free.
#[test]
fn s3_channel_preserves_fifo_order_under_backpressure() {
    let channel: Rc<MpmcChannel<i32, 2>> = Rc::new(MpmcChannel::new());
    let mut s1 = pin!(MpmcChannel::send(&channel, 10));
    let mut s2 = pin!(MpmcChannel::send(&channel, 20));
    let mut s3 = pin!(MpmcChannel::send(&channel, 30));
    let mut s4 = pin!(MpmcChannel::send(&channel, 40));

    assert_eq!(poll_once(s1.as_mut()), Poll::Ready(Outcome::Success(())));
    assert_eq!(poll_once(s2.as_mut()), Poll::Ready(Outcome::Success(())));
    assert_eq!(poll_once(s3.as_mut()), Poll::Pending);
    assert_eq!(poll_once(s4.as_mut()), Poll::Pending);

    let mut r1 = pin!(MpmcChannel::receive(&channel));
    assert_eq!(poll_once(r1.as_mut()), Poll::Ready(Outcome::Success(10)));
    assert_eq!(poll_once(s3.as_mut()), Poll::Ready(Outcome::Success(())));

    let mut r2 = pin!(MpmcChannel::receive(&channel));
    assert_eq!(poll_once(r2.as_mut()), Poll::Ready(Outcome::Success(20)));
    assert_eq!(poll_once(s4.as_mut()), Poll::Ready(Outcome::Success(())));

    let mut r3 = pin!(MpmcChannel::receive(&channel));
    assert_eq!(poll_once(r3.as_mut()), Poll::Ready(Outcome::Success(30)));
    let mut r4 = pin!(MpmcChannel::receive(&channel));
    assert_eq!(poll_once(r4.as_mut()), Poll::Ready(Outcome::Success(40)));
}

// S4 — structured cancel propagation: cancelling an `all()` must cancel
// both children, even where one child holds a Mutex and is suspended on an
// Event, and the other is itself still queued behind that same Mutex.
#[test]
fn s4_cancelling_all_propagates_through_mutex_and_event_children() {
    let mutex = Rc::new(Mutex::new());
    let event = Rc::new(Event::new());

    let task_a = Task::with_context({
        let mutex = mutex.clone();
        let event = event.clone();
        move |ctx| async move {
            let guard = match ctx.child(Mutex::lock(&mutex)).await {
                Outcome::Success(g) => g,
                Outcome::Err(code) => return Outcome::Err(code),
            };
            let result = ctx.child(Event::wait(&event)).await;
            drop(guard);
            result
        }
    });
    let task_b = Task::with_context({
        let mutex = mutex.clone();
        move |ctx| async move { ctx.child(Mutex::lock(&mutex)).await.map(|_guard| ()) }
    });

    let signal = CancellationSignal::new();
    let mut fut = pin!(all2(task_a, task_b));
    fut.as_mut().set_cancellation_slot(signal.slot());

    // task_a acquires the (uncontended) lock and parks on the event;
    // task_b queues up behind the same lock.
    assert_eq!(poll_once(fut.as_mut()), Poll::Pending);
    assert!(mutex.try_lock().is_none(), "task_a should hold the lock");

    signal.emit();
    match poll_once(fut.as_mut()) {
        Poll::Ready(Outcome::Success((
            Outcome::Err(ErrorCode::Cancelled),
            Outcome::Err(ErrorCode::Cancelled),
        ))) => {}
        other => panic!("expected both children cancelled, got {other:?}"),
    }

    // task_a's held guard only releases once its suspended frame drops.
    drop(fut);
    assert!(mutex.try_lock().is_some(), "lock must be released after cancellation");
}

// S5 — cron self-removal: a task that removes itself from the cron queue
// on its first run must never fire again, even though its interval would
// otherwise bring it due again at t=40.
#[test]
fn s5_cron_task_removing_itself_never_fires_again() {
    let cron = Rc::new(CronService::new());
    let runs = Rc::new(Cell::new(0u32));
    let handle_cell: Rc<Cell<Option<_>>> = Rc::new(Cell::new(None));

    let cron_for_cb = cron.clone();
    let runs_for_cb = runs.clone();
    let handle_cell_for_cb = handle_cell.clone();
    let handle = cron.add(Instant::ZERO, Duration::from_nanos(40), move || {
        runs_for_cb.set(runs_for_cb.get() + 1);
        if let Some(h) = handle_cell_for_cb.get() {
            cron_for_cb.remove(h);
        }
        false
    });
    handle_cell.set(Some(handle));

    cron.tick(Instant::from_nanos(0));
    assert_eq!(runs.get(), 1);
    cron.tick(Instant::from_nanos(40));
    assert_eq!(runs.get(), 1, "self-removed task must not run again at t=40");
    assert!(cron.is_empty());
}

// S6 — OOM at spawn: a frame allocation failure must report Err(OutOfMemory)
// without posting anything to the executor, and must not wedge the executor
// for subsequent, successful spawns.
#[test]
fn s6_failed_spawn_reports_out_of_memory_without_posting() {
    let exec = Rc::new(Executor::new());

    let result = spawn_with(
        &exec,
        &FailingFrameAllocator,
        Task::from_future(async { Outcome::Success(()) }),
    );
    assert_eq!(result, Outcome::Err(ErrorCode::OutOfMemory));
    assert!(exec.is_empty(), "a failed spawn must never post work");

    let result = spawn(&exec, Task::from_future(async { Outcome::Success(()) }));
    assert_eq!(result, Outcome::Success(()));
    assert_eq!(exec.len(), 1);
    exec.run_until_idle();
    assert!(exec.is_empty());
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `MpmcChannel<T, N>`: a bounded multi-producer multi-consumer channel
//! built on [`crate::ring::RingBuffer`]. `N == 0` makes the channel
//! rendezvous-only: the buffer is always "full" (capacity zero), so
//! every send must hand off directly, either to a parked receiver or,
//! on the receive side, to a parked sender.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::{ErrorCode, Outcome};
use crate::ring::RingBuffer;

#[derive(Clone, Copy, PartialEq, Eq)]
enum SendState {
    Pending,
    Taken,
    Cancelled,
}

enum RecvState<T> {
    Pending,
    Filled(T),
    Cancelled,
}

struct SendWaiter<T> {
    value: RefCell<Option<T>>,
    state: Cell<SendState>,
    waker: RefCell<Option<Waker>>,
}

struct RecvWaiter<T> {
    state: RefCell<RecvState<T>>,
    waker: RefCell<Option<Waker>>,
}

struct Inner<T, const N: usize> {
    buffer: RefCell<RingBuffer<T, N>>,
    senders: RefCell<VecDeque<Rc<SendWaiter<T>>>>,
    receivers: RefCell<VecDeque<Rc<RecvWaiter<T>>>>,
}

/// A bounded MPMC channel with fixed compile-time capacity `N`.
///
/// Shared via `Rc<MpmcChannel<T, N>>` across every sender and receiver.
pub struct MpmcChannel<T, const N: usize> {
    inner: Inner<T, N>,
}

impl<T, const N: usize> Default for MpmcChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> MpmcChannel<T, N> {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        MpmcChannel {
            inner: Inner {
                buffer: RefCell::new(RingBuffer::new()),
                senders: RefCell::new(VecDeque::new()),
                receivers: RefCell::new(VecDeque::new()),
            },
        }
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    /// `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.buffer.borrow().is_empty()
    }

    /// Returns a cancellable awaitable that sends `value` into the
    /// channel.
    #[must_use]
    pub fn send(channel: &Rc<MpmcChannel<T, N>>, value: T) -> Send<T, N> {
        Send {
            channel: channel.clone(),
            value: Some(value),
            waiter: None,
            upstream: CancellationSlot::disconnected(),
        }
    }

    /// Returns a cancellable awaitable that receives the next value.
    #[must_use]
    pub fn receive(channel: &Rc<MpmcChannel<T, N>>) -> Receive<T, N> {
        Receive {
            channel: channel.clone(),
            waiter: None,
            upstream: CancellationSlot::disconnected(),
        }
    }

    /// Send fast path: deliver directly to a parked receiver, else
    /// buffer if there's room. Returns the value back if the caller
    /// must park.
    fn try_send(&self, value: T) -> Result<(), T> {
        loop {
            let Some(receiver) = self.inner.receivers.borrow_mut().pop_front() else {
                break;
            };
            let mut state = receiver.state.borrow_mut();
            if !matches!(&*state, RecvState::Pending) {
                continue;
            }
            *state = RecvState::Filled(value);
            drop(state);
            if let Some(waker) = receiver.waker.borrow_mut().take() {
                waker.wake();
            }
            return Ok(());
        }
        if !self.inner.buffer.borrow().is_full() {
            self.inner.buffer.borrow_mut().push_back(value);
            return Ok(());
        }
        Err(value)
    }

    /// Receive fast path. Returns `None` if the caller must park.
    ///
    /// The buffer is always reported full when `N == 0`, which routes
    /// every receive through the parked-sender hand-off below rather
    /// than ever touching the (zero-capacity) buffer.
    fn try_receive(&self) -> Option<T> {
        if self.inner.buffer.borrow().is_full() {
            loop {
                let Some(sender) = self.inner.senders.borrow_mut().pop_front() else {
                    break;
                };
                if sender.state.get() != SendState::Pending {
                    continue;
                }
                let sender_value = sender
                    .value
                    .borrow_mut()
                    .take()
                    .expect("pending sender holds a value");
                let popped = self.inner.buffer.borrow_mut().pop_front();
                let result = match popped {
                    Some(oldest) => {
                        // advance the oldest parked sender's element into the buffer
                        self.inner.buffer.borrow_mut().push_back(sender_value);
                        oldest
                    }
                    // N == 0: nothing buffered, hand off the sender's value directly.
                    None => sender_value,
                };
                sender.state.set(SendState::Taken);
                if let Some(waker) = sender.waker.borrow_mut().take() {
                    waker.wake();
                }
                return Some(result);
            }
        }
        if !self.inner.buffer.borrow().is_empty() {
            return self.inner.buffer.borrow_mut().pop_front();
        }
        None
    }
}

/// The cancellable awaitable produced by [`MpmcChannel::send`].
#[pin_project(PinnedDrop)]
pub struct Send<T, const N: usize> {
    channel: Rc<MpmcChannel<T, N>>,
    value: Option<T>,
    waiter: Option<Rc<SendWaiter<T>>>,
    upstream: CancellationSlot,
}

impl<T: 'static, const N: usize> Future for Send<T, N> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.waiter.is_none() {
            let value = this.value.take().expect("Send polled after completion");
            match this.channel.try_send(value) {
                Ok(()) => {
                    this.upstream.clear_if_connected();
                    return Poll::Ready(Outcome::Success(()));
                }
                Err(value) => {
                    tracing::trace!("channel: send parking, buffer full");
                    let waiter = Rc::new(SendWaiter {
                        value: RefCell::new(Some(value)),
                        state: Cell::new(SendState::Pending),
                        waker: RefCell::new(Some(cx.waker().clone())),
                    });
                    this.channel
                        .inner
                        .senders
                        .borrow_mut()
                        .push_back(waiter.clone());

                    let waiter_for_handler = waiter.clone();
                    let upstream_for_handler = this.upstream.clone();
                    this.upstream.install_if_connected(alloc::boxed::Box::new(move || {
                        if waiter_for_handler.state.get() == SendState::Pending {
                            waiter_for_handler.state.set(SendState::Cancelled);
                            waiter_for_handler.value.borrow_mut().take();
                            upstream_for_handler.clear_if_connected();
                            if let Some(waker) = waiter_for_handler.waker.borrow_mut().take() {
                                waker.wake();
                            }
                        }
                    }));
                    *this.waiter = Some(waiter);
                    return Poll::Pending;
                }
            }
        }

        let waiter = this.waiter.as_ref().expect("checked above");
        match waiter.state.get() {
            SendState::Pending => {
                *waiter.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
            SendState::Taken => {
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Success(()))
            }
            SendState::Cancelled => {
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
        }
    }
}

impl<T: 'static, const N: usize> CancellableAwaitable for Send<T, N> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<T, const N: usize> PinnedDrop for Send<T, N> {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if let Some(waiter) = &self.waiter {
            if waiter.state.get() == SendState::Pending {
                waiter.state.set(SendState::Cancelled);
            }
            self.channel
                .inner
                .senders
                .borrow_mut()
                .retain(|w| !Rc::ptr_eq(w, waiter));
        }
    }
}

/// The cancellable awaitable produced by [`MpmcChannel::receive`].
#[pin_project(PinnedDrop)]
pub struct Receive<T, const N: usize> {
    channel: Rc<MpmcChannel<T, N>>,
    waiter: Option<Rc<RecvWaiter<T>>>,
    upstream: CancellationSlot,
}

impl<T: 'static, const N: usize> Future for Receive<T, N> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.waiter.is_none() {
            if let Some(value) = this.channel.try_receive() {
                this.upstream.clear_if_connected();
                return Poll::Ready(Outcome::Success(value));
            }
            let waiter = Rc::new(RecvWaiter {
                state: RefCell::new(RecvState::Pending),
                waker: RefCell::new(Some(cx.waker().clone())),
            });
            this.channel
                .inner
                .receivers
                .borrow_mut()
                .push_back(waiter.clone());

            let waiter_for_handler = waiter.clone();
            let upstream_for_handler = this.upstream.clone();
            this.upstream.install_if_connected(alloc::boxed::Box::new(move || {
                let mut state = waiter_for_handler.state.borrow_mut();
                if matches!(&*state, RecvState::Pending) {
                    *state = RecvState::Cancelled;
                    drop(state);
                    upstream_for_handler.clear_if_connected();
                    if let Some(waker) = waiter_for_handler.waker.borrow_mut().take() {
                        waker.wake();
                    }
                }
            }));
            *this.waiter = Some(waiter);
            return Poll::Pending;
        }

        let waiter = this.waiter.as_ref().expect("checked above");
        let mut state = waiter.state.borrow_mut();
        match &*state {
            RecvState::Pending => {
                drop(state);
                *waiter.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
            RecvState::Filled(_) => {
                let RecvState::Filled(value) = core::mem::replace(&mut *state, RecvState::Cancelled) else {
                    unreachable!()
                };
                drop(state);
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Success(value))
            }
            RecvState::Cancelled => {
                drop(state);
                this.upstream.clear_if_connected();
                Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
            }
        }
    }
}

impl<T: 'static, const N: usize> CancellableAwaitable for Receive<T, N> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<T, const N: usize> PinnedDrop for Receive<T, N> {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
        if let Some(waiter) = &self.waiter {
            let mut state = waiter.state.borrow_mut();
            if matches!(&*state, RecvState::Pending) {
                *state = RecvState::Cancelled;
            }
            drop(state);
            self.channel
                .inner
                .receivers
                .borrow_mut()
                .retain(|w| !Rc::ptr_eq(w, waiter));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::poll_once;

    #[test]
    fn send_then_receive_buffered() {
        let channel: Rc<MpmcChannel<i32, 2>> = Rc::new(MpmcChannel::new());
        let mut send = core::pin::pin!(MpmcChannel::send(&channel, 10));
        assert_eq!(poll_once(send.as_mut()), Poll::Ready(Outcome::Success(())));
        let mut recv = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(recv.as_mut()), Poll::Ready(Outcome::Success(10)));
    }

    #[test]
    fn receive_parks_then_direct_handoff_on_send() {
        let channel: Rc<MpmcChannel<i32, 1>> = Rc::new(MpmcChannel::new());
        let mut recv = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(recv.as_mut()), Poll::Pending);

        let mut send = core::pin::pin!(MpmcChannel::send(&channel, 7));
        assert_eq!(poll_once(send.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(poll_once(recv.as_mut()), Poll::Ready(Outcome::Success(7)));
        assert!(channel.is_empty());
    }

    // S3 — channel FIFO under backpressure.
    #[test]
    fn fifo_order_under_backpressure() {
        let channel: Rc<MpmcChannel<i32, 2>> = Rc::new(MpmcChannel::new());
        let mut s1 = core::pin::pin!(MpmcChannel::send(&channel, 10));
        let mut s2 = core::pin::pin!(MpmcChannel::send(&channel, 20));
        let mut s3 = core::pin::pin!(MpmcChannel::send(&channel, 30));
        let mut s4 = core::pin::pin!(MpmcChannel::send(&channel, 40));

        assert_eq!(poll_once(s1.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(poll_once(s2.as_mut()), Poll::Ready(Outcome::Success(())));
        assert_eq!(poll_once(s3.as_mut()), Poll::Pending);
        assert_eq!(poll_once(s4.as_mut()), Poll::Pending);

        let mut r1 = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(r1.as_mut()), Poll::Ready(Outcome::Success(10)));
        assert_eq!(poll_once(s3.as_mut()), Poll::Ready(Outcome::Success(())));

        let mut r2 = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(r2.as_mut()), Poll::Ready(Outcome::Success(20)));
        assert_eq!(poll_once(s4.as_mut()), Poll::Ready(Outcome::Success(())));

        let mut r3 = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(r3.as_mut()), Poll::Ready(Outcome::Success(30)));
        let mut r4 = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(r4.as_mut()), Poll::Ready(Outcome::Success(40)));
    }

    #[test]
    fn rendezvous_only_channel_requires_direct_handoff() {
        let channel: Rc<MpmcChannel<i32, 0>> = Rc::new(MpmcChannel::new());
        let mut send = core::pin::pin!(MpmcChannel::send(&channel, 1));
        assert_eq!(poll_once(send.as_mut()), Poll::Pending);

        let mut recv = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(recv.as_mut()), Poll::Ready(Outcome::Success(1)));
        assert_eq!(poll_once(send.as_mut()), Poll::Ready(Outcome::Success(())));
    }

    #[test]
    fn cancelled_sender_is_skipped_on_receive() {
        let channel: Rc<MpmcChannel<i32, 0>> = Rc::new(MpmcChannel::new());
        let mut send = core::pin::pin!(MpmcChannel::send(&channel, 1));
        assert_eq!(poll_once(send.as_mut()), Poll::Pending);
        drop(send);

        let mut recv = core::pin::pin!(MpmcChannel::receive(&channel));
        assert_eq!(poll_once(recv.as_mut()), Poll::Pending);
    }
}

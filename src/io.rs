// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cancellable byte I/O over a caller-supplied, non-blocking collaborator.
//!
//! `ByteSource`/`ByteSink` are the minimal traits a stream driver (a UART,
//! a socket shim, anything external to the core) implements; `read`/
//! `write` poll them once per executor tick until satisfied or cancelled,
//! the same yield-and-repost shape `wait`/`waitCallback` use, rather than
//! a dedicated poller service.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use pin_project::{pin_project, pinned_drop};

use crate::awaitable::CancellableAwaitable;
use crate::cancel::CancellationSlot;
use crate::error::{ErrorCode, Outcome};

/// A non-blocking byte source.
///
/// `try_read` returns `None` when no data is available yet (try again
/// later), `Some(Ok(n))` for a read of `n` bytes (`n == 0` signals EOF),
/// and `Some(Err(_))` for a terminal failure.
pub trait ByteSource {
    /// Attempts to read into `buf` without blocking.
    fn try_read(&mut self, buf: &mut [u8]) -> Option<Result<usize, ErrorCode>>;
}

/// A non-blocking byte sink, mirroring [`ByteSource`] for writes.
pub trait ByteSink {
    /// Attempts to write `buf` without blocking.
    fn try_write(&mut self, buf: &[u8]) -> Option<Result<usize, ErrorCode>>;
}

/// Returns a cancellable awaitable that reads into `buf` from `source`,
/// retrying once per executor tick until data arrives, EOF is reached, a
/// read error occurs, or the awaitable is cancelled.
#[must_use]
pub fn read<S: ByteSource>(source: S, buf: alloc::boxed::Box<[u8]>) -> Read<S> {
    Read {
        source,
        buf,
        upstream: CancellationSlot::disconnected(),
    }
}

/// The cancellable awaitable produced by [`read`].
#[pin_project(PinnedDrop)]
pub struct Read<S> {
    source: S,
    buf: alloc::boxed::Box<[u8]>,
    upstream: CancellationSlot,
}

impl<S: ByteSource> Future for Read<S> {
    type Output = Outcome<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if !this.upstream.is_connected() || this.upstream.has_handler() {
            match this.source.try_read(this.buf) {
                Some(Ok(n)) => {
                    this.upstream.clear_if_connected();
                    return Poll::Ready(Outcome::Success(n));
                }
                Some(Err(code)) => {
                    this.upstream.clear_if_connected();
                    return Poll::Ready(Outcome::Err(code));
                }
                None => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
            }
        }
        // The handler fired and cleared itself: cancelled while parked.
        Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
    }
}

impl<S: ByteSource> CancellableAwaitable for Read<S> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        slot.install_if_connected(alloc::boxed::Box::new(|| {}));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<S> PinnedDrop for Read<S> {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
    }
}

/// Returns a cancellable awaitable that writes `buf` to `sink`, retrying
/// once per executor tick until accepted, a write error occurs, or the
/// awaitable is cancelled.
#[must_use]
pub fn write<S: ByteSink>(sink: S, buf: alloc::boxed::Box<[u8]>) -> Write<S> {
    Write {
        sink,
        buf,
        upstream: CancellationSlot::disconnected(),
    }
}

/// The cancellable awaitable produced by [`write`].
#[pin_project(PinnedDrop)]
pub struct Write<S> {
    sink: S,
    buf: alloc::boxed::Box<[u8]>,
    upstream: CancellationSlot,
}

impl<S: ByteSink> Future for Write<S> {
    type Output = Outcome<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if !this.upstream.is_connected() || this.upstream.has_handler() {
            match this.sink.try_write(this.buf) {
                Some(Ok(n)) => {
                    this.upstream.clear_if_connected();
                    return Poll::Ready(Outcome::Success(n));
                }
                Some(Err(code)) => {
                    this.upstream.clear_if_connected();
                    return Poll::Ready(Outcome::Err(code));
                }
                None => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
            }
        }
        Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
    }
}

impl<S: ByteSink> CancellableAwaitable for Write<S> {
    fn set_cancellation_slot(self: Pin<&mut Self>, slot: CancellationSlot) {
        let this = self.project();
        slot.install_if_connected(alloc::boxed::Box::new(|| {}));
        *this.upstream = slot;
    }
}

#[pinned_drop]
impl<S> PinnedDrop for Write<S> {
    fn drop(self: Pin<&mut Self>) {
        self.upstream.clear_if_connected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::collections::VecDeque;
    use crate::test_util::poll_once;

    struct QueuedSource(VecDeque<u8>);

    impl ByteSource for QueuedSource {
        fn try_read(&mut self, buf: &mut [u8]) -> Option<Result<usize, ErrorCode>> {
            if self.0.is_empty() {
                return None;
            }
            let mut n = 0;
            while n < buf.len() {
                match self.0.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Some(Ok(n))
        }
    }

    struct CapturingSink(alloc::vec::Vec<u8>);

    impl ByteSink for CapturingSink {
        fn try_write(&mut self, buf: &[u8]) -> Option<Result<usize, ErrorCode>> {
            self.0.extend_from_slice(buf);
            Some(Ok(buf.len()))
        }
    }

    #[test]
    fn read_parks_until_data_available() {
        let source = QueuedSource(VecDeque::new());
        let buf: Box<[u8]> = alloc::vec![0u8; 4].into_boxed_slice();
        let mut fut = core::pin::pin!(read(source, buf));
        assert_eq!(poll_once(fut.as_mut()), Poll::Pending);
    }

    #[test]
    fn read_returns_bytes_once_available() {
        let source = QueuedSource(VecDeque::from(alloc::vec![1, 2, 3]));
        let buf: Box<[u8]> = alloc::vec![0u8; 4].into_boxed_slice();
        let mut fut = core::pin::pin!(read(source, buf));
        assert_eq!(poll_once(fut.as_mut()), Poll::Ready(Outcome::Success(3)));
    }

    #[test]
    fn write_accepts_synchronously() {
        let sink = CapturingSink(alloc::vec::Vec::new());
        let buf: Box<[u8]> = alloc::vec![7u8, 8, 9].into_boxed_slice();
        let mut fut = core::pin::pin!(write(sink, buf));
        assert_eq!(poll_once(fut.as_mut()), Poll::Ready(Outcome::Success(3)));
    }

    #[test]
    fn cancelling_a_parked_read_resolves_cancelled() {
        let source = QueuedSource(VecDeque::new());
        let buf: Box<[u8]> = alloc::vec![0u8; 4].into_boxed_slice();
        let signal = crate::cancel::CancellationSignal::new();
        let mut fut = core::pin::pin!(read(source, buf));
        fut.as_mut().set_cancellation_slot(signal.slot());
        assert_eq!(poll_once(fut.as_mut()), Poll::Pending);
        signal.emit();
        assert_eq!(
            poll_once(fut.as_mut()),
            Poll::Ready(Outcome::Err(ErrorCode::Cancelled))
        );
    }
}

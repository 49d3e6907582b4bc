// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error taxonomy and the status/value sum type every awaitable completes
//! with.
//!
//! This intentionally does not reuse the name `Result` for the sum type:
//! the crate still uses `core::result::Result` pervasively for fallible
//! *construction* (`?` on allocator and queue-capacity failures before they
//! are folded into an [`Outcome`]), and shadowing it would make every
//! signature ambiguous to read.

use core::fmt;

/// The taxonomy of terminal outcomes an awaitable can produce.
///
/// `Success` is never itself carried as an [`ErrorCode`] value on a
/// completed [`Outcome`] — it exists only so `ErrorCode::Unknown` and
/// friends have a `Success` variant to *not* be, matching the source
/// encoding called out in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Default / uninitialized. Never observed on a completed operation.
    Unknown,
    /// A value is present. Not used directly as an `Outcome::Err` payload.
    Success,
    /// The operation was cancelled via its cancellation slot.
    Cancelled,
    /// Task-frame (or other heap frame) allocation failed.
    OutOfMemory,
    /// A fixed-capacity service could not accept a new entry.
    Exhausted,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::Success => "success",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

impl core::error::Error for ErrorCode {}

/// The value-or-error sum every awaitable in this crate resolves to.
///
/// `Outcome<Unit>` (i.e. `Outcome<()>`) is the status-only form mentioned
/// in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation produced a value.
    Success(T),
    /// The operation terminated with the given error code.
    Err(ErrorCode),
}

impl<T> Outcome<T> {
    /// Constructs a successful outcome.
    #[must_use]
    pub const fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    /// Constructs a failed outcome.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `code` is [`ErrorCode::Success`]: a
    /// `Success` code must always carry a value, per the specification's
    /// construction invariant.
    #[must_use]
    pub fn err(code: ErrorCode) -> Self {
        debug_assert_ne!(
            code,
            ErrorCode::Success,
            "Outcome::err constructed with the Success code"
        );
        Outcome::Err(code)
    }

    /// Returns `true` if this is a [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Returns `true` if this outcome is `Err(Cancelled)`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Err(ErrorCode::Cancelled))
    }

    /// Returns the error code, or [`ErrorCode::Success`] if this is a
    /// [`Outcome::Success`].
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Outcome::Success(_) => ErrorCode::Success,
            Outcome::Err(code) => *code,
        }
    }

    /// Maps the success value, leaving an error outcome untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Err(code) => Outcome::Err(code),
        }
    }

    /// Converts into a `core::result::Result`, for code that wants to use
    /// `?`-based propagation at the boundary of this crate.
    pub fn into_result(self) -> Result<T, ErrorCode> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Err(code) => Err(code),
        }
    }

    /// Returns the contained success value.
    ///
    /// # Panics
    ///
    /// Panics if this is an `Err` outcome.
    #[track_caller]
    pub fn unwrap(self) -> T {
        match self {
            Outcome::Success(v) => v,
            Outcome::Err(code) => panic!("unwrapped an Outcome::Err({code})"),
        }
    }
}

impl<T> From<Result<T, ErrorCode>> for Outcome<T> {
    fn from(value: Result<T, ErrorCode>) -> Self {
        match value {
            Ok(v) => Outcome::Success(v),
            Err(code) => Outcome::Err(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_success() {
        // For any T, Result<T>(v) followed by get yields v.
        let o = Outcome::success(42);
        assert_eq!(o.unwrap(), 42);
    }

    #[test]
    fn error_code_of_success_is_success() {
        let o: Outcome<i32> = Outcome::success(1);
        assert_eq!(o.error_code(), ErrorCode::Success);
    }

    #[test]
    fn is_cancelled_only_for_cancelled_err() {
        let cancelled: Outcome<i32> = Outcome::err(ErrorCode::Cancelled);
        let oom: Outcome<i32> = Outcome::err(ErrorCode::OutOfMemory);
        assert!(cancelled.is_cancelled());
        assert!(!oom.is_cancelled());
    }

    #[test]
    #[should_panic]
    fn err_with_success_code_panics_in_debug() {
        let _ = Outcome::<i32>::err(ErrorCode::Success);
    }
}

// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cooperative, single-threaded asynchronous execution core.
//!
//! `micrort` provides a task/continuation model, structured cancellation,
//! a small combinator algebra (`all`, `any`, [`DynamicScope`]) and a
//! service layer (executor, timers, defer queue, cron queue, sync
//! primitives) suitable for embedded-class targets as well as native
//! single-threaded hosts. There is no multi-threading, no preemption and
//! no exception-based error propagation anywhere in this crate.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod awaitable;
pub mod callback;
pub mod cancel;
pub mod combinators;
pub mod error;
pub mod executor;
pub mod io;
pub mod ring;
pub mod runnable;
pub mod spawn;
pub mod sync;
pub mod task;
pub mod time;

#[cfg(any(test, feature = "std"))]
pub mod test_util;

pub use callback::CallbackSlot;
pub use cancel::{CancellationHandler, CancellationSignal, CancellationSlot};
pub use error::{ErrorCode, Outcome};
pub use executor::Executor;
pub use runnable::Runnable;
pub use spawn::{spawn, ManualTask};
pub use task::Task;

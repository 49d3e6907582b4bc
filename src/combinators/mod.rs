// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The parallel combinator algebra: [`all`]/[`any`] over a fixed number of
//! heterogeneous children, and [`DynamicScope`] over a runtime-sized
//! homogeneous collection.
//!
//! `all`/`any` are provided for arities 2 and 3 (`all2`/`all3`,
//! `any2`/`any3`); higher arities follow the identical pattern — a child
//! future field plus a child [`crate::cancel::CancellationSignal`] per
//! position, polled in a fixed order each `poll()` call.

pub mod all;
pub mod any;
pub mod scope;

pub use all::{All2, All3};
pub use any::{Any2, Any3};
pub use scope::DynamicScope;

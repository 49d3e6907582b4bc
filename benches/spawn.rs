// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};
use micrort::error::Outcome;
use micrort::executor::Executor;
use micrort::spawn::spawn;
use micrort::task::Task;

async fn work() -> Outcome<usize> {
    let val = 1 + 1;
    Outcome::Success(black_box(val))
}

fn single_spawn(c: &mut Criterion) {
    c.bench_function("single_spawn", |b| {
        b.iter(|| {
            let exec = Rc::new(Executor::new());
            spawn(&exec, Task::from_future(work())).unwrap();
            exec.run_until_idle();
        });
    });
}

fn ten_spawns(c: &mut Criterion) {
    c.bench_function("ten_spawns", |b| {
        b.iter(|| {
            let exec = Rc::new(Executor::new());
            for _ in 0..10 {
                spawn(&exec, Task::from_future(work())).unwrap();
            }
            exec.run_until_idle();
        });
    });
}

criterion_group!(spawn_benches, single_spawn, ten_spawns);
criterion_main!(spawn_benches);

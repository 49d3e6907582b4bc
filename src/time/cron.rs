// Copyright 2026 micrort contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `CronService`: repeating tasks, each a [`crate::time::timer::TimerEntry`]
//! plus an interval.

use alloc::collections::{BTreeMap, BinaryHeap};
use core::cell::{Cell, RefCell};
use core::cmp::Reverse;
use core::time::Duration;

use crate::time::Instant;

/// An opaque handle to a registered cron task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronHandle(u64);

struct CronEntry {
    callback: alloc::boxed::Box<dyn FnMut() -> bool>,
    interval: Duration,
}

/// A repeating-task queue.
///
/// Each registered task fires at its deadline and, unless its callback
/// reports that it should stop (by returning `false`), is rescheduled
/// with `deadline = now + interval`.
pub struct CronService {
    next_id: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<(Instant, u64)>>>,
    entries: RefCell<BTreeMap<u64, CronEntry>>,
}

impl Default for CronService {
    fn default() -> Self {
        Self::new()
    }
}

impl CronService {
    /// Creates an empty cron service.
    #[must_use]
    pub fn new() -> Self {
        CronService {
            next_id: Cell::new(0),
            heap: RefCell::new(BinaryHeap::new()),
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    /// Number of pending (registered, not yet removed) cron tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// `true` if no cron tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Registers a repeating task: `callback` runs at `first_deadline`
    /// and, while it keeps returning `true`, every `interval` thereafter.
    pub fn add(
        &self,
        first_deadline: Instant,
        interval: Duration,
        callback: impl FnMut() -> bool + 'static,
    ) -> CronHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().insert(
            id,
            CronEntry {
                callback: alloc::boxed::Box::new(callback),
                interval,
            },
        );
        self.heap.borrow_mut().push(Reverse((first_deadline, id)));
        CronHandle(id)
    }

    /// Removes a registered task before it fires again.
    ///
    /// Returns `false` if the entry is no longer linked (already removed,
    /// including self-removal from within its own callback).
    pub fn remove(&self, handle: CronHandle) -> bool {
        self.entries.borrow_mut().remove(&handle.0).is_some()
    }

    /// Returns the earliest pending deadline, or [`Instant::MAX`] if
    /// empty.
    #[must_use]
    pub fn wake_at(&self) -> Instant {
        self.peel_stale();
        self.heap
            .borrow()
            .peek()
            .map_or(Instant::MAX, |Reverse((deadline, _))| *deadline)
    }

    fn peel_stale(&self) {
        loop {
            let top_id = self.heap.borrow().peek().map(|Reverse((_, id))| *id);
            match top_id {
                Some(id) if !self.entries.borrow().contains_key(&id) => {
                    self.heap.borrow_mut().pop();
                }
                _ => break,
            }
        }
    }

    /// Runs every task whose deadline is `<= now`, rescheduling those
    /// whose callback returns `true`.
    pub fn tick(&self, now: Instant) {
        loop {
            self.peel_stale();
            let due = self
                .heap
                .borrow()
                .peek()
                .is_some_and(|Reverse((deadline, _))| *deadline <= now);
            if !due {
                break;
            }
            let Reverse((_, id)) = self.heap.borrow_mut().pop().expect("checked non-empty above");
            let Some(mut entry) = self.entries.borrow_mut().remove(&id) else {
                continue;
            };
            let keep = (entry.callback)();
            tracing::trace!(id, ?now, keep, "cron entry fired");
            if keep {
                let interval = entry.interval;
                self.entries.borrow_mut().insert(id, entry);
                self.heap.borrow_mut().push(Reverse((now + interval, id)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;

    // S5 — cron self-removal.
    #[test]
    fn self_removing_cron_task() {
        let cron = Rc::new(CronService::new());
        let runs = Rc::new(Cell::new(0u32));
        let cron_for_cb = cron.clone();
        let runs_for_cb = runs.clone();
        let handle_cell: Rc<Cell<Option<CronHandle>>> = Rc::new(Cell::new(None));
        let handle_cell_for_cb = handle_cell.clone();
        let handle = cron.add(Instant::ZERO, Duration::from_nanos(10), move || {
            runs_for_cb.set(runs_for_cb.get() + 1);
            if runs_for_cb.get() == 1 {
                if let Some(h) = handle_cell_for_cb.get() {
                    cron_for_cb.remove(h);
                }
                false
            } else {
                true
            }
        });
        handle_cell.set(Some(handle));

        cron.tick(Instant::from_nanos(0));
        assert_eq!(runs.get(), 1);

        cron.tick(Instant::from_nanos(10));
        assert_eq!(runs.get(), 1, "self-removed task must not run again");
        assert!(cron.is_empty());
    }
}

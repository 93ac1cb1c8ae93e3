use std::io;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::{Error, Result};

/// Bounded LIFO reserve of reusable workers.
///
/// `max < 0` lets the pool grow without bound, `max == 0` makes it unusable
/// and `max > 0` is a hard cap on live workers. Counters and the idle stack
/// share one mutex; a release wakes exactly one blocked acquirer and
/// [`WorkerPool::close`] wakes all of them.
pub(crate) struct WorkerPool<W> {
    state: Mutex<PoolState<W>>,
    available: Condvar,
}

struct PoolState<W> {
    idle: Vec<W>,
    current: usize,
    busy: usize,
    max: isize,
    closed: bool,
}

impl<W> PoolState<W> {
    fn has_room(&self) -> bool {
        self.max < 0 || (self.current as isize) < self.max
    }

    fn over_capacity(&self) -> bool {
        self.max >= 0 && (self.current as isize) > self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub current_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub max_workers: isize,
}

impl<W> WorkerPool<W> {
    pub(crate) fn new(max: isize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                current: 0,
                busy: 0,
                max,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Take the most recently released worker, create one if there is room,
    /// or block until a worker comes back.
    ///
    /// `create` runs outside the lock. If it fails the reserved slot is
    /// given back before the error is returned.
    pub(crate) fn acquire_with<F>(&self, create: F) -> Result<W>
    where
        F: FnOnce(usize) -> io::Result<W>,
    {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::Handoff("worker pool is closed".to_string()));
            }
            if state.max == 0 {
                return Err(Error::Handoff("worker pool has no capacity".to_string()));
            }
            if let Some(worker) = state.idle.pop() {
                state.busy += 1;
                return Ok(worker);
            }
            if state.has_room() {
                state.current += 1;
                state.busy += 1;
                let seq = state.current;
                drop(state);
                return create(seq).map_err(|e| {
                    let mut state = self.state.lock();
                    state.current -= 1;
                    state.busy -= 1;
                    self.available.notify_one();
                    Error::Handoff(format!("unable to create worker: {e}"))
                });
            }
            self.available.wait(&mut state);
        }
    }

    /// Return a worker to the reserve.
    ///
    /// Returns `false` when the worker was discarded instead, because the
    /// pool is closed or shrank below its current membership.
    pub(crate) fn release(&self, worker: W) -> bool {
        let mut state = self.state.lock();
        state.busy = state.busy.saturating_sub(1);
        let kept = if state.closed || state.over_capacity() {
            state.current = state.current.saturating_sub(1);
            drop(worker);
            false
        } else {
            state.idle.push(worker);
            true
        };
        self.available.notify_one();
        kept
    }

    /// Change the cap. Busy workers are never interrupted.
    pub(crate) fn resize(&self, max: isize) {
        let mut state = self.state.lock();
        state.max = max;
        while state.over_capacity() && state.idle.pop().is_some() {
            state.current -= 1;
        }
        self.available.notify_all();
    }

    /// Discard the idle reserve and fail every pending and future
    /// acquisition until [`WorkerPool::reopen`].
    pub(crate) fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            let drained = std::mem::take(&mut state.idle);
            state.current = state.current.saturating_sub(drained.len());
            drained
        };
        self.available.notify_all();
        drop(drained);
    }

    pub(crate) fn reopen(&self, max: isize) {
        let mut state = self.state.lock();
        state.closed = false;
        state.max = max;
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            current_workers: state.current,
            busy_workers: state.busy,
            idle_workers: state.idle.len(),
            max_workers: state.max,
        }
    }
}

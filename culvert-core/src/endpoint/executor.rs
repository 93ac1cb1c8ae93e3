use std::{
    collections::VecDeque,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::ExecutorConfig,
    lifecycle::{
        panic_message, Lifecycle, LifecycleListener, LifecycleState, LifecycleSupport,
    },
    Result,
};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
#[error("executor {executor} rejected task: {reason}")]
pub struct RejectedTask {
    pub executor: String,
    pub reason: &'static str,
}

/// A named thread pool that endpoints can share instead of running their
/// own workers.
pub trait Executor: Lifecycle {
    fn name(&self) -> &str;

    fn execute(&self, task: Task) -> std::result::Result<(), RejectedTask>;

    fn stats(&self) -> ExecutorStats;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub name: String,
    pub pool_size: usize,
    pub active_count: usize,
    pub queue_size: usize,
    pub max_threads: usize,
}

/// Lazily grown thread pool with a bounded queue.
///
/// Threads are spawned on demand up to `max_threads`. A thread that stays
/// idle for `max_idle` retires unless the pool would drop below
/// `min_spare_threads`. Tasks are only accepted while started.
pub struct StandardExecutor {
    inner: Arc<Inner>,
    lifecycle: LifecycleSupport,
}

struct Inner {
    config: ExecutorConfig,
    state: Mutex<QueueState>,
    work: Condvar,
    next_id: AtomicUsize,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Task>,
    threads: usize,
    idle: usize,
    accepting: bool,
}

impl fmt::Debug for StandardExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardExecutor")
            .field("config", &self.inner.config)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl StandardExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState::default()),
                work: Condvar::new(),
                next_id: AtomicUsize::new(0),
            }),
            lifecycle: LifecycleSupport::new(),
        })
    }

    fn shutdown(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.accepting = false;
            std::mem::take(&mut state.queue)
        };
        self.inner.work.notify_all();
        if !dropped.is_empty() {
            warn!(
                executor = %self.inner.config.name,
                "discarding {} queued tasks",
                dropped.len()
            );
        }
    }
}

impl Inner {
    fn spawn_thread(self: &Arc<Self>, state: &mut QueueState) -> std::io::Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.clone();
        thread::Builder::new()
            .name(format!("{}-exec-{}", self.config.name, id))
            .spawn(move || inner.run())?;
        state.threads += 1;
        Ok(())
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.queue.pop_front() {
                drop(state);
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                    error!(
                        executor = %self.config.name,
                        "task panicked: {}",
                        panic_message(&panic)
                    );
                }
                state = self.state.lock();
                continue;
            }
            if !state.accepting {
                break;
            }
            state.idle += 1;
            let timed_out = self
                .work
                .wait_for(&mut state, self.config.max_idle())
                .timed_out();
            state.idle -= 1;
            if timed_out
                && state.queue.is_empty()
                && state.threads > self.config.min_spare_threads
            {
                break;
            }
        }
        state.threads -= 1;
        debug!(executor = %self.config.name, remaining = state.threads, "executor thread exiting");
    }
}

impl Executor for StandardExecutor {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn execute(&self, task: Task) -> std::result::Result<(), RejectedTask> {
        let reject = |reason| RejectedTask {
            executor: self.inner.config.name.clone(),
            reason,
        };
        let mut state = self.inner.state.lock();
        if !state.accepting {
            return Err(reject("executor is not running"));
        }
        if state.queue.len() >= self.inner.config.max_queue_size {
            return Err(reject("queue is full"));
        }
        state.queue.push_back(task);
        if state.idle < state.queue.len() && state.threads < self.inner.config.max_threads {
            if let Err(e) = self.inner.spawn_thread(&mut state) {
                if state.threads == 0 {
                    state.queue.pop_back();
                    return Err(reject("unable to spawn thread"));
                }
                warn!(executor = %self.inner.config.name, "unable to spawn thread: {e}");
            }
        }
        self.inner.work.notify_one();
        Ok(())
    }

    fn stats(&self) -> ExecutorStats {
        let state = self.inner.state.lock();
        ExecutorStats {
            name: self.inner.config.name.clone(),
            pool_size: state.threads,
            active_count: state.threads - state.idle,
            queue_size: state.queue.len(),
            max_threads: self.inner.config.max_threads,
        }
    }
}

impl Lifecycle for StandardExecutor {
    fn component_name(&self) -> String {
        format!("Executor[{}]", self.inner.config.name)
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle.add_listener(listener)
    }

    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        self.lifecycle.remove_listener(listener)
    }

    fn find_lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lifecycle.listeners()
    }

    fn init(&self) -> Result<()> {
        self.lifecycle.init(self, || Ok(()))
    }

    fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::New {
            self.init()?;
        }
        self.lifecycle.start(self, || {
            self.inner.state.lock().accepting = true;
            info!(
                executor = %self.inner.config.name,
                max_threads = self.inner.config.max_threads,
                "executor started"
            );
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.lifecycle.stop(self, || {
            self.shutdown();
            Ok(())
        })
    }

    fn destroy(&self) -> Result<()> {
        self.stop()?;
        self.lifecycle.destroy(self, || Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    fn executor(max_threads: usize, max_queue_size: usize) -> StandardExecutor {
        let mut config = ExecutorConfig::new("shared");
        config.max_threads = max_threads;
        config.min_spare_threads = 0;
        config.max_queue_size = max_queue_size;
        StandardExecutor::new(config).unwrap()
    }

    #[test]
    fn rejects_until_started() {
        let executor = executor(2, 8);
        assert!(executor.execute(Box::new(|| {})).is_err());
        executor.start().unwrap();

        let (tx, rx) = mpsc::channel();
        executor
            .execute(Box::new(move || {
                tx.send(thread::current().name().map(str::to_string)).unwrap()
            }))
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("shared-exec-"));

        executor.stop().unwrap();
        assert!(executor.execute(Box::new(|| {})).is_err());
    }

    #[test]
    fn grows_lazily_up_to_max_threads() {
        let executor = executor(2, 16);
        executor.start().unwrap();
        assert_eq!(executor.stats().pool_size, 0);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (done_tx, done_rx) = mpsc::channel();
        for _ in 0..4 {
            let release_rx = release_rx.clone();
            let done_tx = done_tx.clone();
            executor
                .execute(Box::new(move || {
                    let _ = release_rx.lock().recv();
                    done_tx.send(()).unwrap();
                }))
                .unwrap();
        }
        assert_eq!(executor.stats().pool_size, 2);

        for _ in 0..4 {
            release_tx.send(()).unwrap();
        }
        for _ in 0..4 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        executor.stop().unwrap();
    }

    #[test]
    fn full_queue_rejects() {
        let executor = executor(1, 1);
        executor.start().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        executor
            .execute(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
            }))
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        executor.execute(Box::new(|| {})).unwrap();
        let rejected = executor.execute(Box::new(|| {})).unwrap_err();
        assert_eq!(rejected.reason, "queue is full");
        release_tx.send(()).unwrap();
        executor.stop().unwrap();
    }

    #[test]
    fn panicking_task_keeps_thread_alive() {
        let executor = executor(1, 8);
        executor.start().unwrap();
        executor.execute(Box::new(|| panic!("task failure"))).unwrap();
        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        executor.destroy().unwrap();
        assert_eq!(executor.state(), LifecycleState::Destroyed);
    }
}

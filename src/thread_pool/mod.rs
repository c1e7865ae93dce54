//! The concurrent task execution engine used to run operation completion
//! callbacks off the network IO path.
//!
//! A [`TaskPool`] owns a fixed-capacity ring buffer of task slots shared by
//! every producer and worker thread, and an elastically-sized set of OS
//! worker threads that are spawned on demand, sleep when idle, and are woken
//! through a private notification channel. All queue coordination is done
//! with compare-and-swap retry loops over four monotonically increasing
//! counters; there is no mutex anywhere on the schedule or execute path.
//!
//! Producers call [`TaskPool::schedule`] with a [`Task`]; some worker thread
//! eventually dequeues and runs it. Scheduling never blocks: a full queue is
//! reported back to the caller together with the current queue depth so the
//! caller can pace its retries.
//!
//! [`TaskPool`]: ./struct.TaskPool.html
//! [`Task`]: ./struct.Task.html
//! [`TaskPool::schedule`]: ./struct.TaskPool.html#method.schedule

use std::fmt;
use thiserror::Error;

mod pool;
mod ring;
mod worker;

pub use pool::TaskPool;

/// Hard upper bound on [`TaskPoolConfig::ring_size_exp`]. A ring with more
/// than a billion slots is almost certainly a misconfiguration.
///
/// [`TaskPoolConfig::ring_size_exp`]: ./struct.TaskPoolConfig.html#structfield.ring_size_exp
pub const MAX_RING_SIZE_EXP: u8 = 30;

/// ring size exponent used when the config field is left at zero
pub const DEFAULT_RING_SIZE_EXP: u8 = 8;

/// worker thread cap used when the config field is left at zero
pub const DEFAULT_MAX_THREADS: usize = 8;

/// A unit of work for the pool: a closure to run, plus an optional cleanup
/// closure that is invoked instead of `run` when the pool is shut down before
/// the task was ever started.
///
/// The pool never interprets what either closure captures; releasing any
/// resources a never-run task holds is entirely the cleanup closure's job.
/// Dropping a `Task` without executing or cancelling it runs neither closure.
pub struct Task {
    run: Box<dyn FnOnce() + Send + 'static>,
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Task {
    /// creates a task with no cleanup closure; if the pool shuts down before
    /// the task runs, it is discarded without notice
    pub fn new<F>(run: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            run: Box::new(run),
            cleanup: None,
        }
    }

    /// creates a task whose `cleanup` closure is invoked if the pool is shut
    /// down while the task is still queued
    pub fn with_cleanup<F, C>(run: F, cleanup: C) -> Task
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Task {
            run: Box::new(run),
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Runs the cleanup closure, if any, without running the task itself.
    ///
    /// This is what the pool does to queued tasks during shutdown; it is also
    /// available to callers that got a task handed back from a refused
    /// [`TaskPool::schedule`] and will not retry it.
    ///
    /// [`TaskPool::schedule`]: ./struct.TaskPool.html#method.schedule
    pub fn cancel(self) {
        if let Some(cleanup) = self.cleanup {
            cleanup();
        }
    }

    /// runs the task; the cleanup closure is dropped unexecuted
    pub(crate) fn execute(self) {
        (self.run)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// Configuration for a [`TaskPool`]. Fields left at zero take their defaults.
///
/// [`TaskPool`]: ./struct.TaskPool.html
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPoolConfig {
    /// log2 of the task ring buffer size; `0` means [`DEFAULT_RING_SIZE_EXP`],
    /// values above [`MAX_RING_SIZE_EXP`] are rejected
    ///
    /// [`DEFAULT_RING_SIZE_EXP`]: ./constant.DEFAULT_RING_SIZE_EXP.html
    /// [`MAX_RING_SIZE_EXP`]: ./constant.MAX_RING_SIZE_EXP.html
    pub ring_size_exp: u8,

    /// maximum number of worker threads to spawn on demand; `0` means
    /// [`DEFAULT_MAX_THREADS`]
    ///
    /// [`DEFAULT_MAX_THREADS`]: ./constant.DEFAULT_MAX_THREADS.html
    pub max_threads: usize,
}

/// A point-in-time snapshot of the operating state of a [`TaskPool`].
///
/// The snapshot is best-effort: it is assembled from atomic reads while the
/// pool keeps running, so the fields may be mutually slightly stale.
///
/// [`TaskPool`]: ./struct.TaskPool.html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// workers currently awake (executing or looking for work)
    pub active_threads: usize,
    /// live workers that are asleep waiting for a wakeup
    pub dormant_threads: usize,
    /// committed tasks not yet claimed by any worker
    pub backlog: usize,
}

/// Why a [`TaskPool::schedule`] call was refused. Both variants hand the task
/// back to the caller, the way crossbeam's `try_send` returns the unsent
/// message.
///
/// [`TaskPool::schedule`]: ./struct.TaskPool.html#method.schedule
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The ring buffer is full. `backlog` is the number of outstanding tasks,
    /// intended to let the caller sleep proportionally before retrying; a
    /// full queue is expected under load and is not an anomaly.
    #[error("task queue is full ({backlog} tasks outstanding)")]
    Full {
        /// current queue occupancy, in `[0, capacity - 1]`
        backlog: usize,
        /// the task that was not scheduled
        task: Task,
    },

    /// The pool has entered shutdown and accepts no new work, regardless of
    /// remaining capacity.
    #[error("pool is shutting down")]
    ShuttingDown(
        /// the task that was not scheduled
        Task,
    ),
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use tracing::{debug, error, info, instrument};

use super::ring::TaskRing;
use super::worker::{run_worker, WorkerSlot, WorkerStatus};
use super::{
    PoolStats, ScheduleError, Task, TaskPoolConfig, DEFAULT_MAX_THREADS, DEFAULT_RING_SIZE_EXP,
    MAX_RING_SIZE_EXP,
};
use crate::error::{KvcError, Result};

/// State shared between the pool handle and every worker thread.
pub(super) struct PoolShared {
    pub(super) ring: TaskRing,
    pub(super) workers: Box<[WorkerSlot]>,
    shutting_down: AtomicBool,
    /// number of workers spawned so far; monotonically non-decreasing
    live: AtomicUsize,
    /// serializes slot assignment on the (cold) spawn path
    spawn_lock: Mutex<()>,
    max_threads: usize,
}

/// The task execution engine: a bounded lock-free task queue drained by a set
/// of worker threads that grows on demand up to a configured cap.
///
/// Completion callbacks for inbound responses are scheduled here so they run
/// off the reader thread; any other deferred work fits the same contract.
/// The handle is not cloneable: share it behind an [`Arc`] and drop the last
/// clone to tear the pool down.
///
/// # Example
/// Run a closure on a pool worker:
/// ```rust
/// use kvc::thread_pool::{Task, TaskPool, TaskPoolConfig};
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let pool = TaskPool::new(TaskPoolConfig::default())?; // all defaults
/// pool.schedule(Task::new(|| println!("running on a worker"))).unwrap();
/// while !pool.shutdown(false) {} // drain and join
/// # Ok(())
/// # }
/// ```
pub struct TaskPool {
    shared: Arc<PoolShared>,
}

impl TaskPool {
    /// Creates a pool from `config`, with zeroed fields taking their
    /// defaults. No worker threads are spawned until work arrives.
    ///
    /// # Errors
    /// returns [`KvcError::Config`] if the ring size exponent is over
    /// [`MAX_RING_SIZE_EXP`]
    ///
    /// [`KvcError::Config`]: ../enum.KvcError.html
    /// [`MAX_RING_SIZE_EXP`]: ./constant.MAX_RING_SIZE_EXP.html
    pub fn new(config: TaskPoolConfig) -> Result<TaskPool> {
        let mut config = config;
        if config.ring_size_exp == 0 {
            config.ring_size_exp = DEFAULT_RING_SIZE_EXP;
        }
        if config.max_threads == 0 {
            config.max_threads = DEFAULT_MAX_THREADS;
        }

        if config.ring_size_exp > MAX_RING_SIZE_EXP {
            return Err(KvcError::Config(format!(
                "ring_size_exp {} is over the maximum of {}",
                config.ring_size_exp, MAX_RING_SIZE_EXP
            )));
        }

        let workers: Box<[WorkerSlot]> = (0..config.max_threads)
            .map(|_| WorkerSlot::empty())
            .collect();

        info!(
            ring_size = 1usize << config.ring_size_exp,
            max_threads = config.max_threads,
            "created task pool"
        );

        Ok(TaskPool {
            shared: Arc::new(PoolShared {
                ring: TaskRing::with_size_exp(config.ring_size_exp),
                workers,
                shutting_down: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                spawn_lock: Mutex::new(()),
                max_threads: config.max_threads,
            }),
        })
    }

    /// Queues `task` for execution on some worker thread and wakes or spawns
    /// a worker to run it. Never blocks.
    ///
    /// # Errors
    /// [`ScheduleError::ShuttingDown`] once [`shutdown`] has been called, and
    /// [`ScheduleError::Full`] when the ring is at capacity; both hand the
    /// task back so the caller can retry or cancel it.
    ///
    /// [`ScheduleError::ShuttingDown`]: ./enum.ScheduleError.html
    /// [`ScheduleError::Full`]: ./enum.ScheduleError.html
    /// [`shutdown`]: #method.shutdown
    pub fn schedule(&self, task: Task) -> std::result::Result<(), ScheduleError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(ScheduleError::ShuttingDown(task));
        }
        self.shared.ring.push(task)?;
        self.shared.notify_new_task();
        Ok(())
    }

    /// returns a non-blocking, best-effort snapshot of the pool state
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let live = shared.live.load(Ordering::SeqCst);
        let active = shared.workers[..live]
            .iter()
            .filter(|w| w.status() == WorkerStatus::Awake)
            .count();

        PoolStats {
            active_threads: active,
            dormant_threads: live - active,
            backlog: shared.ring.backlog(),
        }
    }

    /// Begins (or continues) pool shutdown. New [`schedule`] calls fail from
    /// here on, queued-but-never-started tasks are cancelled through their
    /// cleanup closures, and every worker's wake channel is closed so idle
    /// workers exit.
    ///
    /// With `kill_all` the pool stops waiting for workers that are still
    /// executing: their threads are abandoned, and whatever their in-flight
    /// task holds is leaked. Cleanup closures of in-flight tasks are *not*
    /// run, since the abandoned thread still owns the task and may yet
    /// complete it.
    ///
    /// # Returns
    /// `true` once every spawned worker has been joined (or abandoned).
    /// Callers should invoke this in a retry loop until it returns `true`,
    /// escalating to `kill_all` only if cooperative shutdown stalls.
    ///
    /// [`schedule`]: #method.schedule
    #[instrument(skip(self))]
    pub fn shutdown(&self, kill_all: bool) -> bool {
        let shared = &self.shared;
        shared.shutting_down.store(true, Ordering::SeqCst);

        // cancel committed work no worker has claimed; the claim CAS makes
        // this race-free against workers still draining
        while let Some(task) = shared.ring.pop() {
            task.cancel();
        }

        let live = shared.live.load(Ordering::SeqCst);
        let mut done = 0;
        for (index, slot) in shared.workers[..live].iter().enumerate() {
            match slot.status() {
                WorkerStatus::Joined => done += 1,
                WorkerStatus::ShuttingDown => {
                    if let Some(handle) = slot.take_handle() {
                        if handle.join().is_err() {
                            // the worker died in a task panic, already logged
                            error!(worker = index, "joined a panicked worker thread");
                        }
                    }
                    slot.set_status(WorkerStatus::Joined);
                    done += 1;
                }
                _ => {
                    slot.close_wake_channel();
                    if kill_all {
                        // no thread cancellation exists here; abandon the
                        // thread and tolerate whatever it holds
                        drop(slot.take_handle());
                        slot.set_status(WorkerStatus::Joined);
                        debug!(worker = index, "abandoned a busy worker");
                        done += 1;
                    }
                }
            }
        }

        done == live
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // cooperative teardown; callers that cannot wait for in-flight tasks
        // call shutdown(true) themselves before dropping
        while !self.shutdown(false) {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl PoolShared {
    /// Wake-or-spawn policy, applied after every successful schedule: poke
    /// one sleeping worker if there is one, otherwise grow the pool if it is
    /// under its thread cap, otherwise let the busy workers get to the task
    /// on their own.
    fn notify_new_task(self: &Arc<Self>) {
        let live = self.live.load(Ordering::SeqCst);
        for slot in &self.workers[..live] {
            if slot.status() == WorkerStatus::Asleep && slot.try_wake() {
                return;
            }
        }

        if live < self.max_threads {
            self.spawn_worker();
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let _guard = self.spawn_lock.lock().unwrap();
        let index = self.live.load(Ordering::SeqCst);
        if index >= self.max_threads {
            return;
        }

        let (wake_tx, wake_rx) = channel::bounded(1);
        let slot = &self.workers[index];
        slot.set_status(WorkerStatus::Awake);

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("kvc-worker-{}", index))
            .spawn(move || run_worker(shared, index, wake_rx));

        match spawned {
            Ok(handle) => {
                slot.install(wake_tx, handle);
                self.live.store(index + 1, Ordering::SeqCst);
                debug!(worker = index, "spawned worker thread");
            }
            Err(e) => {
                // transient resource exhaustion: the pool simply does not
                // grow, queued work stays for whichever threads exist
                slot.set_status(WorkerStatus::None);
                debug!("worker spawn failed: {}", e);
            }
        }
    }
}

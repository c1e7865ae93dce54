//! integration tests for the task pool engine

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kvc::{ScheduleError, Semaphore, Task, TaskPool, TaskPoolConfig};

const LONG_ENOUGH: Duration = Duration::from_secs(30);

/// schedule `task`, sleeping through advisory full-queue errors until the
/// pool accepts it
fn schedule_with_retry(pool: &TaskPool, task: Task) {
    let mut task = task;
    loop {
        match pool.schedule(task) {
            Ok(()) => return,
            Err(ScheduleError::Full { task: unsent, .. }) => {
                task = unsent;
                thread::sleep(Duration::from_micros(50));
            }
            Err(ScheduleError::ShuttingDown(_)) => panic!("pool shut down mid-test"),
        }
    }
}

/// spin-wait (with sleeps) until `pred` holds, panicking after a deadline
fn wait_until<F: Fn() -> bool>(what: &str, pred: F) {
    let deadline = Instant::now() + LONG_ENOUGH;
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// drive the shutdown retry loop to completion
fn shutdown_fully(pool: &TaskPool) {
    wait_until("pool shutdown", || pool.shutdown(false));
}

fn pool_with(ring_size_exp: u8, max_threads: usize) -> TaskPool {
    TaskPool::new(TaskPoolConfig {
        ring_size_exp,
        max_threads,
    })
    .unwrap()
}

/// Parks the pool's (single) worker on a task that spins until `gate` opens.
/// Returns once the worker has claimed the task, so the caller knows exactly
/// how much ring capacity remains.
fn park_worker(pool: &TaskPool, gate: &Arc<AtomicBool>) {
    let started = Arc::new(AtomicBool::new(false));
    let started_flag = Arc::clone(&started);
    let gate = Arc::clone(gate);
    schedule_with_retry(
        pool,
        Task::new(move || {
            started_flag.store(true, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }),
    );
    wait_until("worker to park", || started.load(Ordering::SeqCst));
}

#[test]
fn config_rejects_oversized_ring() {
    assert!(TaskPool::new(TaskPoolConfig {
        ring_size_exp: 31,
        max_threads: 1,
    })
    .is_err());
}

#[test]
fn thousand_noop_tasks_all_complete() {
    let pool = pool_with(8, 4);
    let count = Arc::new(AtomicU64::new(0));

    for _ in 0..1000 {
        let count = Arc::clone(&count);
        schedule_with_retry(
            &pool,
            Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    wait_until("all 1000 tasks to run", || count.load(Ordering::SeqCst) == 1000);
    wait_until("backlog to drain", || pool.stats().backlog == 0);
    shutdown_fully(&pool);
}

#[test]
fn capacity_is_bounded_and_backpressure_is_sane() {
    // one worker, 16 slots; park the worker so the queue can only fill
    let capacity = 1usize << 4;
    let pool = pool_with(4, 1);
    let gate = Arc::new(AtomicBool::new(false));
    let count = Arc::new(AtomicU64::new(0));

    park_worker(&pool, &gate);

    // the parked task has already released its slot, so up to capacity - 1
    // more tasks fit before the ring refuses
    let mut accepted = 0;
    let reported_backlog = loop {
        let count = Arc::clone(&count);
        let task = Task::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        match pool.schedule(task) {
            Ok(()) => accepted += 1,
            Err(ScheduleError::Full { backlog, .. }) => break backlog,
            Err(ScheduleError::ShuttingDown(_)) => panic!("pool shut down mid-test"),
        }
        assert!(accepted <= capacity, "scheduled past ring capacity");
    };

    assert_eq!(accepted, capacity - 1);
    assert!(reported_backlog < capacity, "backlog out of range");

    // a retry eventually succeeds once the worker drains something
    gate.store(true, Ordering::SeqCst);
    wait_until("queued tasks to run", || {
        count.load(Ordering::SeqCst) == accepted as u64
    });
    {
        let count = Arc::clone(&count);
        schedule_with_retry(
            &pool,
            Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    wait_until("retried task to run", || {
        count.load(Ordering::SeqCst) == accepted as u64 + 1
    });
    shutdown_fully(&pool);
}

#[test]
fn single_worker_runs_tasks_in_schedule_order() {
    // with one consumer, execution order is exactly commit order, which must
    // match the order one producer scheduled in
    let pool = pool_with(8, 1);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    for i in 0..200usize {
        let seen = Arc::clone(&seen);
        schedule_with_retry(
            &pool,
            Task::new(move || {
                seen.lock().unwrap().push(i);
            }),
        );
    }

    wait_until("all tasks to run", || seen.lock().unwrap().len() == 200);
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..200).collect::<Vec<_>>());
    shutdown_fully(&pool);
}

#[test]
fn shutdown_cancels_queued_tasks_exactly_once() {
    let tasks = 30usize;
    let pool = pool_with(6, 1);
    let gate = Arc::new(AtomicBool::new(false));

    park_worker(&pool, &gate);

    // every task either runs or is cleaned up, never both, never neither
    let ran: Arc<Vec<AtomicUsize>> = Arc::new((0..tasks).map(|_| AtomicUsize::new(0)).collect());
    let cleaned: Arc<Vec<AtomicUsize>> =
        Arc::new((0..tasks).map(|_| AtomicUsize::new(0)).collect());

    for i in 0..tasks {
        let ran = Arc::clone(&ran);
        let cleaned = Arc::clone(&cleaned);
        schedule_with_retry(
            &pool,
            Task::with_cleanup(
                move || {
                    ran[i].fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    cleaned[i].fetch_add(1, Ordering::SeqCst);
                },
            ),
        );
    }

    // first call drains the queued tasks through their cleanups; the worker
    // is still parked so the pool is not fully down yet
    pool.shutdown(false);

    match pool.schedule(Task::new(|| {})) {
        Err(ScheduleError::ShuttingDown(_)) => {}
        other => panic!("schedule after shutdown returned {:?}", other.is_ok()),
    }

    gate.store(true, Ordering::SeqCst);
    shutdown_fully(&pool);

    for i in 0..tasks {
        let total = ran[i].load(Ordering::SeqCst) + cleaned[i].load(Ordering::SeqCst);
        assert_eq!(total, 1, "task {} ran/cleaned {} times", i, total);
    }
}

#[test]
fn shutdown_is_idempotent() {
    let pool = pool_with(4, 2);
    schedule_with_retry(&pool, Task::new(|| {}));

    shutdown_fully(&pool);
    assert!(pool.shutdown(false));
    assert!(pool.shutdown(false));

    let stats = pool.stats();
    assert_eq!(stats.backlog, 0);
}

#[test]
fn drop_drains_queued_cleanups() {
    let tasks = 20usize;
    let gate = Arc::new(AtomicBool::new(false));
    let settled = Arc::new(AtomicU64::new(0));

    {
        let pool = pool_with(6, 1);
        park_worker(&pool, &gate);
        for _ in 0..tasks {
            let run_settled = Arc::clone(&settled);
            let cancel_settled = Arc::clone(&settled);
            schedule_with_retry(
                &pool,
                Task::with_cleanup(
                    move || {
                        run_settled.fetch_add(1, Ordering::SeqCst);
                    },
                    move || {
                        cancel_settled.fetch_add(1, Ordering::SeqCst);
                    },
                ),
            );
        }
        gate.store(true, Ordering::SeqCst);
        // drop without an explicit shutdown call
    }

    assert_eq!(settled.load(Ordering::SeqCst), tasks as u64);
}

fn chain(pool: &Arc<TaskPool>, remaining: u64, count: &Arc<AtomicU64>, sem: &Arc<Semaphore>) {
    count.fetch_add(1, Ordering::SeqCst);
    if remaining == 1 {
        sem.signal();
        return;
    }

    let next_pool = Arc::clone(pool);
    let next_count = Arc::clone(count);
    let next_sem = Arc::clone(sem);
    schedule_with_retry(
        pool,
        Task::new(move || chain(&next_pool, remaining - 1, &next_count, &next_sem)),
    );
}

#[test]
fn chained_reschedules_terminate_with_one_signal() {
    // each link schedules its successor and returns, so the chain runs
    // 10_000 deep without recursing
    let links = 10_000u64;
    let pool = Arc::new(pool_with(8, 2));
    let count = Arc::new(AtomicU64::new(0));
    let sem = Semaphore::new();

    {
        let pool2 = Arc::clone(&pool);
        let count2 = Arc::clone(&count);
        let sem2 = Arc::clone(&sem);
        schedule_with_retry(&pool, Task::new(move || chain(&pool2, links, &count2, &sem2)));
    }

    Semaphore::wait_for_signal_and_destroy(sem);
    assert_eq!(count.load(Ordering::SeqCst), links);
    shutdown_fully(&pool);
}

#[test]
fn eight_producers_run_exactly_eight_thousand_tasks() {
    let pool = pool_with(8, 4);
    let count = Arc::new(AtomicU64::new(0));

    crossbeam_utils::thread::scope(|scope| {
        for _ in 0..8 {
            let pool = &pool;
            let count = Arc::clone(&count);
            scope.spawn(move |_| {
                for _ in 0..1000 {
                    let count = Arc::clone(&count);
                    schedule_with_retry(
                        pool,
                        Task::new(move || {
                            count.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                }
            });
        }
    })
    .unwrap();

    wait_until("all 8000 tasks to run", || {
        count.load(Ordering::SeqCst) == 8000
    });
    shutdown_fully(&pool);
    assert_eq!(count.load(Ordering::SeqCst), 8000);
}

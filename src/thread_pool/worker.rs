use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, error};

use super::pool::PoolShared;

/// Lifecycle states of one worker thread. A worker only ever moves forward
/// through this list, except for the Asleep/Awake pair which it bounces
/// between while the pool is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(super) enum WorkerStatus {
    /// slot has no thread yet
    None = 0,
    /// thread is blocked on its wake channel to reduce CPU
    Asleep = 1,
    /// thread is executing or looking for work
    Awake = 2,
    /// thread has observed shutdown and returned (or is about to)
    ShuttingDown = 3,
    /// thread has been joined
    Joined = 4,
}

impl WorkerStatus {
    fn from_u8(v: u8) -> WorkerStatus {
        match v {
            0 => WorkerStatus::None,
            1 => WorkerStatus::Asleep,
            2 => WorkerStatus::Awake,
            3 => WorkerStatus::ShuttingDown,
            4 => WorkerStatus::Joined,
            _ => unreachable!("corrupt worker status {}", v),
        }
    }
}

/// One entry of the pool's worker descriptor array, created empty at pool
/// init and filled in when the worker at that index is spawned. The wake
/// channel is the Rust rendering of a private notification pipe: the
/// controller sends a unit to wake the sleeping thread, and dropping the
/// sender is the hangup that tells the thread to shut down.
pub(super) struct WorkerSlot {
    status: AtomicU8,
    wake: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    pub(super) fn empty() -> WorkerSlot {
        WorkerSlot {
            status: AtomicU8::new(WorkerStatus::None as u8),
            wake: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub(super) fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(super) fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    pub(super) fn install(&self, wake: Sender<()>, handle: JoinHandle<()>) {
        *self.wake.lock().unwrap() = Some(wake);
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Sends a wake token to this worker. A token already sitting in the
    /// channel counts as woken; a disconnected channel does not.
    pub(super) fn try_wake(&self) -> bool {
        match self.wake.lock().unwrap().as_ref() {
            Some(tx) => match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => true,
                Err(TrySendError::Disconnected(())) => false,
            },
            None => false,
        }
    }

    /// drops the wake sender, which reads as a hangup on the worker's side
    pub(super) fn close_wake_channel(&self) {
        let _ = self.wake.lock().unwrap().take();
    }

    pub(super) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().unwrap().take()
    }
}

/// Sets the slot's terminal running-state even if the worker dies in a task
/// panic, so shutdown accounting still converges.
struct ExitGuard<'a> {
    slot: &'a WorkerSlot,
    index: usize,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.index, "worker thread died in a task panic");
        } else {
            debug!(worker = self.index, "worker thread stopped");
        }
        self.slot.set_status(WorkerStatus::ShuttingDown);
    }
}

/// Main loop of one worker thread.
///
/// While there is committed work the worker claims and runs exactly one task
/// per iteration, re-checking its wake channel in between so a shutdown
/// hangup is observed promptly. When the queue is empty it publishes Asleep,
/// re-checks the queue (a producer that commits after seeing Asleep is
/// guaranteed to send a token, so the recv cannot miss work), and blocks with
/// no timeout.
pub(super) fn run_worker(shared: Arc<PoolShared>, index: usize, wake_rx: Receiver<()>) {
    let slot = &shared.workers[index];
    let _guard = ExitGuard { slot, index };

    loop {
        if shared.ring.backlog() == 0 {
            slot.set_status(WorkerStatus::Asleep);
            if shared.ring.backlog() == 0 {
                match wake_rx.recv() {
                    Ok(()) => {}
                    // hangup: the controller closed our channel
                    Err(_) => return,
                }
            }
            slot.set_status(WorkerStatus::Awake);
        }

        // one task per iteration, executed outside any lock or mark
        if let Some(task) = shared.ring.pop() {
            task.execute();
        }

        match wake_rx.try_recv() {
            // drain a stale wake token so the channel can carry the next one
            Ok(()) => {}
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return,
        }
    }
}

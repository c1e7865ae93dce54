use std::sync::{Arc, Condvar, Mutex};

/// A single-fire, thread-safe handshake between one waiting thread and one
/// completing thread.
///
/// The thread that is about to block creates the semaphore and hands a clone
/// of the [`Arc`] to the code that will finish the work (typically a
/// completion callback running on a [`TaskPool`] worker). The completing side
/// calls [`signal`] exactly once; the waiting side blocks in
/// [`wait_for_signal_and_destroy`], which retires its handle once the signal
/// has been observed.
///
/// This is deliberately a mutex + condition variable rather than an atomic
/// spin: the rendezvous is low frequency and the wait can span a full network
/// round trip.
///
/// [`TaskPool`]: ./thread_pool/struct.TaskPool.html
/// [`signal`]: #method.signal
/// [`wait_for_signal_and_destroy`]: #method.wait_for_signal_and_destroy
#[derive(Debug)]
pub struct Semaphore {
    signaled: Mutex<bool>,
    complete: Condvar,
}

impl Semaphore {
    /// creates an unsignaled semaphore, ready to be shared with the completing side
    pub fn new() -> Arc<Semaphore> {
        Arc::new(Semaphore {
            signaled: Mutex::new(false),
            complete: Condvar::new(),
        })
    }

    /// Signals the semaphore, unblocking the thread waiting on it.
    ///
    /// A semaphore must never be signaled more than once.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        debug_assert!(!*signaled, "semaphore signaled twice");
        *signaled = true;
        self.complete.notify_one();
    }

    /// reports whether the semaphore has been signaled, without blocking or
    /// consuming the signal
    pub fn check_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }

    /// Retires the given handle iff the semaphore has already been signaled.
    ///
    /// # Returns
    /// `Ok(())` if the semaphore was signaled and the handle was dropped.
    /// `Err(sem)` hands the still-usable handle back if no signal has arrived
    /// yet; an unsignaled semaphore is never retired through this path.
    pub fn destroy_if_signaled(sem: Arc<Semaphore>) -> std::result::Result<(), Arc<Semaphore>> {
        if sem.check_signaled() {
            Ok(())
        } else {
            Err(sem)
        }
    }

    /// Blocks the calling thread until the semaphore is signaled, then retires
    /// the handle. Returns immediately if the signal already arrived.
    ///
    /// This is the only path that may retire a semaphore that was unsignaled
    /// at call time, since it does not return before the signal is observed.
    pub fn wait_for_signal_and_destroy(sem: Arc<Semaphore>) {
        let mut signaled = sem.signaled.lock().unwrap();
        // condvar waits can wake spuriously, so re-check in a loop
        while !*signaled {
            signaled = sem.complete.wait(signaled).unwrap();
        }
    }
}

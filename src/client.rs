use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Deserializer;
use tracing::{debug, error};

use crate::protocol::{Request, RequestFrame, Response, ResponseFrame};
use crate::semaphore::Semaphore;
use crate::thread_pool::{PoolStats, ScheduleError, Task, TaskPool, TaskPoolConfig};
use crate::{KvcError, Result};

/// a parked completion closure, waiting for the response to its sequence number
type Callback = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

/// `KvcClient` holds one connection to a key-value storage device.
///
/// Requests are written to the socket tagged with a per-connection sequence
/// number; a dedicated reader thread deserializes responses (which arrive in
/// whatever order the device finishes them), routes each back to the
/// operation that issued it, and schedules the operation's completion
/// closure on a [`TaskPool`] so user code never runs on the IO thread.
///
/// The `*_async` methods expose that model directly. The blocking methods
/// (`put`, `get`, ...) are adapters: they submit the async form with a
/// closure that deposits the result and signals a [`Semaphore`] the calling
/// thread waits on.
///
/// [`TaskPool`]: ./thread_pool/struct.TaskPool.html
/// [`Semaphore`]: ./struct.Semaphore.html
pub struct KvcClient {
    writer: Mutex<BufWriter<TcpStream>>,
    stream: TcpStream,
    pending: Arc<DashMap<u64, Mutex<Callback>>>,
    next_seq: AtomicU64,
    pool: Arc<TaskPool>,
    closed: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl KvcClient {
    /// Establishes a connection to the device at `addr` and starts the
    /// response reader thread and the completion pool.
    pub fn connect<A: ToSocketAddrs>(addr: A, config: TaskPoolConfig) -> Result<KvcClient> {
        let stream = TcpStream::connect(addr)?;
        let reader_stream = stream.try_clone()?;
        let writer = Mutex::new(BufWriter::new(stream.try_clone()?));

        let pool = Arc::new(TaskPool::new(config)?);
        let pending: Arc<DashMap<u64, Mutex<Callback>>> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = {
            let pending = Arc::clone(&pending);
            let pool = Arc::clone(&pool);
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name("kvc-reader".to_string())
                .spawn(move || read_responses(reader_stream, pending, pool, closed))?
        };

        debug!("connected");
        Ok(KvcClient {
            writer,
            stream,
            pending,
            next_seq: AtomicU64::new(0),
            pool,
            closed,
            reader: Some(reader),
        })
    }

    /// returns a snapshot of the completion pool's state
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stores `value` under `key`, invoking `on_complete` from a pool worker
    /// once the device has answered.
    pub fn put_async<F>(&self, key: String, value: String, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit(Request::Put { key, value }, Box::new(on_complete))
    }

    /// Looks up `key`, invoking `on_complete` with the response once it arrives.
    pub fn get_async<F>(&self, key: String, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit(Request::Get { key }, Box::new(on_complete))
    }

    /// Deletes `key`, invoking `on_complete` once the device has answered.
    pub fn delete_async<F>(&self, key: String, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit(Request::Delete { key }, Box::new(on_complete))
    }

    /// Lists keys in `[start, end]` (at most `max`), invoking `on_complete`
    /// with the listing once it arrives.
    pub fn range_async<F>(&self, start: String, end: String, max: usize, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit(Request::GetKeyRange { start, end, max }, Box::new(on_complete))
    }

    /// Issues a no-op round trip, invoking `on_complete` when it returns.
    pub fn noop_async<F>(&self, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit(Request::Noop, Box::new(on_complete))
    }

    /// stores `value` under `key`, blocking until the device has answered
    pub fn put(&self, key: String, value: String) -> Result<()> {
        match self.call(Request::Put { key, value })? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// gets the value of the specified `key` from the device
    /// ## Returns
    /// `Ok<Some<String>>` if a value was found for the key.
    /// `Ok<None>` if there is no value associated with the key
    pub fn get(&self, key: String) -> Result<Option<String>> {
        match self.call(Request::Get { key })? {
            Response::Ok(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// removes `key` and its value from the device, blocking until done
    pub fn delete(&self, key: String) -> Result<()> {
        match self.call(Request::Delete { key })? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// lists up to `max` keys in the inclusive range `[start, end]`
    pub fn get_key_range(&self, start: String, end: String, max: usize) -> Result<Vec<String>> {
        match self.call(Request::GetKeyRange { start, end, max })? {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    /// a no-op round trip to the device, blocking until it returns
    pub fn noop(&self) -> Result<()> {
        match self.call(Request::Noop)? {
            Response::Ok(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Issues `req` and blocks the calling thread until its response has been
    /// routed back. The completion closure runs on a pool worker; this thread
    /// just sleeps on the handshake semaphore until then.
    fn call(&self, req: Request) -> Result<Response> {
        let sem = Semaphore::new();
        let result: Arc<Mutex<Option<Result<Response>>>> = Arc::new(Mutex::new(None));

        let cb_sem = Arc::clone(&sem);
        let cb_result = Arc::clone(&result);
        self.submit(
            req,
            Box::new(move |resp| {
                *cb_result.lock().unwrap() = Some(resp);
                cb_sem.signal();
            }),
        )?;

        Semaphore::wait_for_signal_and_destroy(sem);

        let resp = result.lock().unwrap().take();
        resp.expect("completion was signaled without a result")
    }

    /// Tags `req` with the next sequence number, parks the callback, and
    /// writes the frame. The callback is handed over exactly once: either a
    /// response (or disconnect) reaches it later, or it is taken back out
    /// here and an error is returned instead.
    fn submit(&self, req: Request, callback: Callback) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KvcError::Disconnected);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(seq, Mutex::new(callback));

        // the reader may have torn down while we inserted; anything it
        // already claimed will be completed by it, not by us
        if self.closed.load(Ordering::SeqCst) {
            if self.pending.remove(&seq).is_some() {
                return Err(KvcError::Disconnected);
            }
            return Ok(());
        }

        let frame = RequestFrame { seq, req };
        let written = {
            let mut writer = self.writer.lock().unwrap();
            serde_json::to_writer(&mut *writer, &frame)
                .map_err(KvcError::from)
                .and_then(|()| writer.flush().map_err(KvcError::from))
        };

        if let Err(e) = written {
            // the response will never come; take the callback back out
            self.pending.remove(&seq);
            return Err(e);
        }

        debug!(seq, "request sent");
        Ok(())
    }
}

impl Drop for KvcClient {
    fn drop(&mut self) {
        // unblock the reader thread, then let it fail whatever is pending
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("reader thread panicked");
            }
        }
        // catch operations submitted while the reader was tearing down
        fail_all_pending(&self.pool, &self.pending);
        // dropping the last pool handle drains and joins the workers
    }
}

/// maps a structurally valid but operation-mismatched response to an error
fn unexpected(resp: Response) -> KvcError {
    KvcError::Device(format!("unexpected response: {:?}", resp))
}

/// Reader thread body: stream responses off the socket and route each to the
/// operation that issued it. On EOF or a broken stream, every still-pending
/// operation is completed with a disconnect error.
fn read_responses(
    stream: TcpStream,
    pending: Arc<DashMap<u64, Mutex<Callback>>>,
    pool: Arc<TaskPool>,
    closed: Arc<AtomicBool>,
) {
    let reader = BufReader::new(&stream);
    let frames = Deserializer::from_reader(reader).into_iter::<ResponseFrame>();

    for frame in frames {
        match frame {
            Ok(frame) => route_response(&pool, &pending, frame),
            Err(e) => {
                debug!("response stream ended: {}", e);
                break;
            }
        }
    }

    // order matters: set closed before draining so a submit racing with this
    // teardown cannot park a callback nobody will ever complete
    closed.store(true, Ordering::SeqCst);
    fail_all_pending(&pool, &pending);
    debug!("reader thread stopped");
}

/// Routes one response frame to its pending operation and schedules the
/// completion closure on the pool.
fn route_response(pool: &TaskPool, pending: &DashMap<u64, Mutex<Callback>>, frame: ResponseFrame) {
    let callback = match pending.remove(&frame.seq) {
        Some((_, callback)) => callback.into_inner().unwrap(),
        None => {
            // devices can answer a sequence number at most once; a duplicate
            // or unknown one is dropped, not fatal
            debug!(seq = frame.seq, "response with no pending operation");
            return;
        }
    };

    let resp = match frame.resp {
        Response::Err(msg) => Err(KvcError::Device(msg)),
        other => Ok(other),
    };
    schedule_completion(pool, completion_task(callback, resp));
}

/// completes every still-pending operation with a disconnect error
fn fail_all_pending(pool: &TaskPool, pending: &DashMap<u64, Mutex<Callback>>) {
    let seqs: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for seq in seqs {
        if let Some((_, callback)) = pending.remove(&seq) {
            let callback = callback.into_inner().unwrap();
            debug!(seq, "failing pending operation: disconnected");
            schedule_completion(pool, completion_task(callback, Err(KvcError::Disconnected)));
        }
    }
}

/// Wraps a completion callback in a pool task. The run closure delivers the
/// response; the cleanup closure delivers a disconnect error instead if the
/// pool is shut down before the task ever runs. The shared cell guarantees
/// the callback fires exactly once whichever path wins.
fn completion_task(callback: Callback, resp: Result<Response>) -> Task {
    let cell = Arc::new(Mutex::new(Some((callback, resp))));
    let run_cell = Arc::clone(&cell);

    Task::with_cleanup(
        move || {
            if let Some((callback, resp)) = run_cell.lock().unwrap().take() {
                callback(resp);
            }
        },
        move || {
            if let Some((callback, _)) = cell.lock().unwrap().take() {
                callback(Err(KvcError::Disconnected));
            }
        },
    )
}

/// Schedules `task`, honoring the pool's backpressure: a full queue is an
/// advisory condition, so sleep proportionally to the reported backlog and
/// try again.
fn schedule_completion(pool: &TaskPool, task: Task) {
    let mut task = task;
    loop {
        match pool.schedule(task) {
            Ok(()) => return,
            Err(ScheduleError::Full { backlog, task: unsent }) => {
                task = unsent;
                thread::sleep(Duration::from_micros(10 * (backlog as u64 + 1)));
            }
            Err(ScheduleError::ShuttingDown(unsent)) => {
                // cancelling still informs the operation, exactly once
                unsent.cancel();
                return;
            }
        }
    }
}

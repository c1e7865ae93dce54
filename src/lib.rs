#![deny(missing_docs)]
//! A client library (kvc) for talking to networked key-value storage devices over a
//! binary, request/response, sequence-numbered wire protocol.
//!
//! This crate provides the [`KvcClient`] connection handle, as well as a [`kvc-client`]
//! executable that can be used to run operations against a device from the command line.
//! Requests are sent over a shared socket connection; responses arrive in whatever order
//! the device finishes them and are routed back to the operation that issued them by
//! sequence number.
//!
//! ## Supported Device Operations
//! The client supports the following operations, each in a blocking and an async flavor:
//!
//! - `PUT` a key/value pair onto the device
//! - `GET` the value associated with a key
//! - `DELETE` a key/value pair from the device
//! - `GETKEYRANGE` to list the keys within a key range
//! - `NOOP` as a connection health check
//!
//! See the [`Request`] and [`Response`] types for the structure of these operations.
//!
//! ## Task Pool
//! [`TaskPool`] is the concurrent task execution engine at the core of this crate, and
//! the reason the rest of it can stay simple.
//! It is responsible for the following tasks:
//! - running every operation completion callback off the network IO path, so slow user
//! code never stalls response routing
//! - queueing callbacks in a fixed-capacity ring buffer coordinated entirely with
//! atomic compare-and-swap pipelines (no locks on the hot path)
//! - spawning worker threads on demand up to a configured cap, sleeping them when idle,
//! and waking them through per-thread notification channels
//! - reporting backlog depth to callers when the queue is full, so upstream code can
//! apply backpressure instead of blocking
//!
//! ## Blocking Over Async
//! Every blocking call is implemented on top of its async counterpart with a
//! [`Semaphore`]: a one-shot, thread-safe handshake the calling thread sleeps on until
//! a pool worker runs the completion callback and signals it. Timeouts are deliberately
//! not provided at this layer; a caller that needs one should build it around the async
//! API.
//!
//! ## Custom Protocol
//! The wire protocol is a sequence-numbered [`RequestFrame`]/[`ResponseFrame`] pair
//! encoded as JSON and sent over Rust's TcpStream library. The sequence number is the
//! correlation key: the device may service requests concurrently and answer them out
//! of order.
//!
//! ### Client executable
//! As mentioned previously, a command line executable is provided that can be used to
//! run single operations against a device. It is implemented by the [`kvc-client`]
//! file.
//!
//! [`KvcClient`]: ./struct.KvcClient.html
//! [`TaskPool`]: ./thread_pool/struct.TaskPool.html
//! [`Semaphore`]: ./struct.Semaphore.html
//! [`Request`]: ./enum.Request.html
//! [`Response`]: ./enum.Response.html
//! [`RequestFrame`]: ./struct.RequestFrame.html
//! [`ResponseFrame`]: ./struct.ResponseFrame.html
//! [`kvc-client`]: ./kvc-client.rs

pub use client::KvcClient;
pub use error::{KvcError, Result};
pub use protocol::{Request, RequestFrame, Response, ResponseFrame};
pub use semaphore::Semaphore;
pub use thread_pool::{PoolStats, ScheduleError, Task, TaskPool, TaskPoolConfig};

mod client;
mod error;
mod protocol;
mod semaphore;
pub mod thread_pool;
